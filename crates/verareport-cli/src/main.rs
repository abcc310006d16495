use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use verareport_core::{
    analyze_reports, load_config, resolve_report_paths, JsonArraySink, ReportConfig, TracingDiagnostics,
};

/// 默认配置文件（存在时自动加载）
const DEFAULT_CONFIG: &str = "./verareport.toml";

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "verareport", version, about = "Vera++ 报告解析：将 XML 报告转换为违规列表")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 解析报告并生成 violations.json
    Parse {
        /// 配置文件（TOML）；默认 ./verareport.toml（存在时）
        #[arg(long)]
        config: Option<PathBuf>,

        /// 报告文件或目录，可重复；指定后覆盖配置中的 report_paths
        #[arg(long = "report")]
        reports: Vec<PathBuf>,

        /// 输出文件（JSON 数组）
        #[arg(long, default_value = "./violations.json")]
        output: PathBuf,

        /// 线程数（多份报告时并行遍历；"auto"=CPU 核心数）
        #[arg(long)]
        threads: Option<String>,

        /// 规则库标识（默认取配置，配置缺省为 vera++）
        #[arg(long)]
        rule_repository: Option<String>,

        /// 报告读取失败时直接退出，而不是跳过
        #[arg(long)]
        no_error_recovery: bool,
    },
}

fn main() -> Result<()> {
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { config, reports, output, threads, rule_repository, no_error_recovery } => {
            let (cfg, base_dir) = load_effective_config(config.as_deref())?;

            // 组装解析参数：命令行优先，其次配置文件
            let mut opts = cfg.to_options();
            if let Some(t) = threads.as_deref() {
                opts.threads = parse_threads(t);
            }
            if let Some(repo) = rule_repository {
                opts.rule_repository = repo;
            }
            if no_error_recovery {
                opts.error_recovery = false;
            }

            let entries = if reports.is_empty() { cfg.report_paths.clone() } else { reports };
            let report_files = resolve_report_paths(&base_dir, &entries);
            if report_files.is_empty() {
                warn!("no report files found, nothing to parse");
            }
            info!(reports = report_files.len(), ?output, "starting report parsing");

            // 以缓冲方式打开输出文件，按 JSON 数组流式写入
            let out = BufWriter::new(File::create(&output).context("create output file")?);
            let mut sink = JsonArraySink::new(out);
            let mut diagnostics = TracingDiagnostics;

            let stats = analyze_reports(&report_files, &mut sink, &mut diagnostics, &opts)
                .context("report parsing failed")?;
            sink.finish().context("finish output file")?;

            info!(
                reports_parsed = stats.reports_parsed,
                reports_empty = stats.reports_empty,
                reports_malformed = stats.reports_malformed,
                reports_failed = stats.reports_failed,
                violations_forwarded = stats.violations_forwarded,
                "parsing finished"
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 支持通过环境变量 RUST_LOG 控制日志等级，如：RUST_LOG=debug
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 加载配置：显式指定的必须存在；未指定时尝试默认路径，否则使用默认配置。
/// 返回配置及相对路径的解析基准目录（配置文件所在目录，或当前目录）
fn load_effective_config(explicit: Option<&Path>) -> Result<(ReportConfig, PathBuf)> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.is_file() {
                return Ok((ReportConfig::default(), PathBuf::from(".")));
            }
            default
        }
    };
    let cfg = load_config(&path)?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    info!(config = %path.display(), "loaded configuration");
    Ok((cfg, base_dir))
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") { return None; }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
