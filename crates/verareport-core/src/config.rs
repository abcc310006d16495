//! 配置文件加载（TOML）与报告路径解析
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::options::{ParseOptions, DEFAULT_RULE_REPOSITORY};

/// 配置文件结构
///
/// ```toml
/// report_paths = ["build/vera++-report.xml", "reports/vera"]
/// rule_repository = "vera++"
/// threads = 4
/// error_recovery = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// 报告文件或目录（目录下递归收集 *.xml）
    #[serde(default)]
    pub report_paths: Vec<PathBuf>,
    #[serde(default = "default_rule_repository")]
    pub rule_repository: String,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_error_recovery")]
    pub error_recovery: bool,
}

fn default_rule_repository() -> String {
    DEFAULT_RULE_REPOSITORY.to_string()
}

fn default_error_recovery() -> bool {
    true
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_paths: Vec::new(),
            rule_repository: default_rule_repository(),
            threads: None,
            error_recovery: default_error_recovery(),
        }
    }
}

impl ReportConfig {
    pub fn to_options(&self) -> ParseOptions {
        ParseOptions {
            rule_repository: self.rule_repository.clone(),
            threads: self.threads,
            error_recovery: self.error_recovery,
        }
    }
}

/// 从 TOML 文件加载配置
pub fn load_config(path: &Path) -> Result<ReportConfig> {
    let txt = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    let cfg: ReportConfig = toml::from_str(&txt)
        .with_context(|| format!("parse config file {}", path.display()))?;
    Ok(cfg)
}

/// 将配置中的报告路径展开为具体文件列表
///
/// - 相对路径相对 `base_dir` 解析
/// - 文件原样保留；目录递归收集扩展名为 xml 的文件，并按路径排序
/// - 不存在的路径记录警告后跳过
pub fn resolve_report_paths(base_dir: &Path, entries: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in entries {
        let path = if entry.is_absolute() { entry.clone() } else { base_dir.join(entry) };

        if path.is_file() {
            out.push(path);
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")))
                .collect();
            found.sort();
            if found.is_empty() {
                warn!(path = %path.display(), "no report files found in directory");
            }
            out.extend(found);
        } else {
            warn!(path = %path.display(), "report path does not exist, skipping");
        }
    }
    out
}
