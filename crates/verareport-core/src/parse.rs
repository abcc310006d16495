//! 报告解析主流程与多报告调度
use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dedup::Deduplicator;
use crate::error::ReportError;
use crate::extract::{scan_report, ReportScan, ScanStatus};
use crate::options::{AnalysisStats, ParseOptions};
use crate::sink::{Diagnostics, ViolationSink};
use crate::types::{ReportOutcome, Violation};

/// 解析单个报告文件。
///
/// 文件只打开一次，单遍流式读取，任何返回路径上都会被关闭。
/// 空报告与损坏报告以 [`ReportOutcome`] 返回；打开/读取失败与 sink 故障返回 `Err`。
pub fn parse_report(
    path: &Path,
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
) -> Result<ReportOutcome, ReportError> {
    debug!(report = %path.display(), "parsing 'Vera++' format");
    let scan = open_and_scan(path)?;
    complete_scan(scan, sink, diagnostics, opts)
}

/// 从任意 `BufRead` 流解析报告（语义同 [`parse_report`]）
pub fn parse_reader<R: BufRead>(
    source: R,
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
) -> Result<ReportOutcome, ReportError> {
    let scan = scan_report(source)?;
    complete_scan(scan, sink, diagnostics, opts)
}

fn open_and_scan(path: &Path) -> Result<ReportScan, ReportError> {
    let file = File::open(path).map_err(|source| ReportError::Open { path: path.to_path_buf(), source })?;
    Ok(scan_report(BufReader::new(file))?)
}

/// 遍历完成后的阶段：先送出诊断，再（仅在结构完整时）去重并转发
fn complete_scan(
    scan: ReportScan,
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
) -> Result<ReportOutcome, ReportError> {
    for e in &scan.suppressed {
        diagnostics.suppressed_entry(&e.file_name, e.line.as_deref(), e.message.as_deref());
    }

    match scan.status {
        ScanStatus::Empty => Ok(ReportOutcome::Empty),
        ScanStatus::Malformed(detail) => Ok(ReportOutcome::Malformed(detail)),
        ScanStatus::Complete => {
            let mut dedup = Deduplicator::default();
            let mut forwarded = 0;
            for entry in scan.entries {
                let violation = Violation::from(entry);
                if dedup
                    .admit(violation, &opts.rule_repository, sink)
                    .map_err(ReportError::Sink)?
                {
                    forwarded += 1;
                }
            }
            Ok(ReportOutcome::Success(forwarded))
        }
    }
}

/// 依次解析多份报告，并把每份报告的结果计入统计
///
/// - 空报告、损坏报告记录日志后继续
/// - 打开/读取失败：`error_recovery` 开启时记录后跳过，否则中止
/// - sink 故障总是中止
///
/// 线程数大于 1 且报告多于 1 份时，遍历阶段并行执行；
/// 诊断与 sink 仍只在调用线程上按报告顺序处理，结果与串行一致。
pub fn analyze_reports(
    reports: &[PathBuf],
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
) -> Result<AnalysisStats> {
    let mut stats = AnalysisStats::default();

    let threads = opts.threads.unwrap_or_else(num_cpus::get);
    if threads > 1 && reports.len() > 1 {
        analyze_reports_parallel(reports, sink, diagnostics, opts, &mut stats, threads, open_and_scan)?;
        return Ok(stats);
    }

    for path in reports {
        debug!(report = %path.display(), "parsing 'Vera++' format");
        let scanned = open_and_scan(path);
        record_report(path, scanned, sink, diagnostics, opts, &mut stats)?;
    }
    Ok(stats)
}

/// 处理单份报告的遍历结果并更新统计；不可恢复的故障向上返回
fn record_report(
    path: &Path,
    scanned: Result<ReportScan, ReportError>,
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
    stats: &mut AnalysisStats,
) -> Result<()> {
    let outcome = scanned.and_then(|scan| complete_scan(scan, sink, diagnostics, opts));
    match outcome {
        Ok(ReportOutcome::Success(n)) => {
            stats.reports_parsed += 1;
            stats.violations_forwarded += n;
            info!(report = %path.display(), violations = n, "report processed");
        }
        Ok(ReportOutcome::Empty) => {
            stats.reports_empty += 1;
            warn!(report = %path.display(), "the report seems to be empty, ignoring");
        }
        Ok(ReportOutcome::Malformed(detail)) => {
            stats.reports_malformed += 1;
            error!(report = %path.display(), %detail, "ignoring XML error in report");
        }
        Err(e) if opts.error_recovery && e.is_recoverable() => {
            stats.reports_failed += 1;
            error!(report = %path.display(), error = %e, "cannot read report, skipping");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// 并行调度：
/// - Rayon 线程池并行打开并遍历报告（只做提取，不碰 sink）
/// - 调用线程按 idx 重排，依次做诊断、去重与转发，保证稳定顺序
/// - 转发失败时通知 worker 停止并等待其退出后再返回
fn analyze_reports_parallel(
    reports: &[PathBuf],
    sink: &mut dyn ViolationSink,
    diagnostics: &mut dyn Diagnostics,
    opts: &ParseOptions,
    stats: &mut AnalysisStats,
    threads: usize,
    scan: fn(&Path) -> Result<ReportScan, ReportError>,
) -> Result<()> {
    use crossbeam_channel as channel;
    use rayon::prelude::*;
    use std::collections::BTreeMap;

    type Msg = (usize /*idx*/, Result<ReportScan, ReportError>);
    let (tx, rx) = channel::bounded::<Msg>(64);

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let jobs: Vec<(usize, PathBuf)> = reports.iter().cloned().enumerate().collect();
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);

    let scan_thread = std::thread::spawn(move || {
        pool.install(|| {
            jobs.par_iter().for_each(|(idx, path)| {
                // 会话已中止：不再打开新的报告
                if worker_cancel.load(Ordering::Relaxed) {
                    return;
                }
                // 接收端已关闭时发送失败，忽略即可
                let _ = tx.send((*idx, scan(path)));
            });
        });
    });

    let mut next_idx: usize = 0;
    let mut buffer: BTreeMap<usize, Result<ReportScan, ReportError>> = BTreeMap::new();
    let mut outcome: Result<()> = Ok(());

    'recv: while let Ok((idx, scanned)) = rx.recv() {
        buffer.insert(idx, scanned);
        while let Some(scanned) = buffer.remove(&next_idx) {
            if let Err(e) = record_report(&reports[next_idx], scanned, sink, diagnostics, opts, stats) {
                outcome = Err(e);
                break 'recv;
            }
            next_idx += 1;
        }
    }

    // 先通知取消并关闭接收端，阻塞在 send 上的 worker 才能退出
    if outcome.is_err() {
        cancel.store(true, Ordering::Relaxed);
    }
    drop(rx);
    let joined = scan_thread.join();
    outcome?;
    if joined.is_err() {
        anyhow::bail!("report scan worker panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CollectingSink, NoDiagnostics};

    #[derive(Default)]
    struct RecordingDiagnostics {
        seen: Vec<(String, Option<String>, Option<String>)>,
    }

    impl Diagnostics for RecordingDiagnostics {
        fn suppressed_entry(&mut self, file_name: &str, line: Option<&str>, message: Option<&str>) {
            self.seen.push((file_name.into(), line.map(str::to_owned), message.map(str::to_owned)));
        }
    }

    /// 每次调用都记录下来的 sink
    #[derive(Default)]
    struct CallLog {
        calls: Vec<(String, Violation)>,
    }

    impl ViolationSink for CallLog {
        fn admit_and_store(&mut self, repo: &str, v: &Violation) -> Result<bool> {
            self.calls.push((repo.into(), v.clone()));
            Ok(true)
        }
    }

    fn parse_str(input: &[u8], sink: &mut dyn ViolationSink, diag: &mut dyn Diagnostics) -> ReportOutcome {
        parse_reader(input, sink, diag, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn duplicates_and_error_file_scenario() {
        let input = br#"<root><file name="a.cpp"><error line="1" message="m1" source="R1"/><error line="1" message="m1" source="R1"/></file><file name="error"><error line="9" message="oops"/></file></root>"#;
        let mut sink = CallLog::default();
        let mut diag = RecordingDiagnostics::default();

        let outcome = parse_str(input, &mut sink, &mut diag);

        assert_eq!(outcome, ReportOutcome::Success(1));
        assert_eq!(
            sink.calls,
            vec![(
                "vera++".to_string(),
                Violation {
                    file_name: "a.cpp".into(),
                    line: Some("1".into()),
                    rule_id: Some("R1".into()),
                    message: Some("m1".into()),
                }
            )]
        );
        assert_eq!(diag.seen, vec![("error".to_string(), Some("9".to_string()), Some("oops".to_string()))]);
    }

    #[test]
    fn empty_string_is_empty() {
        let mut sink = CallLog::default();
        assert_eq!(parse_str(b"", &mut sink, &mut NoDiagnostics), ReportOutcome::Empty);
        assert_eq!(parse_str(b"   \n\n\t", &mut sink, &mut NoDiagnostics), ReportOutcome::Empty);
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn corrupt_tail_forwards_nothing() {
        let mut input = br#"<root><file name="a.cpp"><error line="1" message="m1" source="R1"/></file>"#.to_vec();
        input.extend_from_slice(&[0xff, 0x00, 0xfe]);
        let mut sink = CallLog::default();

        let outcome = parse_str(&input, &mut sink, &mut NoDiagnostics);

        assert!(matches!(outcome, ReportOutcome::Malformed(_)));
        assert_eq!(outcome.forwarded(), 0);
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn control_characters_forward_nothing() {
        let input = b"<root><file name=\"a.cpp\"><error line=\"1\" message=\"m1\" source=\"R1\"/></file>\x01\x02</root>";
        let mut sink = CallLog::default();

        let outcome = parse_str(input, &mut sink, &mut NoDiagnostics);

        assert!(matches!(outcome, ReportOutcome::Malformed(_)));
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn valid_report_without_findings_is_success_zero() {
        let mut sink = CallLog::default();
        let outcome = parse_str(b"<root><file name=\"a.cpp\"/></root>", &mut sink, &mut NoDiagnostics);
        assert_eq!(outcome, ReportOutcome::Success(0));
    }

    #[test]
    fn first_occurrence_order_is_preserved() {
        let input = br#"<root>
            <file name="b.cpp"><error line="2" message="x" source="R2"/></file>
            <file name="a.cpp"><error line="1" message="y" source="R1"/></file>
            <file name="b.cpp"><error line="2" message="x" source="R2"/></file>
            <file name="c.cpp"><error line="3" message="z" source="R3"/></file>
        </root>"#;
        let mut sink = CallLog::default();
        assert_eq!(parse_str(input, &mut sink, &mut NoDiagnostics), ReportOutcome::Success(3));
        let files: Vec<&str> = sink.calls.iter().map(|(_, v)| v.file_name.as_str()).collect();
        assert_eq!(files, vec!["b.cpp", "a.cpp", "c.cpp"]);
    }

    #[test]
    fn sink_rejections_are_not_counted() {
        let input = br#"<root><file name="a.cpp"><error line="1" message="m" source="R"/></file></root>"#;
        let mut sink = CollectingSink::new();
        assert_eq!(parse_str(input, &mut sink, &mut NoDiagnostics), ReportOutcome::Success(1));
        // 同一个 sink 再解析一次：报告内去重集已重置，但 sink 判定为重复
        assert_eq!(parse_str(input, &mut sink, &mut NoDiagnostics), ReportOutcome::Success(0));
        assert_eq!(sink.violations().len(), 1);
    }

    #[test]
    fn rule_repository_is_passed_to_sink() {
        let input = br#"<root><file name="a.cpp"><error line="1" message="m" source="R"/></file></root>"#;
        let mut sink = CallLog::default();
        let opts = ParseOptions { rule_repository: "custom".into(), ..ParseOptions::default() };
        parse_reader(&input[..], &mut sink, &mut NoDiagnostics, &opts).unwrap();
        assert_eq!(sink.calls[0].0, "custom");
    }

    #[test]
    fn sink_fault_is_propagated() {
        struct FailingSink;
        impl ViolationSink for FailingSink {
            fn admit_and_store(&mut self, _repo: &str, _v: &Violation) -> Result<bool> {
                anyhow::bail!("storage unavailable")
            }
        }
        let input = br#"<root><file name="a.cpp"><error line="1" message="m" source="R"/></file></root>"#;
        let err = parse_reader(&input[..], &mut FailingSink, &mut NoDiagnostics, &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::Sink(_)));
        assert!(!err.is_recoverable());
    }

    static SLOW_SCANS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    fn slow_scan(_path: &Path) -> Result<ReportScan, ReportError> {
        SLOW_SCANS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let report = br#"<root><file name="a.cpp"><error line="1" message="m" source="R"/></file></root>"#;
        Ok(scan_report(&report[..])?)
    }

    #[test]
    fn sink_fault_stops_and_joins_parallel_workers() {
        struct FailingSink;
        impl ViolationSink for FailingSink {
            fn admit_and_store(&mut self, _repo: &str, _v: &Violation) -> Result<bool> {
                anyhow::bail!("storage unavailable")
            }
        }
        let reports: Vec<PathBuf> = (0..200).map(|i| PathBuf::from(format!("r{i}.xml"))).collect();
        let mut stats = AnalysisStats::default();

        let res = analyze_reports_parallel(
            &reports,
            &mut FailingSink,
            &mut NoDiagnostics,
            &ParseOptions::default(),
            &mut stats,
            2,
            slow_scan,
        );
        assert!(res.is_err());

        // 返回时 worker 已全部退出，计数不再变化
        let scanned = SLOW_SCANS.load(Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(SLOW_SCANS.load(Ordering::SeqCst), scanned);
        assert!(scanned < reports.len());
    }

    #[test]
    fn missing_report_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_report(
            &dir.path().join("absent.xml"),
            &mut CallLog::default(),
            &mut NoDiagnostics,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::Open { .. }));
    }
}
