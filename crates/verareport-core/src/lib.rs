//! Vera++ 报告解析核心库
//!
//! 设计要点：
//! - 报告单遍流式读取（quick-xml 拉取式游标），从不整体载入内存。
//! - 三种终态互斥：Success(n) / Empty / Malformed；后两者作为返回值，而不是错误。
//! - 报告中途损坏时，本次调用已提取的违规全部丢弃，不做部分转发。
//! - 文件名为 "error" 的条目是检查器自身的错误记录，只送诊断端，不产生违规。
//! - 单份报告内按 (文件, 行, 规则, 消息) 去重；跨报告是否去重由 sink 决定。
//! - sink 与诊断端均以 trait 注入，核心不依赖持久化与日志实现。

mod config;
mod cursor;
mod dedup;
mod error;
mod extract;
mod options;
mod parse;
mod sink;
mod types;

pub use config::{load_config, resolve_report_paths, ReportConfig};
pub use error::ReportError;
pub use options::{AnalysisStats, ParseOptions, DEFAULT_RULE_REPOSITORY};
pub use parse::{analyze_reports, parse_reader, parse_report};
pub use sink::{
    CollectingSink, Diagnostics, JsonArraySink, NoDiagnostics, StoredViolation, TracingDiagnostics,
    ViolationSink,
};
pub use types::{ReportOutcome, Violation};
