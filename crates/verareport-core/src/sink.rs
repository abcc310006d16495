//! 外部协作方：违规 sink 与诊断接收端
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use tracing::debug;

use crate::types::Violation;

/// 违规 sink：负责规则元数据解析与持久化。
///
/// 返回 `true` 表示这是本会话内第一次见到该违规（已存储）；
/// `false` 表示重复，调用方不计数。返回 `Err` 视为 sink 故障，原样上抛。
pub trait ViolationSink {
    fn admit_and_store(&mut self, rule_repository: &str, violation: &Violation) -> Result<bool>;
}

/// 诊断接收端：只接收被屏蔽（文件名为 "error"）的条目，纯观察用途
pub trait Diagnostics {
    fn suppressed_entry(&mut self, file_name: &str, line: Option<&str>, message: Option<&str>);
}

/// 将诊断写入 tracing（debug 级别）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn suppressed_entry(&mut self, file_name: &str, line: Option<&str>, message: Option<&str>) {
        debug!(
            file = file_name,
            line = line.unwrap_or(""),
            message = message.unwrap_or(""),
            "checker reported an error entry"
        );
    }
}

/// 丢弃所有诊断
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {
    fn suppressed_entry(&mut self, _file_name: &str, _line: Option<&str>, _message: Option<&str>) {}
}

/// sink 中保存的一条违规（带规则库标识）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredViolation {
    pub rule_repository: String,
    pub violation: Violation,
}

/// 内存 sink：按首次出现顺序保存，整个 sink 生命周期内去重
#[derive(Debug, Default)]
pub struct CollectingSink {
    seen: HashSet<StoredViolation>,
    stored: Vec<StoredViolation>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> &[StoredViolation] {
        &self.stored
    }

    pub fn into_violations(self) -> Vec<StoredViolation> {
        self.stored
    }
}

impl ViolationSink for CollectingSink {
    fn admit_and_store(&mut self, rule_repository: &str, violation: &Violation) -> Result<bool> {
        let item = StoredViolation {
            rule_repository: rule_repository.to_string(),
            violation: violation.clone(),
        };
        if !self.seen.insert(item.clone()) {
            return Ok(false);
        }
        self.stored.push(item);
        Ok(true)
    }
}

/// 以 JSON 数组流式写出违规（`[` 在首次写入时输出，`finish` 补上 `]`）
pub struct JsonArraySink<W: Write> {
    out: W,
    seen: HashSet<StoredViolation>,
    started: bool,
    written: usize,
}

impl<W: Write> JsonArraySink<W> {
    pub fn new(out: W) -> Self {
        Self { out, seen: HashSet::new(), started: false, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// 写出结束符并返回底层 writer
    pub fn finish(mut self) -> Result<W> {
        if !self.started {
            write!(self.out, "[")?;
        }
        write!(self.out, "]")?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// JSON 输出项（借用 sink 收到的违规）
#[derive(Debug, Serialize)]
struct JsonViolation<'a> {
    rule_repository: &'a str,
    file: &'a str,
    line: Option<u64>,
    rule: Option<&'a str>,
    message: Option<&'a str>,
}

impl<'a> JsonViolation<'a> {
    fn new(rule_repository: &'a str, v: &'a Violation) -> Self {
        Self {
            rule_repository,
            file: &v.file_name,
            line: resolve_line(v.line.as_deref()),
            rule: v.rule_id.as_deref(),
            message: v.message.as_deref(),
        }
    }
}

/// 行号解析：正整数才算有效行，否则视为文件级问题
fn resolve_line(line: Option<&str>) -> Option<u64> {
    line.and_then(|l| l.trim().parse::<u64>().ok()).filter(|n| *n > 0)
}

impl<W: Write> ViolationSink for JsonArraySink<W> {
    fn admit_and_store(&mut self, rule_repository: &str, violation: &Violation) -> Result<bool> {
        let key = StoredViolation {
            rule_repository: rule_repository.to_string(),
            violation: violation.clone(),
        };
        if !self.seen.insert(key) {
            return Ok(false);
        }

        if self.started { write!(self.out, ",")?; } else { write!(self.out, "[")?; self.started = true; }
        serde_json::to_writer(&mut self.out, &JsonViolation::new(rule_repository, violation))?;
        self.written += 1;
        Ok(true)
    }
}
