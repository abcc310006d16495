//! 单份报告内的违规去重（内部使用）
use anyhow::Result;
use std::collections::HashSet;

use crate::sink::ViolationSink;
use crate::types::Violation;

/// 去重器：生命周期限定在一次报告解析内，不跨报告、不跨线程共享
#[derive(Debug, Default)]
pub(crate) struct Deduplicator {
    seen: HashSet<Violation>,
}

impl Deduplicator {
    /// 首次出现的违规交给 sink，返回 sink 的判定；
    /// 本报告内已见过的直接丢弃（不调用 sink，也不记录日志）
    pub(crate) fn admit(
        &mut self,
        violation: Violation,
        rule_repository: &str,
        sink: &mut dyn ViolationSink,
    ) -> Result<bool> {
        if self.seen.contains(&violation) {
            return Ok(false);
        }
        let stored = sink.admit_and_store(rule_repository, &violation)?;
        self.seen.insert(violation);
        Ok(stored)
    }
}
