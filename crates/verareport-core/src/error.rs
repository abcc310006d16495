//! 错误类型
use std::io;
use std::path::PathBuf;

/// 报告解析的故障。
///
/// 报告内容本身的问题（空报告、格式损坏）不走这里，而是作为
/// [`crate::ReportOutcome`] 的取值返回。
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// 报告文件无法打开
    #[error("cannot open report '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 读取过程中的 I/O 故障（与报告内容无关）
    #[error("I/O error while reading report: {0}")]
    Io(#[from] io::Error),

    /// sink 接收违规时失败；原样上抛，不重试
    #[error("violation sink failed: {0}")]
    Sink(#[source] anyhow::Error),
}

impl ReportError {
    /// 是否属于可按 `error_recovery` 跳过的报告级故障（sink 故障永远不可跳过）
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReportError::Sink(_))
    }
}
