//! 解析选项与统计信息（模块）

/// Vera++ 规则库的默认标识
pub const DEFAULT_RULE_REPOSITORY: &str = "vera++";

/// 解析选项
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// 传给 sink 的规则库标识
    pub rule_repository: String,
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
    /// 报告打不开/读失败时是否记录日志后跳过（false 则中止整个会话）
    pub error_recovery: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            rule_repository: DEFAULT_RULE_REPOSITORY.to_string(),
            threads: None,
            error_recovery: true,
        }
    }
}

/// 多报告会话的统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalysisStats {
    pub reports_parsed: usize,
    pub reports_empty: usize,
    pub reports_malformed: usize,
    /// 因 I/O 故障被跳过的报告（仅 error_recovery 开启时）
    pub reports_failed: usize,
    pub violations_forwarded: usize,
}
