//! 公共类型（对外暴露）

/// 归一化后的违规项（对应报告中的单个 `<error>` 元素）
///
/// 去重只看字段取值是否相等；`line` 保持报告中的原始字符串，
/// 数值解析由下游 sink 负责。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Violation {
    pub file_name: String,
    pub line: Option<String>,
    pub rule_id: Option<String>,
    pub message: Option<String>,
}

/// 单次报告解析的终态，每次调用恰好产生一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// 解析完成；值为 sink 实际接收（去重、屏蔽之后）的违规数
    Success(usize),
    /// 没有读到根元素（零字节、纯空白、只有声明/注释）
    Empty,
    /// 内容损坏；本次调用提取到的违规全部丢弃
    Malformed(String),
}

impl ReportOutcome {
    /// 实际转发的违规数（非 Success 时为 0）
    pub fn forwarded(&self) -> usize {
        match self {
            ReportOutcome::Success(n) => *n,
            _ => 0,
        }
    }
}
