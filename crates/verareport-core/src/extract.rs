//! 报告遍历与条目提取（内部使用）
//!
//! 报告结构只有两层：根元素下若干 `<file name=..>`，每个 file 下若干
//! `<error line=.. message=.. source=..>`。其它元素连同子树一并跳过。
use std::io::{self, BufRead};

use tracing::trace;

use crate::cursor::{CursorFault, Element, Token, XmlCursor};
use crate::types::Violation;

const FILE_ELEMENT: &str = "file";
const ERROR_ELEMENT: &str = "error";

/// 检查器用来上报自身错误的伪文件名；这类条目只作诊断，不产生违规
pub(crate) const SUPPRESSED_FILE_NAME: &str = "error";

/// 单个 `<error>` 元素的原始取值（不做任何校验与类型转换）
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEntry {
    pub(crate) file_name: String,
    pub(crate) line: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) source_rule: Option<String>,
}

impl From<RawEntry> for Violation {
    fn from(e: RawEntry) -> Self {
        Violation {
            file_name: e.file_name,
            line: e.line,
            rule_id: e.source_rule,
            message: e.message,
        }
    }
}

/// 遍历结束时的结构状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum ScanStatus {
    #[default]
    Complete,
    Empty,
    Malformed(String),
}

/// 单份报告一次遍历的结果
#[derive(Debug, Default)]
pub(crate) struct ReportScan {
    /// 待转发的条目（文档顺序）；状态为 Malformed 时恒为空
    pub(crate) entries: Vec<RawEntry>,
    /// 被屏蔽规则拦下、只用于诊断的条目（文档顺序）
    pub(crate) suppressed: Vec<RawEntry>,
    pub(crate) status: ScanStatus,
}

/// 单遍流式读取一份报告。
///
/// 内容损坏时停止遍历并丢弃已提取的条目；只有底层 I/O 故障返回 `Err`。
/// `source` 在返回前被释放。
pub(crate) fn scan_report<R: BufRead>(source: R) -> io::Result<ReportScan> {
    let mut cursor = XmlCursor::new(source);
    let mut scan = ReportScan::default();

    match walk_report(&mut cursor, &mut scan) {
        Ok(status) => scan.status = status,
        Err(CursorFault::Malformed(detail)) => {
            scan.entries.clear();
            scan.status = ScanStatus::Malformed(detail);
        }
        Err(CursorFault::Io(e)) => return Err(e),
    }

    Ok(scan)
}

fn walk_report<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    scan: &mut ReportScan,
) -> Result<ScanStatus, CursorFault> {
    let root = match cursor.next_token()? {
        None => return Ok(ScanStatus::Empty),
        Some(Token::Start(el)) => el,
        // next_token 在深度为 0 时不会产出 End
        Some(Token::End) => return Err(CursorFault::Malformed("end tag before the root element".into())),
    };
    trace!(root = %root.name, "report root element");

    while let Some(child) = cursor.next_child()? {
        if child.name == FILE_ELEMENT {
            extract_file(cursor, &child, scan)?;
        } else {
            cursor.skip_element()?;
        }
    }

    cursor.finish()?;
    Ok(ScanStatus::Complete)
}

/// 提取一个 `<file>` 元素下的全部 `<error>` 子元素；游标停在该 file 的结束标签之后
fn extract_file<R: BufRead>(
    cursor: &mut XmlCursor<R>,
    file: &Element,
    scan: &mut ReportScan,
) -> Result<(), CursorFault> {
    let name = file.attr("name").unwrap_or_default();
    let suppressed = name == SUPPRESSED_FILE_NAME;

    while let Some(child) = cursor.next_child()? {
        if child.name == ERROR_ELEMENT {
            let entry = RawEntry {
                file_name: name.to_string(),
                line: child.attr("line").map(str::to_owned),
                message: child.attr("message").map(str::to_owned),
                source_rule: child.attr("source").map(str::to_owned),
            };
            if suppressed {
                scan.suppressed.push(entry);
            } else {
                scan.entries.push(entry);
            }
        }
        cursor.skip_element()?;
    }

    Ok(())
}
