//! 拉取式 XML 游标（基于 quick-xml，单遍、只进）
//!
//! 只产出两种结构化 token：元素开始（带已解码属性）与元素结束。
//! 声明、注释、处理指令、DOCTYPE 与元素内文本都会被跳过，
//! 但文本仍会做 UTF-8 / 转义校验，以便发现损坏的尾部数据。
use std::io::{self, BufRead};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// 元素开始标签：名称与属性（已解码、已反转义）
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub(crate) name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 结构化 token
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Start(Element),
    End,
}

/// 游标故障：内容损坏（可恢复）或底层 I/O 故障
#[derive(Debug)]
pub(crate) enum CursorFault {
    Malformed(String),
    Io(io::Error),
}

pub(crate) struct XmlCursor<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// 当前打开的元素层数
    depth: usize,
    root_seen: bool,
    /// 自闭合元素 `<x/>` 拆成 Start + End，这里记录待补的 End
    pending_end: bool,
}

impl<R: BufRead> XmlCursor<R> {
    pub(crate) fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        reader.check_end_names(true);
        Self {
            reader,
            buf: Vec::new(),
            depth: 0,
            root_seen: false,
            pending_end: false,
        }
    }

    /// 读取下一个结构化 token；文档正常结束时返回 `None`
    pub(crate) fn next_token(&mut self) -> Result<Option<Token>, CursorFault> {
        if self.pending_end {
            self.pending_end = false;
            self.depth -= 1;
            return Ok(Some(Token::End));
        }

        loop {
            self.buf.clear();
            let pos = self.reader.buffer_position();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(ev) => ev,
                Err(e) => return Err(fault_from(e, pos)),
            };

            match event {
                Event::Start(start) | Event::Empty(start) if self.depth == 0 && self.root_seen => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    return Err(malformed(pos, format!("unexpected element <{name}> after the root element")));
                }
                Event::Start(start) => {
                    let element = decode_element(&start).map_err(|d| malformed(pos, d))?;
                    self.root_seen = true;
                    self.depth += 1;
                    return Ok(Some(Token::Start(element)));
                }
                Event::Empty(start) => {
                    let element = decode_element(&start).map_err(|d| malformed(pos, d))?;
                    self.root_seen = true;
                    self.depth += 1;
                    self.pending_end = true;
                    return Ok(Some(Token::Start(element)));
                }
                Event::End(_) => {
                    if self.depth == 0 {
                        return Err(malformed(pos, "end tag without matching start tag".to_string()));
                    }
                    self.depth -= 1;
                    return Ok(Some(Token::End));
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| malformed(pos, format!("invalid character data: {e}")))?;
                    check_xml_chars(&text).map_err(|d| malformed(pos, format!("character data: {d}")))?;
                    if self.depth == 0 && !text.trim().is_empty() {
                        return Err(malformed(pos, "character data outside the root element".to_string()));
                    }
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| malformed(pos, format!("invalid CDATA section: {e}")))?;
                    check_xml_chars(text).map_err(|d| malformed(pos, format!("CDATA section: {d}")))?;
                    if self.depth == 0 && !text.trim().is_empty() {
                        return Err(malformed(pos, "CDATA section outside the root element".to_string()));
                    }
                }
                Event::Eof => {
                    if self.depth > 0 {
                        return Err(malformed(
                            pos,
                            format!("unexpected end of document with {} open element(s)", self.depth),
                        ));
                    }
                    return Ok(None);
                }
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            }
        }
    }

    /// 读取当前元素的下一个子元素；读到当前元素的结束标签时返回 `None`
    pub(crate) fn next_child(&mut self) -> Result<Option<Element>, CursorFault> {
        match self.next_token()? {
            Some(Token::Start(element)) => Ok(Some(element)),
            Some(Token::End) | None => Ok(None),
        }
    }

    /// 跳过刚读到的那个元素的剩余部分（含全部子树）
    pub(crate) fn skip_element(&mut self) -> Result<(), CursorFault> {
        let target = self.depth.saturating_sub(1);
        while self.depth > target {
            if self.next_token()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// 根元素关闭后读到文档结尾，确保没有多余内容
    pub(crate) fn finish(&mut self) -> Result<(), CursorFault> {
        while self.next_token()?.is_some() {}
        Ok(())
    }
}

fn malformed(pos: usize, detail: String) -> CursorFault {
    CursorFault::Malformed(format!("{detail} (near byte {pos})"))
}

fn fault_from(err: quick_xml::Error, pos: usize) -> CursorFault {
    match err {
        quick_xml::Error::Io(e) => CursorFault::Io(io::Error::new(e.kind(), e.to_string())),
        other => malformed(pos, other.to_string()),
    }
}

/// XML 1.0 `Char` 产生式：`#x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]`
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\u{9}' | '\u{A}' | '\u{D}' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

/// quick-xml 不校验字符范围，控制字符等需要单独拒绝
fn check_xml_chars(s: &str) -> Result<(), String> {
    match s.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(format!("illegal character U+{:04X}", c as u32)),
        None => Ok(()),
    }
}

fn decode_element(start: &BytesStart<'_>) -> Result<Element, String> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| format!("element name is not valid UTF-8: {e}"))?
        .to_string();
    check_xml_chars(&name).map_err(|d| format!("element name: {d}"))?;

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| format!("invalid attribute in <{name}>: {e}"))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| format!("attribute name in <{name}> is not valid UTF-8: {e}"))?
            .to_string();
        check_xml_chars(&key).map_err(|d| format!("attribute name in <{name}>: {d}"))?;
        let value = attr
            .unescape_value()
            .map_err(|e| format!("invalid value for attribute '{key}' in <{name}>: {e}"))?
            .into_owned();
        check_xml_chars(&value).map_err(|d| format!("value of attribute '{key}' in <{name}>: {d}"))?;
        attributes.push((key, value));
    }

    Ok(Element { name, attributes })
}
