// Parser boundary - the coverage engine only consumes the raw tree contract
use std::ops::Range;

use crate::{buffer::Buffer, Result};

pub mod ruby;

#[cfg(test)]
mod tests;

pub use ruby::RubyParser;

/// One node of the external parser's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    /// Grammar kind, e.g. `if`, `binary`, `call`
    pub kind: String,
    /// Byte range in the parsed source
    pub range: Range<usize>,
    /// Named syntax children in source order
    pub children: Vec<RawChild>,
}

/// A raw child together with the grammar field it occupies, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChild {
    pub field: Option<&'static str>,
    pub node: RawNode,
}

impl RawNode {
    pub fn new(kind: impl Into<String>, range: Range<usize>) -> Self {
        Self {
            kind: kind.into(),
            range,
            children: Vec::new(),
        }
    }

    /// Append a child in an optional field (builder style, used by tests and adapters)
    pub fn with_child(mut self, field: Option<&'static str>, node: RawNode) -> Self {
        self.children.push(RawChild { field, node });
        self
    }

    pub fn field(&self, name: &str) -> Option<&RawNode> {
        self.children
            .iter()
            .find(|child| child.field == Some(name))
            .map(|child| &child.node)
    }

    pub fn unnamed_children(&self) -> impl Iterator<Item = &RawNode> {
        self.children
            .iter()
            .filter(|child| child.field.is_none())
            .map(|child| &child.node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RawNode> {
        self.children.iter().map(|child| &child.node)
    }

    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.range.clone()).unwrap_or("")
    }

    /// Source text between two children, trimmed; this is where anonymous
    /// operator tokens such as `&&` or `+=` live
    pub fn operator_between<'s>(&self, source: &'s str, left: &RawNode, right: &RawNode) -> &'s str {
        source
            .get(left.range.end..right.range.start)
            .unwrap_or("")
            .trim()
    }
}

/// Trait for parsers producing raw trees for the coverage engine
pub trait SourceParser: Send {
    /// Parse a buffer; `Ok(None)` means the source produced no usable tree
    /// (empty input or a syntax error)
    fn parse(&mut self, buffer: &Buffer) -> Result<Option<RawNode>>;

    /// Get parser name for debugging
    fn name(&self) -> &'static str;
}
