use tracing::warn;
use tree_sitter::{Node, Parser};

use super::{RawChild, RawNode, SourceParser};
use crate::{buffer::Buffer, CoverError, Result};

/// tree-sitter backed Ruby parser
pub struct RubyParser {
    parser: Parser,
}

impl RubyParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_ruby::LANGUAGE.into())
            .map_err(|e| CoverError::Parser(e.to_string()))?;
        Ok(Self { parser })
    }

    /// Parse plain text, failing on syntax errors. `Ok(None)` means the
    /// source holds no statements.
    pub fn parse_program(&mut self, source: &str) -> Result<Option<RawNode>> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| CoverError::Parser("parser produced no tree".to_string()))?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(CoverError::Parser(format!(
                "syntax error near byte {}",
                first_error(root).unwrap_or(root).start_byte()
            )));
        }
        let raw = convert(root);
        if raw.children.is_empty() {
            return Ok(None);
        }
        Ok(Some(raw))
    }

    /// Parse plain text, degrading syntax errors to no tree
    pub fn parse_str(&mut self, source: &str) -> Option<RawNode> {
        match self.parse_program(source) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{}, no tree produced", e);
                None
            }
        }
    }
}

impl SourceParser for RubyParser {
    fn parse(&mut self, buffer: &Buffer) -> Result<Option<RawNode>> {
        Ok(self.parse_str(buffer.source()))
    }

    fn name(&self) -> &'static str {
        "tree-sitter-ruby"
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error)
}

fn convert(node: Node<'_>) -> RawNode {
    let mut raw = RawNode::new(node.kind(), node.byte_range());
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() && !child.is_extra() {
                raw.children.push(RawChild {
                    field: cursor.field_name(),
                    node: convert(child),
                });
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    raw
}
