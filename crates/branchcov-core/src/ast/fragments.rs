use std::ops::Range;

use super::{NodeId, NodeKind, SyntaxTree};
use crate::rewriter::{Fragment, Side};

/// Where a node's entry counter goes in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Prefix and suffix around this range
    Wrap(Range<usize>),
    /// A leading statement at this offset. `empty` bodies get an explicit
    /// `nil` so their value is unchanged.
    Lead { offset: usize, empty: bool },
    /// A trailing `;increment;nil` at this offset
    Trail(usize),
}

impl SyntaxTree {
    /// Range of a node's own content. For statement lists this is the span
    /// from the first child to the last, excluding keywords such as `then`
    /// or `else`; an empty list has no content.
    pub fn content_range(&self, id: NodeId) -> Option<Range<usize>> {
        let node = self.node(id);
        match node.kind {
            NodeKind::Root => self.content_range(self.child(id, "main")?),
            NodeKind::Sequence => {
                let first = node.children.first()?;
                let last = node.children.last()?;
                Some(self.node(first.node).range.start..self.node(last.node).range.end)
            }
            _ => Some(node.range.clone()),
        }
    }

    /// Where the entry increment of `id` goes.
    ///
    /// `begin` blocks and method or `do` bodies take a leading statement
    /// rather than parentheses: their `rescue` clauses cannot be
    /// parenthesised, and `begin ... end while` must stay a `begin` to keep
    /// running its body first.
    pub fn entry_anchor(&self, id: NodeId) -> Option<Anchor> {
        let node = self.node(id);
        match node.kind {
            NodeKind::Rescue => match self.child(id, "body").and_then(|b| self.content_range(b)) {
                Some(body) => Some(Anchor::Wrap(body)),
                None => Some(Anchor::Trail(node.range.end)),
            },
            NodeKind::Begin => {
                let first = node
                    .children
                    .iter()
                    .map(|child| child.node)
                    .find(|child| !self.is_begin_clause(*child));
                Some(match first {
                    Some(first) => Anchor::Lead {
                        offset: self.node(first).range.start,
                        empty: false,
                    },
                    None if node.raw_kind == "begin" => {
                        Anchor::Trail(node.range.start + "begin".len())
                    }
                    None => Anchor::Lead {
                        offset: node.range.start,
                        empty: true,
                    },
                })
            }
            NodeKind::Sequence => match self.content_range(id) {
                Some(range) => Some(Anchor::Wrap(range)),
                None => Some(Anchor::Trail(node.range.end)),
            },
            _ => self.content_range(id).map(Anchor::Wrap),
        }
    }

    /// Text insertions for one node, ordered entry prefix, completion
    /// prefix, completion suffix, entry suffix
    pub fn insertion_fragments(&self, id: NodeId) -> Vec<Fragment> {
        let node = self.node(id);
        let mut before = Vec::new();
        let mut after = Vec::new();

        if let Some(tracker) = node.entry_tracker {
            match self.entry_anchor(id) {
                Some(Anchor::Wrap(range)) => {
                    let increment = self.tracker_source(tracker);
                    before.push(Fragment::new(range.start, Side::Before, format!("({increment};")));
                    after.push(Fragment::new(range.end, Side::After, ")"));
                }
                Some(Anchor::Lead { offset, empty }) => {
                    let increment = self.tracker_source(tracker);
                    let text = match empty {
                        true => format!("{increment};nil;"),
                        false => format!("{increment};"),
                    };
                    before.push(Fragment::new(offset, Side::Before, text));
                }
                Some(Anchor::Trail(offset)) => {
                    let increment = self.tracker_source(tracker);
                    after.push(Fragment::new(offset, Side::After, format!(";{increment};nil")));
                }
                None => {}
            }
        }

        if let Some(tracker) = node.fallthrough_tracker {
            // a synthetic `else` just before the closing `end`
            let end = node.range.end.saturating_sub("end".len());
            let increment = self.tracker_source(tracker);
            before.push(Fragment::new(end, Side::Before, format!("else {increment};nil;")));
        }

        if let Some(tracker) = node.completion_tracker {
            let increment = self.tracker_source(tracker);
            before.push(Fragment::new(node.range.start, Side::Before, "[("));
            after.insert(
                0,
                Fragment::new(node.range.end, Side::After, format!("),{increment}][0]")),
            );
        }

        before.extend(after);
        before
    }
}
