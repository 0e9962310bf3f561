// Source rewriting
// Collects text insertions keyed by byte offset and applies them in a single
// left-to-right pass. At a shared offset, closing text (`After`) from nodes
// that end there precedes opening text (`Before`) from nodes that start there.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::ast::SyntaxTree;

/// Which side of an offset a fragment attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Opens something starting at the offset
    Before,
    /// Closes something ending at the offset
    After,
}

/// One text insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub side: Side,
    pub text: String,
}

impl Fragment {
    pub fn new(offset: usize, side: Side, text: impl Into<String>) -> Self {
        Self {
            offset,
            side,
            text: text.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Insertions {
    after: Vec<String>,
    before: Vec<String>,
}

/// Accumulates fragments against an immutable source
#[derive(Debug)]
pub struct Rewriter<'s> {
    source: &'s str,
    insertions: BTreeMap<usize, Insertions>,
    count: usize,
}

impl<'s> Rewriter<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            insertions: BTreeMap::new(),
            count: 0,
        }
    }

    /// Queue a fragment; fragments on the same side of an offset keep
    /// insertion order
    pub fn insert(&mut self, fragment: Fragment) {
        let slot = self.insertions.entry(fragment.offset).or_default();
        match fragment.side {
            Side::Before => slot.before.push(fragment.text),
            Side::After => slot.after.push(fragment.text),
        }
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Apply every insertion. Returns `None` if an offset does not fall on a
    /// character boundary of the source.
    pub fn process(self) -> Option<String> {
        let extra: usize = self
            .insertions
            .values()
            .flat_map(|ins| ins.after.iter().chain(&ins.before))
            .map(String::len)
            .sum();
        let mut out = String::with_capacity(self.source.len() + extra);
        let mut cursor = 0;

        for (offset, insertions) in self.insertions {
            out.push_str(self.source.get(cursor..offset)?);
            for text in insertions.after.iter().chain(&insertions.before) {
                out.push_str(text);
            }
            cursor = offset;
        }
        out.push_str(self.source.get(cursor..)?);
        Some(out)
    }
}

/// Rewrite `source` with the counters of every node in `tree`.
///
/// Nodes contribute their opening fragments on the way down and their
/// closing fragments on the way back up, so nested wraps close inside out.
pub fn instrument(tree: &SyntaxTree, source: &str) -> String {
    enum Visit {
        Enter(crate::ast::NodeId),
        Exit(Vec<Fragment>),
    }

    let mut rewriter = Rewriter::new(source);
    let mut stack = vec![Visit::Enter(tree.root())];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id) => {
                let (before, after): (Vec<_>, Vec<_>) = tree
                    .insertion_fragments(id)
                    .into_iter()
                    .partition(|fragment| fragment.side == Side::Before);
                for fragment in before {
                    rewriter.insert(fragment);
                }
                stack.push(Visit::Exit(after));
                let children: Vec<_> = tree.children(id).collect();
                stack.extend(children.into_iter().rev().map(Visit::Enter));
            }
            Visit::Exit(after) => {
                for fragment in after {
                    rewriter.insert(fragment);
                }
            }
        }
    }

    debug!("Applying {} fragments to unit {}", rewriter.len(), tree.unit());
    match rewriter.process() {
        Some(rewritten) => rewritten,
        None => {
            warn!("Unit {} has fragments outside its source", tree.unit());
            String::new()
        }
    }
}
