// Decorated syntax tree
// Wraps the parser's raw tree with per-kind coverage behaviour: child
// schemas, tracker placement, flow counts and insertion fragments.

use std::{collections::HashSet, ops::Range};

use serde::Serialize;

use crate::{
    parser::RawNode,
    registry::UnitId,
    tracker::{TrackerAllocator, TrackerId},
    Result,
};

mod flow;
mod fragments;
mod kind;
mod root;
pub mod schema;

#[cfg(test)]
mod tests;

pub use fragments::Anchor;
pub use kind::NodeKind;

/// Index of a node inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

/// A decorated child together with the schema slot it fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    pub slot: &'static str,
    pub node: NodeId,
}

/// One decorated node. Parent links are indices, never owning references.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    id: NodeId,
    kind: NodeKind,
    raw_kind: String,
    range: Range<usize>,
    parent: Option<NodeId>,
    slot: &'static str,
    children: Vec<Child>,
    entry_tracker: Option<TrackerId>,
    completion_tracker: Option<TrackerId>,
    /// `case` without `else`: counts the times no `when` matched
    fallthrough_tracker: Option<TrackerId>,
}

impl SyntaxNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Grammar kind reported by the parser (`"root"` for the wrapper)
    pub fn raw_kind(&self) -> &str {
        &self.raw_kind
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Slot this node fills in its parent's schema
    pub fn slot(&self) -> &'static str {
        self.slot
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn entry_tracker(&self) -> Option<TrackerId> {
        self.entry_tracker
    }

    pub fn completion_tracker(&self) -> Option<TrackerId> {
        self.completion_tracker
    }

    pub fn fallthrough_tracker(&self) -> Option<TrackerId> {
        self.fallthrough_tracker
    }

    pub fn tracker_ids(&self) -> Vec<TrackerId> {
        self.entry_tracker
            .into_iter()
            .chain(self.completion_tracker)
            .chain(self.fallthrough_tracker)
            .collect()
    }
}

/// Arena of decorated nodes for one compilation unit.
///
/// Nodes are stored in pre-order, so iterating `nodes()` visits parents
/// before children and siblings left to right.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    unit: UnitId,
    counter_prefix: String,
}

impl SyntaxTree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The wrapped top-level node
    pub fn main(&self) -> NodeId {
        self.child(self.root(), "main").unwrap_or(self.root())
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id).children.iter().map(|child| child.node)
    }

    /// First child in the named slot
    pub fn child(&self, id: NodeId, slot: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .find(|child| child.slot == slot)
            .map(|child| child.node)
    }

    pub fn tracker_ids(&self, id: NodeId) -> Vec<TrackerId> {
        self.node(id).tracker_ids()
    }

    /// Counter increment for a tracker, with unit and tracker resolved now
    pub fn tracker_source(&self, tracker: TrackerId) -> String {
        format!("{}[{}]+=1", self.counter_prefix, tracker)
    }

    /// `begin ... end while cond` runs its body before the first check
    pub fn is_do_while(&self, id: NodeId) -> bool {
        self.kind(id) == NodeKind::WhileModifier
            && self
                .child(id, "body")
                .is_some_and(|body| self.node(body).raw_kind == "begin")
    }

    /// `pattern` nodes of every `when` clause of a `case`, in evaluation order
    pub fn case_patterns(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .filter(|clause| self.kind(*clause) == NodeKind::When)
            .flat_map(|when| {
                self.node(when)
                    .children
                    .iter()
                    .filter(|child| child.slot == "patterns")
                    .map(|child| child.node)
            })
            .collect()
    }

    /// True when reaching-but-not-running this node skipped real work
    pub fn is_executable(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.kind.is_executable()
            || (node.kind == NodeKind::Interpolated
                && self
                    .children(id)
                    .any(|child| self.kind(child) == NodeKind::Interpolation))
    }
}

/// Builds a decorated tree, allocating trackers as nodes ask for them
pub(crate) struct TreeBuilder<'a> {
    source: &'a str,
    allocator: &'a mut TrackerAllocator,
    nodes: Vec<SyntaxNode>,
    locals: HashSet<String>,
}

impl<'a> TreeBuilder<'a> {
    pub(crate) fn new(source: &'a str, allocator: &'a mut TrackerAllocator) -> Self {
        Self {
            source,
            allocator,
            nodes: Vec::new(),
            locals: HashSet::new(),
        }
    }

    fn push(
        &mut self,
        kind: NodeKind,
        raw_kind: &str,
        range: Range<usize>,
        parent: Option<NodeId>,
        slot: &'static str,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SyntaxNode {
            id,
            kind,
            raw_kind: raw_kind.to_string(),
            range,
            parent,
            slot,
            children: Vec::new(),
            entry_tracker: None,
            completion_tracker: None,
            fallthrough_tracker: None,
        });
        id
    }

    pub(crate) fn decorate(
        &mut self,
        raw: &RawNode,
        parent: Option<NodeId>,
        slot: &'static str,
    ) -> Result<NodeId> {
        let kind = NodeKind::classify(raw, self.source, &self.locals);
        let assigned = schema::assign(kind, raw, schema::schema_for_raw(kind, raw))?;
        let id = self.push(kind, &raw.kind, raw.range.clone(), parent, slot);
        // method bodies see only their own parameters
        let outer_locals = match kind {
            NodeKind::Def => Some(std::mem::take(&mut self.locals)),
            _ => None,
        };

        for (child_slot, child) in assigned {
            if !child_slot.decorates() {
                let mut names = Vec::new();
                match child_slot.name {
                    "target" => kind::bound_names(child, self.source, &mut names),
                    "parameters" => kind::parameter_names(child, self.source, &mut names),
                    _ => {}
                }
                self.locals.extend(names);
                continue;
            }
            let child_id = self.decorate(child, Some(id), child_slot.name)?;
            self.nodes[id.0].children.push(Child {
                slot: child_slot.name,
                node: child_id,
            });
        }

        if let Some(outer_locals) = outer_locals {
            self.locals = outer_locals;
        }
        self.allocate_trackers(id);
        Ok(id)
    }

    fn has_content(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        !node.kind.is_sequence() || !node.children.is_empty()
    }

    fn child(&self, id: NodeId, slot: &str) -> Option<NodeId> {
        self.nodes[id.0]
            .children
            .iter()
            .find(|child| child.slot == slot)
            .map(|child| child.node)
    }

    fn track_entry(&mut self, id: NodeId) {
        if self.has_content(id) {
            self.nodes[id.0].entry_tracker = Some(self.allocator.allocate_one());
        }
    }

    fn allocate_trackers(&mut self, id: NodeId) {
        let kind = self.nodes[id.0].kind;
        if kind.tracks_completion() {
            self.nodes[id.0].completion_tracker = Some(self.allocator.allocate_one());
        }
        match kind {
            NodeKind::And | NodeKind::Or => {
                if let Some(right) = self.child(id, "right") {
                    self.track_entry(right);
                }
            }
            NodeKind::If => {
                for slot in ["consequence", "alternative"] {
                    // elsif chains are derived from their parent's condition
                    if let Some(branch) = self.child(id, slot) {
                        if self.nodes[branch.0].kind != NodeKind::If {
                            self.track_entry(branch);
                        }
                    }
                }
            }
            NodeKind::IfModifier | NodeKind::While | NodeKind::WhileModifier => {
                if let Some(body) = self.child(id, "body") {
                    self.track_entry(body);
                }
            }
            NodeKind::RescueModifier => {
                if let Some(handler) = self.child(id, "handler") {
                    self.track_entry(handler);
                }
            }
            NodeKind::OpAssignment {
                short_circuit: true,
            } => {
                if let Some(value) = self.child(id, "value") {
                    self.track_entry(value);
                }
            }
            NodeKind::Rescue => {
                self.nodes[id.0].entry_tracker = Some(self.allocator.allocate_one());
            }
            NodeKind::Def | NodeKind::Block => {
                // a lambda's body is a block that tracks its own body
                if let Some(body) = self.child(id, "body") {
                    if self.nodes[body.0].kind != NodeKind::Block {
                        self.track_entry(body);
                    }
                }
            }
            NodeKind::Case => self.allocate_case_trackers(id),
            _ => {}
        }
    }

    /// Every pattern, every non-empty `when` body and the `else` path each
    /// get an entry tracker; a missing `else` gets a fallthrough tracker
    fn allocate_case_trackers(&mut self, id: NodeId) {
        let clauses: Vec<NodeId> = self.nodes[id.0].children.iter().map(|c| c.node).collect();
        let mut has_else = false;
        for clause in clauses {
            if self.nodes[clause.0].kind == NodeKind::When {
                let children = self.nodes[clause.0].children.clone();
                for child in children {
                    match child.slot {
                        "patterns" if self.is_plain_pattern(child.node) => {
                            self.track_entry(child.node)
                        }
                        "body" => self.track_entry(child.node),
                        _ => {}
                    }
                }
            } else if self.nodes[clause.0].raw_kind == "else" {
                has_else = true;
                // an empty else still gets a trailer
                self.nodes[clause.0].entry_tracker = Some(self.allocator.allocate_one());
            }
        }
        if !has_else {
            self.nodes[id.0].fallthrough_tracker = Some(self.allocator.allocate_one());
        }
    }

    /// `when *list` cannot be parenthesised
    fn is_plain_pattern(&self, id: NodeId) -> bool {
        self.nodes[id.0]
            .children
            .iter()
            .all(|child| self.nodes[child.node.0].kind != NodeKind::Splat)
    }

    pub(crate) fn finish(self, unit: UnitId, counter_global: &str) -> SyntaxTree {
        SyntaxTree {
            nodes: self.nodes,
            unit,
            counter_prefix: format!("{counter_global}[{unit}]"),
        }
    }
}
