//! Flow counts.
//!
//! Every node answers two questions from the counters of a finished run:
//! how many times control reached it (entry) and how many times control
//! left it normally (completion). Nodes with a tracker read it directly;
//! the rest derive their counts from their parent and siblings.

use super::{NodeId, NodeKind, SyntaxTree};
use crate::tracker::HitSource;

const BRANCH_SLOTS: [&str; 2] = ["consequence", "alternative"];

impl SyntaxTree {
    /// Times control reached `id`
    pub fn flow_entry_count<H: HitSource + ?Sized>(&self, id: NodeId, hits: &H) -> u64 {
        let node = self.node(id);
        if let Some(tracker) = node.entry_tracker {
            return hits.hits(tracker);
        }
        match node.parent {
            Some(parent) => self.child_flow_entry_count(parent, id, hits),
            None => 0,
        }
    }

    /// Times control reached `child`, as seen by its parent
    pub fn child_flow_entry_count<H: HitSource + ?Sized>(
        &self,
        parent: NodeId,
        child: NodeId,
        hits: &H,
    ) -> u64 {
        let slot = self.node(child).slot;
        match self.kind(parent) {
            NodeKind::Root => self.flow_entry_count(parent, hits),
            NodeKind::If => match slot {
                "condition" => self.flow_entry_count(parent, hits),
                _ => self.untracked_branch_entry(parent, child, hits),
            },
            NodeKind::IfModifier => match slot {
                "condition" => self.flow_entry_count(parent, hits),
                _ => self.slot_completion(parent, "condition", hits),
            },
            _ if self.is_do_while(parent) => match slot {
                "condition" => self.slot_completion(parent, "body", hits),
                // the first pass skips the check; later passes follow it
                _ => self.flow_entry_count(parent, hits),
            },
            NodeKind::While | NodeKind::WhileModifier => match slot {
                // loops back from the body every time it completes
                "condition" => {
                    self.flow_entry_count(parent, hits) + self.slot_completion(parent, "body", hits)
                }
                _ => self.slot_completion(parent, "condition", hits),
            },
            // bodies run on call, not on definition
            NodeKind::Def | NodeKind::Block => 0,
            NodeKind::Case => match slot {
                "value" => self.flow_entry_count(parent, hits),
                _ if self.kind(child) == NodeKind::When => match self.child(child, "patterns") {
                    Some(first) => self.flow_entry_count(first, hits),
                    None => 0,
                },
                _ => self.case_fallthrough(parent, hits),
            },
            NodeKind::When => match slot {
                "patterns" => self.pattern_entry(child, hits),
                _ => self.when_matches(parent, hits),
            },
            NodeKind::And | NodeKind::Or => match slot {
                "left" => self.flow_entry_count(parent, hits),
                _ => self.slot_completion(parent, "left", hits),
            },
            NodeKind::RescueModifier => match slot {
                "body" => self.flow_entry_count(parent, hits),
                _ => 0,
            },
            NodeKind::OpAssignment {
                short_circuit: true,
            } => self.flow_entry_count(parent, hits),
            NodeKind::Begin => self.begin_child_entry(parent, child, hits),
            _ => match self.previous_sibling(parent, child) {
                Some(previous) => self.flow_completion_count(previous, hits),
                None => self.flow_entry_count(parent, hits),
            },
        }
    }

    /// Times control left `id` normally
    pub fn flow_completion_count<H: HitSource + ?Sized>(&self, id: NodeId, hits: &H) -> u64 {
        let node = self.node(id);
        if let Some(tracker) = node.completion_tracker {
            return hits.hits(tracker);
        }
        let entry = || self.flow_entry_count(id, hits);
        match node.kind {
            NodeKind::Jump => 0,
            NodeKind::If => self
                .branch_runs(id, hits)
                .into_iter()
                .map(|(branch, runs)| match branch {
                    Some(branch) => self.flow_completion_count(branch, hits),
                    None => runs,
                })
                .sum(),
            NodeKind::IfModifier => match self.child(id, "body") {
                Some(body) => {
                    self.slot_completion(id, "condition", hits)
                        .saturating_sub(self.flow_entry_count(body, hits))
                        + self.flow_completion_count(body, hits)
                }
                None => entry(),
            },
            _ if self.is_do_while(id) => match self.child(id, "body") {
                Some(body) => {
                    let loop_backs = self
                        .flow_entry_count(body, hits)
                        .saturating_sub(entry());
                    self.slot_completion(id, "condition", hits)
                        .saturating_sub(loop_backs)
                }
                None => entry(),
            },
            NodeKind::While | NodeKind::WhileModifier => match self.child(id, "body") {
                Some(body) => self
                    .slot_completion(id, "condition", hits)
                    .saturating_sub(self.flow_entry_count(body, hits)),
                None => entry(),
            },
            NodeKind::And | NodeKind::Or => match self.child(id, "right") {
                Some(right) => {
                    self.slot_completion(id, "left", hits)
                        .saturating_sub(self.flow_entry_count(right, hits))
                        + self.flow_completion_count(right, hits)
                }
                None => entry(),
            },
            NodeKind::RescueModifier => {
                self.slot_completion(id, "body", hits) + self.slot_completion(id, "handler", hits)
            }
            NodeKind::OpAssignment {
                short_circuit: true,
            } => match self.child(id, "value") {
                Some(value) => {
                    entry().saturating_sub(self.flow_entry_count(value, hits))
                        + self.flow_completion_count(value, hits)
                }
                None => entry(),
            },
            NodeKind::Begin => self.begin_completion(id, hits),
            NodeKind::Case => {
                let mut completed = 0;
                let mut has_else = false;
                for clause in self.children(id) {
                    match self.kind(clause) {
                        NodeKind::When => completed += self.flow_completion_count(clause, hits),
                        _ if self.node(clause).slot == "clauses" => {
                            has_else = true;
                            completed += self.flow_completion_count(clause, hits);
                        }
                        _ => {}
                    }
                }
                if !has_else {
                    completed += self.case_fallthrough(id, hits);
                }
                completed
            }
            NodeKind::When => match self.child(id, "body") {
                Some(body) => self.flow_completion_count(body, hits),
                None => self.when_matches(id, hits),
            },
            kind if kind.is_chain() || kind == NodeKind::Root => {
                match node.children.last() {
                    Some(last) => self.flow_completion_count(last.node, hits),
                    None => entry(),
                }
            }
            _ => entry(),
        }
    }

    /// Runs of each branch of an `If`, in `consequence`/`alternative` order.
    ///
    /// A missing branch is reported as `None` with the runs of the implicit
    /// fall-through.
    pub fn branch_runs<H: HitSource + ?Sized>(
        &self,
        id: NodeId,
        hits: &H,
    ) -> Vec<(Option<NodeId>, u64)> {
        BRANCH_SLOTS
            .iter()
            .map(|slot| match self.child(id, slot) {
                Some(branch) => (Some(branch), self.flow_entry_count(branch, hits)),
                None => (None, self.derived_branch_runs(id, None, hits)),
            })
            .collect()
    }

    /// Times a `case` matched no `when`
    pub fn case_fallthrough<H: HitSource + ?Sized>(&self, id: NodeId, hits: &H) -> u64 {
        if let Some(tracker) = self.node(id).fallthrough_tracker {
            return hits.hits(tracker);
        }
        let else_clause = self
            .children(id)
            .find(|clause| self.node(*clause).slot == "clauses" && self.kind(*clause) != NodeKind::When);
        match else_clause.and_then(|clause| self.node(clause).entry_tracker) {
            Some(tracker) => hits.hits(tracker),
            None => 0,
        }
    }

    /// Times a `when` clause matched
    pub fn when_matches<H: HitSource + ?Sized>(&self, id: NodeId, hits: &H) -> u64 {
        if let Some(body) = self.child(id, "body") {
            if let Some(tracker) = self.node(body).entry_tracker {
                return hits.hits(tracker);
            }
        }
        // each pattern matched unless control moved on to the next one
        let Some(case) = self.node(id).parent else {
            return 0;
        };
        let patterns = self.case_patterns(case);
        patterns
            .iter()
            .enumerate()
            .filter(|(_, pattern)| self.node(**pattern).parent == Some(id))
            .map(|(index, pattern)| {
                let moved_on = match patterns.get(index + 1) {
                    Some(next) => self.flow_entry_count(*next, hits),
                    None => self.case_fallthrough(case, hits),
                };
                self.flow_completion_count(*pattern, hits)
                    .saturating_sub(moved_on)
            })
            .sum()
    }

    /// Entry of a pattern without its own tracker: the previous pattern's
    /// completion, which bounds it from above
    fn pattern_entry<H: HitSource + ?Sized>(&self, pattern: NodeId, hits: &H) -> u64 {
        let Some(case) = self.node(pattern).parent.and_then(|when| self.node(when).parent) else {
            return 0;
        };
        let patterns = self.case_patterns(case);
        let previous = patterns
            .iter()
            .position(|p| *p == pattern)
            .and_then(|index| index.checked_sub(1))
            .map(|index| patterns[index]);
        match previous {
            Some(previous) => self.flow_completion_count(previous, hits),
            None => self.slot_completion(case, "value", hits),
        }
    }

    fn untracked_branch_entry<H: HitSource + ?Sized>(
        &self,
        parent: NodeId,
        branch: NodeId,
        hits: &H,
    ) -> u64 {
        self.derived_branch_runs(parent, Some(branch), hits)
    }

    /// Condition completions not claimed by any other tracked branch
    fn derived_branch_runs<H: HitSource + ?Sized>(
        &self,
        id: NodeId,
        branch: Option<NodeId>,
        hits: &H,
    ) -> u64 {
        let claimed: u64 = BRANCH_SLOTS
            .iter()
            .filter_map(|slot| self.child(id, slot))
            .filter(|other| Some(*other) != branch)
            .filter_map(|other| self.node(other).entry_tracker)
            .map(|tracker| hits.hits(tracker))
            .sum();
        self.slot_completion(id, "condition", hits).saturating_sub(claimed)
    }

    fn slot_completion<H: HitSource + ?Sized>(&self, id: NodeId, slot: &str, hits: &H) -> u64 {
        match self.child(id, slot) {
            Some(child) => self.flow_completion_count(child, hits),
            None => self.flow_entry_count(id, hits),
        }
    }

    fn previous_sibling(&self, parent: NodeId, child: NodeId) -> Option<NodeId> {
        let children = &self.node(parent).children;
        let position = children.iter().position(|c| c.node == child)?;
        position.checked_sub(1).map(|index| children[index].node)
    }

    /// Statements of a `begin` block, excluding its clauses
    fn begin_statements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).filter(move |child| !self.is_begin_clause(*child))
    }

    pub(super) fn is_begin_clause(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.kind == NodeKind::Rescue || matches!(node.raw_kind.as_str(), "else" | "ensure")
    }

    fn begin_child_entry<H: HitSource + ?Sized>(
        &self,
        parent: NodeId,
        child: NodeId,
        hits: &H,
    ) -> u64 {
        match self.node(child).raw_kind.as_str() {
            "ensure" => self.flow_entry_count(parent, hits),
            _ => {
                // statements and else chain on the last statement before them
                let previous = self
                    .begin_statements(parent)
                    .take_while(|statement| *statement != child)
                    .last();
                match previous {
                    Some(previous) => self.flow_completion_count(previous, hits),
                    None => self.flow_entry_count(parent, hits),
                }
            }
        }
    }

    fn begin_completion<H: HitSource + ?Sized>(&self, id: NodeId, hits: &H) -> u64 {
        let else_clause = self
            .children(id)
            .find(|child| self.node(*child).raw_kind == "else");
        let main = match else_clause {
            Some(else_clause) => self.flow_completion_count(else_clause, hits),
            None => match self.begin_statements(id).last() {
                Some(last) => self.flow_completion_count(last, hits),
                None => self.flow_entry_count(id, hits),
            },
        };
        let rescued: u64 = self
            .children(id)
            .filter(|child| self.kind(*child) == NodeKind::Rescue)
            .map(|rescue| self.flow_completion_count(rescue, hits))
            .sum();
        main + rescued
    }
}
