use indexmap::IndexMap;
use serde::Serialize;

use super::Analyser;
use crate::{
    ast::{NodeId, NodeKind, SyntaxTree},
    tracker::HitSource,
};

/// One way control can take through a conditional construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Branch {
    /// The branch's node, or `None` for an implicit path such as a missing
    /// `else` or a short-circuited operand
    pub node: Option<NodeId>,
    pub runs: u64,
}

impl Branch {
    pub fn taken(&self) -> bool {
        self.runs > 0
    }
}

/// Maps each conditional node to its branches in source order
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchAnalyser;

impl BranchAnalyser {
    fn branches(&self, tree: &SyntaxTree, id: NodeId, hits: &dyn HitSource) -> Option<Vec<Branch>> {
        let explicit = |slot: &str| {
            let node = tree.child(id, slot)?;
            Some(Branch {
                node: Some(node),
                runs: tree.flow_entry_count(node, hits),
            })
        };
        let implicit = |runs: u64| Branch { node: None, runs };

        let branches = match tree.kind(id) {
            NodeKind::If => tree
                .branch_runs(id, hits)
                .into_iter()
                .map(|(node, runs)| Branch { node, runs })
                .collect(),
            NodeKind::IfModifier => {
                let body = explicit("body")?;
                let condition = tree.child(id, "condition")?;
                let skipped = tree
                    .flow_completion_count(condition, hits)
                    .saturating_sub(body.runs);
                vec![body, implicit(skipped)]
            }
            NodeKind::While | NodeKind::WhileModifier => {
                let body = explicit("body")?;
                vec![body, implicit(tree.flow_completion_count(id, hits))]
            }
            NodeKind::And | NodeKind::Or => {
                let left = tree.child(id, "left")?;
                let right = explicit("right")?;
                let short = tree
                    .flow_completion_count(left, hits)
                    .saturating_sub(right.runs);
                vec![right, implicit(short)]
            }
            NodeKind::RescueModifier => {
                let body = tree.child(id, "body")?;
                let handler = explicit("handler")?;
                vec![implicit(tree.flow_completion_count(body, hits)), handler]
            }
            NodeKind::OpAssignment {
                short_circuit: true,
            } => {
                let value = explicit("value")?;
                let kept = tree.flow_entry_count(id, hits).saturating_sub(value.runs);
                vec![value, implicit(kept)]
            }
            NodeKind::Case => {
                let mut branches = Vec::new();
                let mut otherwise = None;
                for clause in tree.children(id) {
                    match tree.kind(clause) {
                        NodeKind::When => branches.push(Branch {
                            node: Some(tree.child(clause, "body").unwrap_or(clause)),
                            runs: tree.when_matches(clause, hits),
                        }),
                        _ if tree.node(clause).slot() == "clauses" => otherwise = Some(clause),
                        _ => {}
                    }
                }
                branches.push(match otherwise {
                    Some(clause) => Branch {
                        node: Some(clause),
                        runs: tree.flow_entry_count(clause, hits),
                    },
                    None => implicit(tree.case_fallthrough(id, hits)),
                });
                branches
            }
            _ => return None,
        };
        Some(branches)
    }
}

impl Analyser for BranchAnalyser {
    type Output = IndexMap<NodeId, Vec<Branch>>;

    fn analyse(&self, tree: &SyntaxTree, hits: &dyn HitSource) -> Self::Output {
        tree.nodes()
            .filter_map(|node| {
                self.branches(tree, node.id(), hits)
                    .map(|branches| (node.id(), branches))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "branch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::RubyParser, registry::UnitId, tracker::TrackerAllocator, CoverConfig};
    use pretty_assertions::assert_eq;

    fn build(source: &str) -> SyntaxTree {
        let raw = RubyParser::new().unwrap().parse_str(source).unwrap();
        let mut allocator = TrackerAllocator::new();
        SyntaxTree::build(&raw, source, UnitId(1), &CoverConfig::default(), &mut allocator).unwrap()
    }

    #[test]
    fn test_if_without_else_reports_implicit_branch() {
        // trackers: root, `a`, then
        let tree = build("if a\n  1\nend\n");
        let hits: Vec<u64> = vec![3, 3, 1];
        let branches = BranchAnalyser.analyse(&tree, &hits);
        assert_eq!(branches.len(), 1);

        let (_, branches) = branches.first().unwrap();
        assert!(branches[0].node.is_some());
        assert_eq!(branches[0].runs, 1);
        assert_eq!(branches[1], Branch { node: None, runs: 2 });
    }

    #[test]
    fn test_short_circuit_is_implicit_branch() {
        // trackers: root, `a`, `b`, right entry
        let tree = build("a || b");
        let hits: Vec<u64> = vec![2, 2, 0, 0];
        let branches = BranchAnalyser.analyse(&tree, &hits);
        let (_, branches) = branches.first().unwrap();
        assert!(!branches[0].taken());
        assert_eq!(branches[1], Branch { node: None, runs: 2 });
    }

    #[test]
    fn test_case_reports_each_when_and_fallthrough() {
        let tree = build("case x
when 1 then :one
when 2, 3 then :few
end
");
        let case = tree
            .nodes()
            .find(|node| node.kind() == NodeKind::Case)
            .unwrap()
            .id();
        let mut trackers: Vec<_> = tree.case_patterns(case);
        trackers.retain(|pattern| tree.node(*pattern).entry_tracker().is_some());
        assert_eq!(trackers.len(), 3);

        // x = 1, 3, 5, 7: patterns entered 4, 3, 3 times; bodies once each
        let mut hits = vec![0u64; tree.nodes().flat_map(|n| n.tracker_ids()).max().unwrap() + 1];
        let entries = [4, 3, 3];
        for (pattern, runs) in tree.case_patterns(case).into_iter().zip(entries) {
            hits[tree.node(pattern).entry_tracker().unwrap()] = runs;
        }
        for when in tree.children(case).filter(|c| tree.kind(*c) == NodeKind::When) {
            let body = tree.child(when, "body").unwrap();
            hits[tree.node(body).entry_tracker().unwrap()] = 1;
        }
        hits[tree.node(case).fallthrough_tracker().unwrap()] = 2;

        let analysed = BranchAnalyser.analyse(&tree, &hits);
        let runs: Vec<u64> = analysed[&case].iter().map(|branch| branch.runs).collect();
        assert_eq!(runs, vec![1, 1, 2]);
        assert_eq!(analysed[&case][2].node, None);
    }

    #[test]
    fn test_straight_line_code_has_no_branches() {
        let tree = build("a = 1\nputs a\n");
        let hits: Vec<u64> = vec![1, 1];
        assert!(BranchAnalyser.analyse(&tree, &hits).is_empty());
    }
}
