use indexmap::IndexMap;

use super::Analyser;
use crate::{
    ast::{NodeId, SyntaxTree},
    tracker::HitSource,
};

/// Maps every node to the number of times control reached it
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeAnalyser;

impl Analyser for NodeAnalyser {
    type Output = IndexMap<NodeId, u64>;

    fn analyse(&self, tree: &SyntaxTree, hits: &dyn HitSource) -> Self::Output {
        tree.nodes()
            .map(|node| (node.id(), tree.flow_entry_count(node.id(), hits)))
            .collect()
    }

    fn name(&self) -> &'static str {
        "node"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::RubyParser, registry::UnitId, tracker::TrackerAllocator, CoverConfig};

    #[test]
    fn test_runs_follow_preorder() {
        let source = "a = 1\nraise\n";
        let raw = RubyParser::new().unwrap().parse_str(source).unwrap();
        let mut allocator = TrackerAllocator::new();
        let tree =
            SyntaxTree::build(&raw, source, UnitId(1), &CoverConfig::default(), &mut allocator)
                .unwrap();

        // `raise` was reached but never completed
        let runs = NodeAnalyser.analyse(&tree, &vec![1u64, 0]);
        let ids: Vec<_> = runs.keys().map(|id| id.0).collect();
        assert_eq!(ids, (0..tree.len()).collect::<Vec<_>>());
        assert!(runs.values().all(|runs| *runs == 1));
    }
}
