use tracing::debug;

use super::{NodeKind, SyntaxTree, TreeBuilder};
use crate::{parser::RawNode, registry::UnitId, tracker::TrackerAllocator, CoverConfig, Result};

impl SyntaxTree {
    /// Decorate a raw tree under a synthetic root.
    ///
    /// The root's entry tracker is allocated before any other, so it is
    /// always tracker 0 of the unit.
    pub fn build(
        raw: &RawNode,
        source: &str,
        unit: UnitId,
        config: &CoverConfig,
        allocator: &mut TrackerAllocator,
    ) -> Result<SyntaxTree> {
        let root_tracker = allocator.allocate_one();
        let mut builder = TreeBuilder::new(source, allocator);
        let root = builder.push(NodeKind::Root, "root", raw.range.clone(), None, "root");
        builder.nodes[root.0].entry_tracker = Some(root_tracker);

        let main = builder.decorate(raw, Some(root), "main")?;
        builder.nodes[root.0].children.push(super::Child {
            slot: "main",
            node: main,
        });

        let tree = builder.finish(unit, &config.counter_global);
        debug!(
            "Decorated unit {} with {} nodes and {} trackers",
            unit,
            tree.len(),
            allocator.count()
        );
        Ok(tree)
    }
}
