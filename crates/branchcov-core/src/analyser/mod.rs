// Post-execution analysers
// Read-only passes over a decorated tree and a unit's counters.

use crate::{ast::SyntaxTree, tracker::HitSource};

mod branch;
mod node;

pub use branch::{Branch, BranchAnalyser};
pub use node::NodeAnalyser;

/// A deterministic judgment derived from a tree and its counters
pub trait Analyser {
    type Output: Default;

    fn analyse(&self, tree: &SyntaxTree, hits: &dyn HitSource) -> Self::Output;

    /// Analyser name for logging
    fn name(&self) -> &'static str;
}
