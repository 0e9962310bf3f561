//! # Branchcov Core
//!
//! Branch-level coverage for Ruby source, including:
//! - A decorated syntax tree describing the control flow of every construct
//! - Tracker allocation and source rewriting with counter increments
//! - Compilation units that own the parse -> instrument -> execute -> analyze
//!   pipeline
//! - Line and branch analysers over post-execution counters
//! - A reference evaluator able to run instrumented Ruby subsets
//!
//! Parsing is delegated to tree-sitter; the execution facility is anything
//! implementing [`Executor`].

#![warn(clippy::all)]

pub mod analyser;
pub mod ast;
pub mod buffer;
pub mod errors;
pub mod evaluator;
pub mod parser;
pub mod registry;
pub mod rewriter;
pub mod tracker;
pub mod unit;

// Re-export commonly used types
pub use analyser::{Analyser, Branch, BranchAnalyser, NodeAnalyser};
pub use ast::{NodeId, NodeKind, SyntaxNode, SyntaxTree};
pub use buffer::Buffer;
pub use errors::CoverError;
pub use evaluator::{Evaluator, Value};
pub use parser::{RawChild, RawNode, RubyParser, SourceParser};
pub use registry::{CounterArray, CounterRegistry, UnitId};
pub use rewriter::{Fragment, Rewriter, Side};
pub use tracker::{HitSource, TrackerAllocator, TrackerId};
pub use unit::{CoverageReport, CoveredCode, CoveredCodeBuilder, ExecutionRequest, Executor, UnitState};

/// Branchcov version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for branchcov components
pub fn init_tracing(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_filter(debug))
        .try_init();
}

/// Filter from the environment plus branchcov's own level
pub fn tracing_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let level = if debug { "debug" } else { "info" };
    match format!("branchcov_core={level}").parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Coverage configuration shared by every unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverConfig {
    /// Global variable holding the counter table in instrumented code
    pub counter_global: String,
    /// Unit name used when a unit is built from literal text
    pub default_name: String,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            counter_global: "$_cov".to_string(),
            default_name: "<raw_code>".to_string(),
        }
    }
}

/// Result type for branchcov core operations
pub type Result<T> = std::result::Result<T, CoverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_raises_branchcov_level() {
        assert!(tracing_filter(true).to_string().contains("branchcov_core=debug"));
        assert!(tracing_filter(false).to_string().contains("branchcov_core=info"));
    }
}
