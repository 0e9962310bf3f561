use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by compilation units and the decorated tree
#[derive(Error, Debug)]
pub enum CoverError {
    #[error("Invalid unit input: {reason}")]
    InvalidUnitInput { reason: &'static str },

    #[error("Child type mismatch in {kind} at slot '{slot}': {detail}")]
    ChildTypeMismatch {
        kind: String,
        slot: String,
        detail: String,
    },

    #[error("Coverage not available: unit was not executed")]
    NotExecuted,

    #[error("Tracker {tracker} out of range (unit has {count} trackers)")]
    TrackerOutOfRange { tracker: usize, count: usize },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parser error: {0}")]
    Parser(String),

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl CoverError {
    /// Create a child type mismatch for a node kind and slot
    pub fn child_mismatch(kind: &str, slot: &str, detail: impl Into<String>) -> Self {
        Self::ChildTypeMismatch {
            kind: kind.to_string(),
            slot: slot.to_string(),
            detail: detail.into(),
        }
    }
}
