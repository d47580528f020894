//! Error type shared across the summarization pipeline.
//!
//! Degenerate numerics (empty samples, infinite candidate scores,
//! single-sample HPD windows) are handled as sentinel values where they
//! arise. The variants here are the genuinely fatal conditions.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SummaryError>;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tree {index}: {reason}")]
    Parse { index: usize, reason: String },

    /// Burn-in left nothing to summarize, or the trace was empty.
    #[error("no trees to summarize")]
    NoTrees,

    /// A target-tree node's clade has no registry entry. The target tree
    /// must be drawn from, or share taxa with, the summarized posterior.
    #[error("clade {0} has no registry entry; was the target tree drawn from this posterior?")]
    MissingClade(String),

    /// A tracked attribute was absent on a node being summarized. Every
    /// consumer of the collected samples assumes uniform coverage, so no
    /// default is substituted.
    #[error("attribute '{0}' is missing on a node being summarized")]
    MissingAttribute(String),

    /// The two streaming passes saw inconsistent trees.
    #[error("clade count {count} exceeds trees used {trees}: streaming passes saw different trees")]
    InconsistentCount { count: usize, trees: usize },

    #[error("unknown taxon '{0}'")]
    UnknownTaxon(String),
}
