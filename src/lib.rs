//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: compact bitset representation for clades (taxon sets).
//! - `tree`: attributed tree model, taxon index, tagged attribute values.
//! - `io`: reading BEAST/NEXUS tree traces, writing annotated trees.
//! - `clades`: clade counts, credibilities and sample collection.
//! - `stats`: mean / median / range helpers.
//! - `hpd`: 1-D HPD intervals and the 2-D contour-service boundary.
//! - `annotate`: per-node statistic dispatch and the height policy.
//! - `heights`: common-ancestor height pass.
//! - `pipeline`: the 2–3 pass summarizer driving all of the above.
//!
//! Public API kept stable by re-exporting key items from the modules.

pub mod annotate;
pub mod bitset;
pub mod clades;
pub mod error;
pub mod heights;
pub mod hpd;
pub mod io;
pub mod pipeline;
pub mod stats;
pub mod tree;

// Re-export frequently used types & functions
pub use annotate::{HeightSummary, NodeAnnotator};
pub use bitset::Bitset;
pub use clades::CladeRegistry;
pub use error::{Result, SummaryError};
pub use io::{read_target_tree, write_annotated_tree, TreeTrace};
pub use pipeline::{PosteriorSummarizer, SummaryOptions, TargetChoice};
pub use tree::{SummaryTree, TaxonIndex, Value};
