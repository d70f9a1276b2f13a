//! `analyzer` crate — post-run analysis of an execution record against the
//! estimate computed when the workflow was planned.

pub mod analysis;
pub mod findings;

pub use analysis::{analyze, Analysis};
pub use findings::{Category, Insight, Recommendation, Severity};
