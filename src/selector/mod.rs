//! Feature selection: scoring methods, the per-pass scorer and top-N
//! selection over a pruned vocabulary.

pub mod method;
pub mod scorer;
pub mod selection;

pub use method::{Aggregation, Contingency, ScoringConfig, ScoringMethod};
pub use scorer::{FeatureScorer, PoolStats};
pub use selection::{Selection, SelectionConfig, select_top};
