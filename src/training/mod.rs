//! Training: corpus scans, per-term class statistics and training segments.

pub mod class_info;
pub mod corpus;
pub mod writer;

pub use class_info::{FeatureClassInfo, TermClassInfo};
pub use corpus::{Corpus, Pool};
pub use writer::SegmentWriter;
