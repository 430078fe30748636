//! # Delune
//!
//! Segment storage for statistical text classification.
//!
//! ## Features
//!
//! - Generational segments with a crash-safe registry
//! - Compact posting lists and a term dictionary with CRC-checked indexes
//! - Per-pool term statistics and feature selection (chi2, IG, BNS, ...)
//! - Term x term co-occurrence matrices
//! - Pooled decode buffers shared by concurrent readers

pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod segment;
pub mod selector;
pub mod storage;
pub mod training;
pub mod util;

pub use config::DeluneConfig;
pub use error::{DeluneError, Result};
pub use memory::{MemHandle, MemoryPool};
pub use segment::{
    ComposedSegmentReader, SegmentBuilder, SegmentInfo, SegmentKind, SegmentReader,
    SegmentRegistry,
};
pub use selector::{Aggregation, ScoringConfig, ScoringMethod, Selection, SelectionConfig};
pub use training::{Corpus, SegmentWriter};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
