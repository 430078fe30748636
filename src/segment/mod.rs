//! Segment generations: on-disk layout, readers, caches and the registry.

pub mod builder;
pub mod cache;
pub mod composed;
pub mod cooccurrence;
pub mod intersect;
pub mod reader;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod segment;

pub use builder::SegmentBuilder;
pub use cache::{CacheStats, ValueCache};
pub use composed::{ComposedCacheStats, ComposedSegmentReader};
pub use cooccurrence::{CoOccurrenceReader, CoOccurrenceWriter};
pub use intersect::{Overlap, intersect, intersect_count, intersect_saved};
pub use reader::SegmentReader;
pub use registry::{
    REGISTRY_FILE, SegmentInfo, SegmentKind, SegmentRegistry, discard_generation,
    segment_file_name,
};
pub use segment::{CORPUS_RECORD, DOC_LENGTH_RECORD, RESERVED_FDNO, Segment, SegmentMode};
