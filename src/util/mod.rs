//! Utility modules for Delune.

pub mod varint;

pub use varint::*;
