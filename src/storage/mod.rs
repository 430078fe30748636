//! Storage abstraction layer for Delune.
//!
//! Segments address their companion files by name through the [`Storage`]
//! trait; [`FileStorage`] keeps them in a directory and [`MemoryStorage`]
//! keeps them in memory for tests.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::*;
pub use memory::*;
pub use structured::*;
pub use traits::*;
