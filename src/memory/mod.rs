//! Scratch memory shared by readers and writers.

pub mod pool;

pub use pool::{MemHandle, MemoryPool};
