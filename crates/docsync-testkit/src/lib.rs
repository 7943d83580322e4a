//! Test utilities for docsync.
//!
//! In-memory implementations of the backend traits with fault injection,
//! plus record fixtures.

mod fixtures;
mod memory;

pub use fixtures::{student, student_at};
pub use memory::{
    MemoryIndex, MemoryLock, MemoryObjectStore, MemoryWatermarkStore, SIMULATED_NETWORK_ERROR,
};
