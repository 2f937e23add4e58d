//! Failure taxonomy for upstream resources and allocation engines.
//!
//! Running out of memory is the only recoverable failure in the core:
//! it is surfaced as an `Err` and leaves the engine unchanged. Freeing a
//! pointer the arena does not know is reported through the boolean result
//! of [`ArenaAllocator::deallocate`](crate::ArenaAllocator::deallocate);
//! illegal page-state transitions are programming errors and are caught
//! by debug assertions.

use thiserror::Error;

/// Error returned by [`MemoryResource`](crate::MemoryResource)
/// implementations and by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The upstream refused the request, or the engine's capacity limit
    /// would be exceeded.
    #[error("out of memory: {requested} bytes (alignment {alignment}) refused")]
    OutOfMemory {
        /// Size of the refused request in bytes.
        requested: usize,
        /// Alignment of the refused request in bytes.
        alignment: usize,
    },
}
