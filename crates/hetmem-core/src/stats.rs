//! Per-engine counters.
//!
//! Both engines are single-mutator, so the counters are plain integers
//! rather than atomics. Snapshots serialize with `serde` so callers can
//! dump them next to their own diagnostics.

use serde::Serialize;

/// Counters kept by [`ArenaAllocator`](crate::ArenaAllocator).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Allocations served.
    pub total_allocs: u64,
    /// Deallocations accepted.
    pub total_frees: u64,
    /// Deallocations rejected because the pointer was unknown.
    pub rejected_frees: u64,
    /// Allocations refused with out-of-memory.
    pub failed_allocs: u64,
    /// Superblocks acquired from the upstream.
    pub superblocks_acquired: u64,
    /// Adjacent free blocks merged on release.
    pub coalesces: u64,
    /// Bytes currently handed out (rounded sizes).
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes_in_use: usize,
}

/// Counters kept by [`BinaryPageAllocator`](crate::BinaryPageAllocator).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BinaryPageStats {
    /// Allocations served.
    pub total_allocs: u64,
    /// Deallocations accepted.
    pub total_frees: u64,
    /// Allocations refused with out-of-memory.
    pub failed_allocs: u64,
    /// Superpages acquired from the upstream.
    pub superpages_acquired: u64,
    /// Page splits performed while narrowing to a goal size.
    pub splits: u64,
    /// Deferred unsplits performed when reclaiming a split page.
    pub unsplits: u64,
}
