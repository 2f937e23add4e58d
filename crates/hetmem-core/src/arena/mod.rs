//! Coalescing free-list arena.
//!
//! The arena amortizes expensive upstream acquisitions by pulling in
//! large superblocks and carving many small, 256-byte-aligned requests
//! out of them. Freed blocks go back into an address-ordered set and are
//! merged with adjacent neighbors immediately, so free space stays
//! maximally coalesced. Growth is geometric: each upstream expansion
//! doubles the superblock quantum, bounded by the remaining capacity.

use std::collections::BTreeSet;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::resource::MemoryResource;
use crate::stats::ArenaStats;

mod block;

pub use block::Block;

/// Alignment of every pointer the arena hands out, and of every
/// superblock it requests from the upstream.
pub const ALLOC_ALIGNMENT: usize = 256;

/// Smallest superblock the arena will request.
pub const MIN_SUPERBLOCK_SIZE: usize = 1 << 18;

/// Headroom kept unallocated when no explicit capacity is configured,
/// so peer subsystems of a bounded upstream are not starved.
pub const RESERVED_SIZE: usize = 1 << 26;

/// Rounds `value` up to the next multiple of [`ALLOC_ALIGNMENT`].
fn align_up(value: usize) -> usize {
    (value + ALLOC_ALIGNMENT - 1) & !(ALLOC_ALIGNMENT - 1)
}

/// Rounds `value` down to a multiple of [`ALLOC_ALIGNMENT`].
#[allow(dead_code)]
fn align_down(value: usize) -> usize {
    value & !(ALLOC_ALIGNMENT - 1)
}

/// Construction knobs for [`ArenaAllocator`].
///
/// `None` means "use the default": start at [`MIN_SUPERBLOCK_SIZE`] and
/// grow without an explicit cap (the [`RESERVED_SIZE`] margin still
/// applies to the unbounded default).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// First superblock quantum in bytes. Clamped up to
    /// [`MIN_SUPERBLOCK_SIZE`].
    pub initial_size: Option<usize>,
    /// Hard cap on total bytes ever acquired from the upstream. Honored
    /// verbatim when set.
    pub maximum_size: Option<usize>,
}

/// General-purpose allocator over an upstream byte source.
///
/// Single-mutator: the arena performs no internal synchronization. The
/// upstream is borrowed for the arena's lifetime and gets every acquired
/// superblock back, with its original size and alignment, on drop.
pub struct ArenaAllocator<U: MemoryResource> {
    upstream: U,
    superblock_size: usize,
    capacity: usize,
    current_size: usize,
    free_blocks: BTreeSet<Block>,
    allocated_blocks: BTreeSet<Block>,
    superblocks: Vec<Block>,
    stats: ArenaStats,
}

impl<U: MemoryResource> ArenaAllocator<U> {
    /// Creates an arena with default configuration.
    pub fn new(upstream: U) -> Self {
        Self::with_config(ArenaConfig::default(), upstream)
    }

    /// Creates an arena with explicit configuration.
    pub fn with_config(config: ArenaConfig, upstream: U) -> Self {
        let initial = config
            .initial_size
            .unwrap_or(MIN_SUPERBLOCK_SIZE)
            .max(MIN_SUPERBLOCK_SIZE);
        let capacity = match config.maximum_size {
            Some(cap) => cap,
            None => usize::MAX - RESERVED_SIZE,
        };
        Self {
            upstream,
            superblock_size: align_up(initial),
            capacity,
            current_size: 0,
            free_blocks: BTreeSet::new(),
            allocated_blocks: BTreeSet::new(),
            superblocks: Vec::new(),
            stats: ArenaStats::default(),
        }
    }

    /// Allocates at least `bytes` bytes, aligned to [`ALLOC_ALIGNMENT`].
    ///
    /// The request is rounded up to the alignment quantum; callers must
    /// pass the same `bytes` back to [`deallocate`](Self::deallocate).
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocationError> {
        let need = align_up(bytes.max(1));

        let block = match self.first_fit(need) {
            Some(block) => block,
            None => {
                if let Err(err) = self.expand(need) {
                    self.stats.failed_allocs += 1;
                    return Err(err);
                }
                match self.first_fit(need) {
                    Some(block) => block,
                    None => {
                        self.stats.failed_allocs += 1;
                        return Err(AllocationError::OutOfMemory {
                            requested: bytes,
                            alignment: ALLOC_ALIGNMENT,
                        });
                    }
                }
            }
        };

        let (head, tail) = block.split(need);
        if let Some(tail) = tail {
            self.free_blocks.insert(tail);
        }
        self.allocated_blocks.insert(head);

        self.stats.total_allocs += 1;
        self.stats.bytes_in_use += need;
        self.stats.peak_bytes_in_use = self.stats.peak_bytes_in_use.max(self.stats.bytes_in_use);

        Ok(head.pointer())
    }

    /// Returns an allocation to the arena.
    ///
    /// `bytes` must be the size passed to the matching
    /// [`allocate`](Self::allocate). Returns `false`, without touching
    /// any state, when `ptr` is not an outstanding allocation of this
    /// arena; the caller may be mixing allocators.
    ///
    /// # Safety
    ///
    /// The region must not be used after this call returns `true`; the
    /// arena may hand the address out again immediately.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) -> bool {
        let need = align_up(bytes.max(1));
        let Some(block) = self.allocated_blocks.take(&Block::new(ptr, need)) else {
            self.stats.rejected_frees += 1;
            return false;
        };
        debug_assert_eq!(
            block.size(),
            need,
            "deallocate size must match the allocation"
        );

        self.stats.total_frees += 1;
        self.stats.bytes_in_use -= block.size();

        self.coalesce(block);
        true
    }

    /// Identity comparison: arenas are interchangeable only with themselves.
    pub fn is_equal(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }

    /// Bytes currently held from the upstream.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// The quantum the next upstream expansion will request (at least).
    pub fn superblock_size(&self) -> usize {
        self.superblock_size
    }

    /// Effective capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operation counters.
    pub fn stats(&self) -> &ArenaStats {
        &self.stats
    }

    /// Free blocks in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.free_blocks.iter().copied()
    }

    /// Outstanding allocations in address order.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.allocated_blocks.iter().copied()
    }

    /// Removes and returns the first free block, in address order, that
    /// fits `need` bytes.
    fn first_fit(&mut self, need: usize) -> Option<Block> {
        let found = self.free_blocks.iter().find(|b| b.fits(need)).copied()?;
        self.free_blocks.remove(&found);
        Some(found)
    }

    /// Acquires a fresh superblock of at least `need` bytes.
    fn expand(&mut self, need: usize) -> Result<(), AllocationError> {
        let grow = need.max(self.superblock_size);
        if grow > self.capacity - self.current_size {
            return Err(AllocationError::OutOfMemory {
                requested: grow,
                alignment: ALLOC_ALIGNMENT,
            });
        }

        let ptr = self.upstream.allocate(grow, ALLOC_ALIGNMENT)?;
        let superblock = Block::new(ptr, grow);
        self.superblocks.push(superblock);
        self.free_blocks.insert(superblock);
        self.current_size += grow;
        self.stats.superblocks_acquired += 1;

        // Geometric growth, bounded by what the capacity still admits.
        self.superblock_size = self
            .superblock_size
            .saturating_mul(2)
            .min(self.capacity - self.current_size);
        Ok(())
    }

    /// Merges `block` with its address-order neighbors and stores it.
    fn coalesce(&mut self, block: Block) {
        let mut merged = block;
        if let Some(prev) = self.free_blocks.range(..merged).next_back().copied() {
            if prev.is_contiguous_before(&merged) {
                self.free_blocks.remove(&prev);
                merged = prev.merge(merged);
                self.stats.coalesces += 1;
            }
        }
        if let Some(next) = self.free_blocks.range(merged..).next().copied() {
            if merged.is_contiguous_before(&next) {
                self.free_blocks.remove(&next);
                merged = merged.merge(next);
                self.stats.coalesces += 1;
            }
        }
        self.free_blocks.insert(merged);
    }
}

impl<U: MemoryResource> MemoryResource for ArenaAllocator<U> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError> {
        debug_assert!(
            alignment.is_power_of_two() && ALLOC_ALIGNMENT % alignment == 0,
            "arena serves alignments dividing {ALLOC_ALIGNMENT}, got {alignment}"
        );
        ArenaAllocator::allocate(self, bytes)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, _alignment: usize) {
        // SAFETY: forwarded caller contract.
        let _ = unsafe { ArenaAllocator::deallocate(self, ptr, bytes) };
    }
}

impl<U: MemoryResource> Drop for ArenaAllocator<U> {
    fn drop(&mut self) {
        let Self {
            upstream,
            superblocks,
            ..
        } = self;
        for superblock in superblocks.drain(..) {
            // SAFETY: each superblock was obtained from `upstream` with
            // exactly this size and alignment, and is returned once.
            unsafe {
                upstream.deallocate(superblock.pointer(), superblock.size(), ALLOC_ALIGNMENT)
            };
        }
    }
}
