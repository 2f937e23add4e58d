//! # hetmem-core
//!
//! Memory-management core for host/device workloads: two composable
//! allocator engines that sit between a caller requesting raw bytes and
//! an upstream byte source (a general heap, a pinned-host pool, a device
//! pool).
//!
//! - [`ArenaAllocator`]: a coalescing free-list arena that amortizes
//!   upstream acquisitions by carving many small requests out of large
//!   superblocks.
//! - [`BinaryPageAllocator`]: a power-of-two buddy allocator organized
//!   as complete binary trees over superpages.
//!
//! Both consume and expose the same [`MemoryResource`] contract, so they
//! can be stacked on top of each other or swapped under higher-level
//! containers. Engines are single-mutator: synchronization, when needed,
//! belongs to the caller.
//!
//! ```
//! use hetmem_core::{ArenaAllocator, HostMemoryResource};
//!
//! let mut host = HostMemoryResource::new();
//! let mut arena = ArenaAllocator::new(&mut host);
//! let ptr = arena.allocate(100).expect("allocation");
//! // SAFETY: `ptr` is a live allocation of this arena and is not used
//! // after the call.
//! let released = unsafe { arena.deallocate(ptr, 100) };
//! assert!(released);
//! ```

pub mod arena;
pub mod buddy;
pub mod error;
pub mod resource;
pub mod stats;

pub use arena::{ArenaAllocator, ArenaConfig, Block, ALLOC_ALIGNMENT, MIN_SUPERBLOCK_SIZE, RESERVED_SIZE};
pub use buddy::superpage::{PageRef, PageState, Superpage};
pub use buddy::{BinaryPageAllocator, MIN_PAGE_LOG2, NEW_SUPERPAGE_LOG2};
pub use error::AllocationError;
pub use resource::{
    HostMemoryResource, LimitingMemoryResource, MemoryResource, ResourceEvent, SharedResource,
    TrackingMemoryResource,
};
pub use stats::{ArenaStats, BinaryPageStats};
