//! Binary page (buddy) allocator.
//!
//! Requests are rounded up to a power of two and served from a list of
//! superpages, each a complete binary buddy tree over one upstream
//! allocation. The search prefers pages of exactly the goal size across
//! all superpages before it climbs to larger ones, which avoids
//! splitting big free pages prematurely. Freed pages are simply marked
//! vacant; their split ancestors are collapsed lazily by the next
//! allocation that needs the larger page.

use std::ptr::NonNull;

use crate::error::AllocationError;
use crate::resource::MemoryResource;
use crate::stats::BinaryPageStats;

pub mod superpage;

use superpage::{PageRef, PageState, Superpage};

/// Log2 of the smallest page handed out (256 B leaves).
pub const MIN_PAGE_LOG2: u32 = 8;

/// Log2 of the default size of a freshly acquired superpage (1 MiB).
pub const NEW_SUPERPAGE_LOG2: u32 = 20;

/// Smallest power of two covering `bytes`, as the exponent.
fn ceil_log2(bytes: usize) -> u32 {
    bytes.next_power_of_two().trailing_zeros()
}

/// Page size class serving a request of `bytes` bytes.
fn goal_log2(bytes: usize) -> u32 {
    ceil_log2(bytes.max(1)).max(MIN_PAGE_LOG2)
}

/// Power-of-two page allocator over an upstream byte source.
///
/// Single-mutator, like the arena. The superpage list only ever grows
/// while the allocator lives; every superpage is returned to the
/// upstream, with its original size and alignment, on drop.
pub struct BinaryPageAllocator<U: MemoryResource> {
    upstream: U,
    superpages: Vec<Superpage>,
    stats: BinaryPageStats,
}

impl<U: MemoryResource> BinaryPageAllocator<U> {
    /// Creates an empty allocator; no upstream memory is acquired until
    /// the first allocation.
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            superpages: Vec::new(),
            stats: BinaryPageStats::default(),
        }
    }

    /// Allocates a page of at least `bytes` bytes.
    ///
    /// The returned address is aligned to the page size actually used
    /// (`2^goal` for `goal = max(8, ceil_log2(bytes))`). Callers must
    /// pass the same `bytes` back to [`deallocate`](Self::deallocate).
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocationError> {
        let goal = goal_log2(bytes);

        let (sp_index, page_index) = match self.find_free_page(goal) {
            Some(found) => found,
            None => {
                if let Err(err) = self.expand(goal) {
                    self.stats.failed_allocs += 1;
                    return Err(err);
                }
                match self.find_free_page(goal) {
                    Some(found) => found,
                    None => {
                        self.stats.failed_allocs += 1;
                        return Err(AllocationError::OutOfMemory {
                            requested: bytes,
                            alignment: 1usize << goal,
                        });
                    }
                }
            }
        };

        let mut splits = 0;
        let mut unsplits = 0;
        let mut page = PageRef::new(&mut self.superpages[sp_index], page_index);

        // A split candidate has a fully free subtree; reclaim it first.
        if page.state() == PageState::Split {
            page.unsplit();
            unsplits += 1;
        }
        while page.size_log2() > goal {
            page.split();
            splits += 1;
            page = page.into_left_child();
        }
        page.occupy();
        let ptr = page.addr();

        self.stats.total_allocs += 1;
        self.stats.splits += splits;
        self.stats.unsplits += unsplits;
        Ok(ptr)
    }

    /// Returns a page to the allocator.
    ///
    /// Only the page itself is marked vacant; split ancestors are left
    /// for the next larger allocation to collapse.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on
    /// this allocator with the same `bytes`, must not have been freed
    /// already, and must not be used afterwards. A pointer outside every
    /// superpage causes a panic.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        let goal = goal_log2(bytes);
        let sp = self
            .superpages
            .iter_mut()
            .find(|sp| sp.contains(ptr))
            .expect("pointer does not belong to any superpage of this allocator");
        debug_assert!(goal <= sp.size_log2());

        // First node of the goal-sized row, then index by byte offset.
        let mut first = 0;
        while sp.page_size_log2(first) > goal {
            first = 2 * first + 1;
        }
        let offset = ptr.as_ptr() as usize - sp.base().as_ptr() as usize;
        debug_assert_eq!(
            offset & ((1usize << goal) - 1),
            0,
            "pointer is not on a page boundary for its size"
        );
        let index = first + (offset >> goal);

        PageRef::new(sp, index).release();
        self.stats.total_frees += 1;
    }

    /// Identity comparison: allocators are interchangeable only with
    /// themselves.
    pub fn is_equal(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }

    /// The superpages acquired so far, in acquisition order.
    pub fn superpages(&self) -> &[Superpage] {
        &self.superpages
    }

    /// Operation counters.
    pub fn stats(&self) -> &BinaryPageStats {
        &self.stats
    }

    /// Finds a page that can serve `goal`, preferring exact sizes.
    ///
    /// Scans every superpage for a page of exactly the target size that
    /// is vacant, or split with a fully free subtree; only when no
    /// superpage has the target size available does the target climb.
    fn find_free_page(&self, goal: u32) -> Option<(usize, usize)> {
        let mut target = goal;
        loop {
            let mut candidate_superpage_found = false;
            for (sp_index, sp) in self.superpages.iter().enumerate() {
                if target > sp.size_log2() {
                    continue;
                }
                candidate_superpage_found = true;

                // Index range [first, last) of nodes with the target size.
                let mut first = 0;
                while sp.page_size_log2(first) > target {
                    first = 2 * first + 1;
                }
                let last = 2 * first + 1;

                for index in first..last {
                    match sp.state(index) {
                        PageState::Vacant => return Some((sp_index, index)),
                        PageState::Split if sp.subtree_is_free(index) => {
                            return Some((sp_index, index))
                        }
                        _ => {}
                    }
                }
            }
            if !candidate_superpage_found {
                return None;
            }
            target += 1;
        }
    }

    /// Acquires a fresh superpage big enough for `goal`.
    fn expand(&mut self, goal: u32) -> Result<(), AllocationError> {
        let size_log2 = goal.max(NEW_SUPERPAGE_LOG2);
        let superpage = Superpage::new(size_log2, &mut self.upstream)?;
        self.superpages.push(superpage);
        self.stats.superpages_acquired += 1;
        Ok(())
    }
}

impl<U: MemoryResource> MemoryResource for BinaryPageAllocator<U> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError> {
        debug_assert!(
            alignment.is_power_of_two() && alignment <= (1usize << goal_log2(bytes)),
            "alignment {alignment} exceeds the page size for {bytes} bytes"
        );
        BinaryPageAllocator::allocate(self, bytes)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, _alignment: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { BinaryPageAllocator::deallocate(self, ptr, bytes) };
    }
}

impl<U: MemoryResource> Drop for BinaryPageAllocator<U> {
    fn drop(&mut self) {
        let Self {
            upstream,
            superpages,
            ..
        } = self;
        for superpage in superpages.drain(..) {
            let bytes = 1usize << superpage.size_log2();
            // SAFETY: the superpage's memory was obtained from `upstream`
            // with exactly this size and alignment, and is returned once.
            unsafe { upstream.deallocate(superpage.base(), bytes, bytes) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::HostMemoryResource;

    #[test]
    fn size_rounding_hits_the_next_power_of_two() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(256), 8);
        assert_eq!(ceil_log2(257), 9);
        assert_eq!(goal_log2(0), MIN_PAGE_LOG2);
        assert_eq!(goal_log2(100), MIN_PAGE_LOG2);
        assert_eq!(goal_log2(1 << 20), 20);
    }

    #[test]
    fn exactly_sized_vacant_pages_are_preferred() {
        let mut host = HostMemoryResource::new();
        let mut pages = BinaryPageAllocator::new(&mut host);

        let small = pages.allocate(256).expect("small");
        let _large = pages.allocate(512).expect("large");
        // SAFETY: `small` is live.
        unsafe { pages.deallocate(small, 256) };

        // The vacant 256-byte page is reused instead of splitting the
        // superpage's remaining larger pages.
        let splits_before = pages.stats().splits;
        let reused = pages.allocate(256).expect("reuse");
        assert_eq!(reused, small);
        assert_eq!(pages.stats().splits, splits_before);
    }

    #[test]
    fn occupied_small_pages_force_a_split_of_the_next_size_up() {
        let mut host = HostMemoryResource::new();
        let mut pages = BinaryPageAllocator::new(&mut host);

        // A 1 KiB superpage: four 256-byte leaves, seven nodes.
        let sp = Superpage::new(10, &mut pages.upstream).expect("superpage");
        pages.superpages.push(sp);

        let base = pages.superpages[0].base().as_ptr() as usize;
        let first = pages.allocate(256).expect("first leaf");
        let second = pages.allocate(256).expect("second leaf");
        assert_eq!(first.as_ptr() as usize - base, 0);
        assert_eq!(second.as_ptr() as usize - base, 256);

        // Both leaves under the left half are taken; the next request
        // must split the vacant right half and take its left leaf.
        let third = pages.allocate(256).expect("third leaf");
        assert_eq!(third.as_ptr() as usize - base, 512);
        assert_eq!(pages.superpages[0].state(2), PageState::Split);
        assert_eq!(pages.superpages[0].state(5), PageState::Occupied);

        let fourth = pages.allocate(256).expect("fourth leaf");
        assert_eq!(fourth.as_ptr() as usize - base, 768);

        // SAFETY: all four leaves are live allocations.
        unsafe {
            pages.deallocate(first, 256);
            pages.deallocate(second, 256);
            pages.deallocate(third, 256);
            pages.deallocate(fourth, 256);
        }

        // With everything free again, a full-size request collapses the
        // tree and returns the root.
        let root = pages.allocate(1 << 10).expect("root");
        assert_eq!(root.as_ptr() as usize, base);
        assert_eq!(pages.superpages[0].state(0), PageState::Occupied);
        assert!(pages.stats().unsplits >= 1);

        // SAFETY: the root page is live.
        unsafe { pages.deallocate(root, 1 << 10) };
    }

    #[test]
    fn requests_larger_than_the_default_superpage_get_a_bigger_one() {
        let mut host = HostMemoryResource::new();
        let mut pages = BinaryPageAllocator::new(&mut host);

        let big = pages.allocate(1 << 21).expect("2 MiB");
        assert_eq!(pages.superpages().len(), 1);
        assert_eq!(pages.superpages()[0].size_log2(), 21);

        // SAFETY: `big` is live.
        unsafe { pages.deallocate(big, 1 << 21) };
    }
}
