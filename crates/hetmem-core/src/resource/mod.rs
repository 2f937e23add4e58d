//! The upstream contract: an abstract source of raw bytes.
//!
//! Everything in this crate acquires memory through [`MemoryResource`],
//! whether the implementation is the process heap, a byte-capped wrapper,
//! or one of the engines themselves. Callers always pass the same size
//! and alignment to `deallocate` that they passed to `allocate`, so
//! implementations never need to remember allocation sizes.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::error::AllocationError;

mod host;
mod limiting;
mod tracking;

pub use host::HostMemoryResource;
pub use limiting::LimitingMemoryResource;
pub use tracking::{ResourceEvent, TrackingMemoryResource};

/// An upstream source of raw bytes.
///
/// Methods take `&mut self`: the core is single-mutator and performs no
/// internal synchronization. To share one resource between several
/// engines on the same thread, wrap it in [`SharedResource`].
pub trait MemoryResource {
    /// Obtains at least `bytes` bytes aligned to `alignment`.
    ///
    /// A zero-byte request returns a dangling, suitably aligned pointer
    /// that must be released with a zero-byte `deallocate`.
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError>;

    /// Returns a region previously obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same resource
    /// with exactly this `bytes` and `alignment`, must not have been
    /// deallocated already, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize);
}

impl<R: MemoryResource + ?Sized> MemoryResource for &mut R {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError> {
        (**self).allocate(bytes, alignment)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { (**self).deallocate(ptr, bytes, alignment) }
    }
}

/// Lets several same-thread engines draw from one upstream.
///
/// `&SharedResource<R>` implements [`MemoryResource`], so an engine can
/// borrow the wrapper immutably while its siblings do the same. The
/// `RefCell` keeps the single-mutator rule intact per call; the wrapper
/// is deliberately not `Sync`.
pub struct SharedResource<R> {
    inner: RefCell<R>,
}

impl<R> SharedResource<R> {
    /// Wraps `resource` for shared single-thread use.
    pub fn new(resource: R) -> Self {
        Self {
            inner: RefCell::new(resource),
        }
    }

    /// Unwraps the inner resource. All borrowing engines must be gone.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: MemoryResource> MemoryResource for &SharedResource<R> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError> {
        self.inner.borrow_mut().allocate(bytes, alignment)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { self.inner.borrow_mut().deallocate(ptr, bytes, alignment) }
    }
}

/// Well-aligned placeholder pointer for zero-byte requests.
pub(crate) fn dangling(alignment: usize) -> NonNull<u8> {
    let addr = alignment.max(1);
    // SAFETY: addr >= 1, so the pointer is non-null.
    unsafe { NonNull::new_unchecked(addr as *mut u8) }
}
