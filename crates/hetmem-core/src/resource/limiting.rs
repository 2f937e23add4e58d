//! Byte-capped wrapper around another upstream.
//!
//! Models a device pool with bounded capacity: requests past the cap are
//! refused without consulting the wrapped resource. Tests use this to
//! drive every out-of-memory path against the real heap.

use std::ptr::NonNull;

use crate::error::AllocationError;

use super::MemoryResource;

/// Upstream adaptor that refuses allocations beyond a byte budget.
pub struct LimitingMemoryResource<U> {
    upstream: U,
    limit_bytes: usize,
    used_bytes: usize,
}

impl<U: MemoryResource> LimitingMemoryResource<U> {
    /// Caps `upstream` at `limit_bytes` outstanding bytes.
    pub fn new(limit_bytes: usize, upstream: U) -> Self {
        Self {
            upstream,
            limit_bytes,
            used_bytes: 0,
        }
    }

    /// Bytes currently outstanding.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The configured budget.
    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }
}

impl<U: MemoryResource> MemoryResource for LimitingMemoryResource<U> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocationError> {
        if bytes > self.limit_bytes - self.used_bytes {
            return Err(AllocationError::OutOfMemory {
                requested: bytes,
                alignment,
            });
        }
        let ptr = self.upstream.allocate(bytes, alignment)?;
        self.used_bytes += bytes;
        Ok(ptr)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        // SAFETY: caller contract: the region came from our allocate,
        // which forwarded to the wrapped upstream.
        unsafe { self.upstream.deallocate(ptr, bytes, alignment) };
        self.used_bytes -= bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::HostMemoryResource;

    #[test]
    fn refuses_past_the_cap_and_recovers_after_free() {
        let mut limited = LimitingMemoryResource::new(4096, HostMemoryResource::new());

        let a = limited.allocate(3072, 64).expect("within budget");
        assert_eq!(limited.used_bytes(), 3072);

        let refused = limited.allocate(2048, 64);
        assert_eq!(
            refused,
            Err(AllocationError::OutOfMemory {
                requested: 2048,
                alignment: 64
            })
        );
        assert_eq!(limited.used_bytes(), 3072);

        // SAFETY: `a` came from the allocate above.
        unsafe { limited.deallocate(a, 3072, 64) };
        assert_eq!(limited.used_bytes(), 0);

        let b = limited.allocate(2048, 64).expect("budget restored");
        // SAFETY: `b` came from the allocate above.
        unsafe { limited.deallocate(b, 2048, 64) };
    }

    #[test]
    fn exact_budget_fits() {
        let mut limited = LimitingMemoryResource::new(1024, HostMemoryResource::new());
        let ptr = limited.allocate(1024, 16).expect("exact fit");
        assert_eq!(limited.used_bytes(), 1024);
        // SAFETY: matching allocate above.
        unsafe { limited.deallocate(ptr, 1024, 16) };
    }
}
