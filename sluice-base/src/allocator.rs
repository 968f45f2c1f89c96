use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationError {
    // The allocator will never be able to provide this allocation. The read fails.
    OutOfMemory,
    // The allocator is temporarily exhausted. The read is retried on a later scheduler iteration.
    Busy,
}

pub struct RequestMemoryAllocation {
    // Length of the buffer is the provided size, which is at least the minimal requested size
    pub buffer: Vec<u8>,
    pub alignment: usize,
}

/// Provides memory for reads that don't supply their own output buffer. Allocation and release
/// happen on the streamer's scheduler thread while the allocator may be owned by another thread,
/// so implementations must be thread safe.
pub trait RequestMemoryAllocator: Send + Sync {
    // Called when a read using this allocator is created. Every lock is matched with an unlock
    // once the request is fully released.
    fn lock_allocator(&self);

    fn unlock_allocator(&self);

    fn allocate(
        &self,
        minimal_size: u64,
        recommended_size: u64,
        alignment: usize,
    ) -> Result<RequestMemoryAllocation, AllocationError>;

    fn release(
        &self,
        buffer: Vec<u8>,
    );
}

/// Output memory of a read. If the memory came from an allocator and has not been claimed, it is
/// handed back to the allocator when the buffer is dropped.
pub struct RequestBuffer {
    data: Vec<u8>,
    allocator: Option<Arc<dyn RequestMemoryAllocator>>,
}

impl RequestBuffer {
    // Memory provided by the caller, never released to an allocator
    pub fn from_vec(data: Vec<u8>) -> Self {
        RequestBuffer {
            data,
            allocator: None,
        }
    }

    pub fn from_allocation(
        allocation: RequestMemoryAllocation,
        allocator: Arc<dyn RequestMemoryAllocator>,
    ) -> Self {
        RequestBuffer {
            data: allocation.buffer,
            allocator: Some(allocator),
        }
    }

    pub fn is_allocator_owned(&self) -> bool {
        self.allocator.is_some()
    }

    /// Takes ownership of the memory. If it came from an allocator the caller becomes
    /// responsible for releasing it.
    pub fn claim(mut self) -> Vec<u8> {
        self.allocator = None;
        std::mem::take(&mut self.data)
    }
}

impl Deref for RequestBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for RequestBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for RequestBuffer {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            allocator.release(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for RequestBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RequestBuffer")
            .field("data_length", &self.data.len())
            .field("allocator_owned", &self.allocator.is_some())
            .finish()
    }
}

/// Heap backed allocator that keeps track of outstanding allocations and locks. Alignment is
/// treated as a hint, buffers are regular `Vec<u8>` allocations.
#[derive(Default)]
pub struct DefaultRequestMemoryAllocator {
    lock_count: AtomicUsize,
    allocation_count: AtomicUsize,
    release_count: AtomicUsize,
    // Zero means unlimited
    max_allocation_size: u64,
}

impl DefaultRequestMemoryAllocator {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_max_allocation_size(max_allocation_size: u64) -> Self {
        DefaultRequestMemoryAllocator {
            max_allocation_size,
            ..Default::default()
        }
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Acquire)
    }

    pub fn release_count(&self) -> usize {
        self.release_count.load(Ordering::Acquire)
    }

    pub fn outstanding_allocations(&self) -> usize {
        self.allocation_count() - self.release_count()
    }
}

impl RequestMemoryAllocator for DefaultRequestMemoryAllocator {
    fn lock_allocator(&self) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unlock_allocator(&self) {
        let previous = self.lock_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "Allocator unlocked more often than it was locked");
    }

    fn allocate(
        &self,
        minimal_size: u64,
        recommended_size: u64,
        alignment: usize,
    ) -> Result<RequestMemoryAllocation, AllocationError> {
        if self.max_allocation_size != 0 && minimal_size > self.max_allocation_size {
            log::warn!(
                "Allocation of {} bytes exceeds the maximum of {} bytes",
                minimal_size,
                self.max_allocation_size
            );
            return Err(AllocationError::OutOfMemory);
        }

        let mut size = recommended_size.max(minimal_size);
        if self.max_allocation_size != 0 {
            size = size.min(self.max_allocation_size);
        }
        let size = usize::try_from(size).map_err(|_| AllocationError::OutOfMemory)?;
        let mut buffer = Vec::default();
        if let Err(error) = buffer.try_reserve_exact(size) {
            log::warn!("Allocation of {} bytes failed: {}", size, error);
            return Err(AllocationError::OutOfMemory);
        }
        buffer.resize(size, 0);

        self.allocation_count.fetch_add(1, Ordering::AcqRel);
        Ok(RequestMemoryAllocation { buffer, alignment })
    }

    fn release(
        &self,
        buffer: Vec<u8>,
    ) {
        drop(buffer);
        self.release_count.fetch_add(1, Ordering::AcqRel);
    }
}
