// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Receive buffer pool.
//!
//! The pool owns a fixed arena of DMA buffers and tracks the owner of each
//! one by index:
//!
//! ```text
//!   Free ──acquire_free──> Acquired ──mark_posted──> Posted
//!    ▲  ▲                     │                       │  │
//!    │  └──────put_back───────┘                       │  │
//!    │  └─────────────────────recycle─────────────────┘  │
//!    │                                                   │ mark_delivered
//!    └──────────────release(ReturnHandle)──── Delivered <┘
//! ```
//!
//! Only `Free` buffers can be acquired, so a buffer whose [`ReturnHandle`]
//! is outstanding can never be handed to hardware again.

use alloc::{sync::Arc, vec::Vec};
use core::{
    alloc::Layout,
    fmt,
    sync::atomic::{AtomicU16, Ordering},
};

use spin::Mutex;

use crate::{
    dma::{DmaAllocator, DmaBusAddress, DmaRegion},
    error::{RingError, RingResult},
};

static NEXT_POOL_ID: AtomicU16 = AtomicU16::new(1);

/// Index of a buffer inside its pool.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BufferId(u16);

impl BufferId {
    /// Returns the raw index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ownership state of a pool buffer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BufferState {
    /// Owned by the pool, can be acquired.
    Free,
    /// Taken by a ring, not yet written into a descriptor.
    Acquired,
    /// Written into a descriptor; hardware may write to it.
    Posted,
    /// Handed to the upper layer together with a [`ReturnHandle`].
    Delivered,
}

/// Tally of buffers per state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct PoolCounts {
    /// Buffers in [`BufferState::Free`].
    pub free: usize,
    /// Buffers in [`BufferState::Acquired`].
    pub acquired: usize,
    /// Buffers in [`BufferState::Posted`].
    pub posted: usize,
    /// Buffers in [`BufferState::Delivered`].
    pub delivered: usize,
}

impl PoolCounts {
    /// Sum over all states.
    pub const fn total(&self) -> usize {
        self.free + self.acquired + self.posted + self.delivered
    }
}

/// Capability to recycle one delivered receive buffer.
///
/// Each delivery creates a handle with a fresh generation, so a handle that
/// was already released no longer matches its buffer.
#[derive(Eq, PartialEq)]
pub struct ReturnHandle {
    pool: u16,
    index: u16,
    generation: u32,
}

impl ReturnHandle {
    /// The buffer this handle names.
    pub const fn buffer(&self) -> BufferId {
        BufferId(self.index)
    }

    /// Converts the handle into an opaque integer.
    pub const fn into_raw(self) -> u64 {
        ((self.pool as u64) << 48) | ((self.generation as u64) << 16) | self.index as u64
    }

    /// Restores a handle from [`ReturnHandle::into_raw`].
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_raw` and must not have been restored
    /// before. Restoring a value twice yields two handles to one buffer;
    /// the pool rejects the second release, but any data view obtained
    /// through the first one may observe the buffer being reused.
    pub const unsafe fn from_raw(raw: u64) -> Self {
        Self {
            pool: (raw >> 48) as u16,
            index: raw as u16,
            generation: (raw >> 16) as u32,
        }
    }
}

impl fmt::Debug for ReturnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnHandle")
            .field("pool", &self.pool)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct Slots {
    state: Vec<BufferState>,
    generation: Vec<u32>,
    free: Vec<u16>,
}

impl Slots {
    fn state_mut(&mut self, id: BufferId) -> RingResult<&mut BufferState> {
        self.state.get_mut(id.index()).ok_or(RingError::BadState)
    }

    fn transition(&mut self, id: BufferId, from: BufferState, to: BufferState) -> RingResult {
        let state = self.state_mut(id)?;
        if *state != from {
            error!("rx buffer {}: expected {:?}, found {:?}", id.0, from, *state);
            return Err(RingError::BadState);
        }
        *state = to;
        if to == BufferState::Free {
            self.free.push(id.0);
        }
        Ok(())
    }
}

/// A fixed set of DMA-capable receive buffers.
pub struct BufferPool {
    id: u16,
    regions: Vec<DmaRegion>,
    layout: Layout,
    allocator: Arc<dyn DmaAllocator>,
    slots: Mutex<Slots>,
}

impl BufferPool {
    /// Allocates `count` buffers of `size` bytes aligned to `align`.
    ///
    /// Either every buffer is allocated or none is: on failure the buffers
    /// allocated so far are returned to `allocator`.
    pub fn create(
        allocator: Arc<dyn DmaAllocator>,
        count: usize,
        size: usize,
        align: usize,
    ) -> RingResult<Arc<Self>> {
        if count == 0 || count > u16::MAX as usize {
            return Err(RingError::InvalidConfig("rx buffer count"));
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| RingError::InvalidConfig("rx buffer layout"))?;

        let mut regions = Vec::with_capacity(count);
        for _ in 0..count {
            match allocator.allocate(layout) {
                Some(region) => regions.push(region),
                None => {
                    warn!(
                        "rx pool: allocation failed after {} of {} buffers",
                        regions.len(),
                        count
                    );
                    for region in regions.drain(..) {
                        unsafe { allocator.deallocate(region, layout) };
                    }
                    return Err(RingError::OutOfMemory);
                }
            }
        }

        // Reverse order so the first acquisitions hand out low indices.
        let free = (0..count as u16).rev().collect();
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!("rx pool {}: {} buffers of {} bytes", id, count, size);
        Ok(Arc::new(Self {
            id,
            regions,
            layout,
            allocator,
            slots: Mutex::new(Slots {
                state: alloc::vec![BufferState::Free; count],
                generation: alloc::vec![0; count],
                free,
            }),
        }))
    }

    /// Takes one free buffer, or returns `None` if the pool is exhausted.
    pub fn acquire_free(&self) -> Option<BufferId> {
        let mut slots = self.slots.lock();
        let index = slots.free.pop()?;
        slots.state[index as usize] = BufferState::Acquired;
        Some(BufferId(index))
    }

    /// Records that an acquired buffer was written into a descriptor.
    pub fn mark_posted(&self, id: BufferId) -> RingResult {
        self.slots
            .lock()
            .transition(id, BufferState::Acquired, BufferState::Posted)
    }

    /// Hands a posted buffer to the upper layer.
    pub fn mark_delivered(&self, id: BufferId) -> RingResult<ReturnHandle> {
        let mut slots = self.slots.lock();
        slots.transition(id, BufferState::Posted, BufferState::Delivered)?;
        let generation = &mut slots.generation[id.index()];
        *generation = generation.wrapping_add(1);
        Ok(ReturnHandle {
            pool: self.id,
            index: id.0,
            generation: *generation,
        })
    }

    /// Returns a posted buffer that hardware no longer references.
    pub fn recycle(&self, id: BufferId) -> RingResult {
        self.slots
            .lock()
            .transition(id, BufferState::Posted, BufferState::Free)
    }

    /// Returns an acquired buffer that was never posted.
    pub fn put_back(&self, id: BufferId) -> RingResult {
        self.slots
            .lock()
            .transition(id, BufferState::Acquired, BufferState::Free)
    }

    /// Returns a delivered buffer to the pool.
    pub fn release(&self, handle: ReturnHandle) -> RingResult {
        if handle.pool != self.id {
            return Err(RingError::InvalidHandle);
        }
        let mut slots = self.slots.lock();
        let index = handle.index as usize;
        match (slots.state.get(index), slots.generation.get(index)) {
            (Some(BufferState::Delivered), Some(&generation))
                if generation == handle.generation =>
            {
                slots.state[index] = BufferState::Free;
                slots.free.push(handle.index);
                Ok(())
            }
            _ => Err(RingError::InvalidHandle),
        }
    }

    /// Current state of a buffer.
    pub fn state_of(&self, id: BufferId) -> Option<BufferState> {
        self.slots.lock().state.get(id.index()).copied()
    }

    /// Per-state buffer counts.
    pub fn counts(&self) -> PoolCounts {
        let slots = self.slots.lock();
        let mut counts = PoolCounts::default();
        for state in slots.state.iter() {
            match state {
                BufferState::Free => counts.free += 1,
                BufferState::Acquired => counts.acquired += 1,
                BufferState::Posted => counts.posted += 1,
                BufferState::Delivered => counts.delivered += 1,
            }
        }
        counts
    }

    /// Number of free buffers.
    pub fn available(&self) -> usize {
        self.slots.lock().free.len()
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.regions.len()
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.layout.size()
    }

    /// Device-visible address of a buffer.
    pub fn bus_addr(&self, id: BufferId) -> Option<DmaBusAddress> {
        self.regions.get(id.index()).map(|r| r.bus_addr)
    }

    pub(crate) fn region(&self, id: BufferId) -> Option<&DmaRegion> {
        self.regions.get(id.index())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("counts", &self.counts())
            .finish()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let posted = self
            .slots
            .get_mut()
            .state
            .iter()
            .filter(|s| **s == BufferState::Posted)
            .count();
        if posted != 0 {
            warn!("rx pool {}: dropped with {} buffers posted", self.id, posted);
        }
        for region in self.regions.drain(..) {
            unsafe { self.allocator.deallocate(region, self.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;
    use crate::dma::HeapDma;

    fn pool(count: usize) -> Arc<BufferPool> {
        BufferPool::create(Arc::new(HeapDma), count, 256, 64).unwrap()
    }

    /// Fails after `budget` allocations and tracks outstanding regions.
    struct LimitedDma {
        budget: AtomicUsize,
        live: AtomicUsize,
    }

    impl DmaAllocator for LimitedDma {
        fn allocate(&self, layout: Layout) -> Option<DmaRegion> {
            if self.budget.load(Ordering::SeqCst) == 0 {
                return None;
            }
            self.budget.fetch_sub(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            HeapDma.allocate(layout)
        }

        unsafe fn deallocate(&self, region: DmaRegion, layout: Layout) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            unsafe { HeapDma.deallocate(region, layout) }
        }
    }

    #[test]
    fn test_create_failure_releases_partial_batch() {
        let dma = Arc::new(LimitedDma {
            budget: AtomicUsize::new(3),
            live: AtomicUsize::new(0),
        });
        let res = BufferPool::create(dma.clone(), 8, 256, 64);
        assert_eq!(res.err(), Some(RingError::OutOfMemory));
        assert_eq!(dma.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_returns_memory() {
        let dma = Arc::new(LimitedDma {
            budget: AtomicUsize::new(8),
            live: AtomicUsize::new(0),
        });
        let pool = BufferPool::create(dma.clone(), 8, 256, 64).unwrap();
        assert_eq!(dma.live.load(Ordering::SeqCst), 8);
        drop(pool);
        assert_eq!(dma.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_lifecycle() {
        let pool = pool(2);
        let id = pool.acquire_free().unwrap();
        assert_eq!(id.index(), 0);
        assert_eq!(pool.state_of(id), Some(BufferState::Acquired));
        pool.mark_posted(id).unwrap();
        let handle = pool.mark_delivered(id).unwrap();
        assert_eq!(handle.buffer(), id);
        assert_eq!(pool.available(), 1);
        pool.release(handle).unwrap();
        assert_eq!(pool.state_of(id), Some(BufferState::Free));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let pool = pool(2);
        assert!(pool.acquire_free().is_some());
        assert!(pool.acquire_free().is_some());
        assert!(pool.acquire_free().is_none());
    }

    #[test]
    fn test_illegal_transitions() {
        let pool = pool(1);
        let id = pool.acquire_free().unwrap();
        assert_eq!(pool.mark_delivered(id).err(), Some(RingError::BadState));
        assert_eq!(pool.recycle(id), Err(RingError::BadState));
        pool.mark_posted(id).unwrap();
        assert_eq!(pool.mark_posted(id), Err(RingError::BadState));
        assert_eq!(pool.put_back(id), Err(RingError::BadState));
        pool.recycle(id).unwrap();
        assert_eq!(pool.counts().free, 1);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let pool = pool(1);
        let id = pool.acquire_free().unwrap();
        pool.mark_posted(id).unwrap();
        let raw = pool.mark_delivered(id).unwrap().into_raw();
        pool.release(unsafe { ReturnHandle::from_raw(raw) }).unwrap();
        assert_eq!(
            pool.release(unsafe { ReturnHandle::from_raw(raw) }),
            Err(RingError::InvalidHandle)
        );
    }

    #[test]
    fn test_stale_generation_is_rejected() {
        let pool = pool(1);
        let id = pool.acquire_free().unwrap();
        pool.mark_posted(id).unwrap();
        let stale = pool.mark_delivered(id).unwrap().into_raw();
        pool.release(unsafe { ReturnHandle::from_raw(stale) }).unwrap();

        // Same buffer delivered again under a new generation.
        let id = pool.acquire_free().unwrap();
        pool.mark_posted(id).unwrap();
        let fresh = pool.mark_delivered(id).unwrap();
        assert_eq!(
            pool.release(unsafe { ReturnHandle::from_raw(stale) }),
            Err(RingError::InvalidHandle)
        );
        pool.release(fresh).unwrap();
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let a = pool(1);
        let b = pool(1);
        let id = a.acquire_free().unwrap();
        a.mark_posted(id).unwrap();
        let handle = a.mark_delivered(id).unwrap();
        let raw = handle.into_raw();
        assert_eq!(
            b.release(unsafe { ReturnHandle::from_raw(raw) }),
            Err(RingError::InvalidHandle)
        );
        a.release(unsafe { ReturnHandle::from_raw(raw) }).unwrap();
    }

    #[test]
    fn test_counts_cover_every_buffer() {
        let pool = pool(4);
        let a = pool.acquire_free().unwrap();
        let b = pool.acquire_free().unwrap();
        pool.mark_posted(b).unwrap();
        let c = pool.acquire_free().unwrap();
        pool.mark_posted(c).unwrap();
        let _h = pool.mark_delivered(c).unwrap();
        let counts = pool.counts();
        assert_eq!(
            counts,
            PoolCounts {
                free: 1,
                acquired: 1,
                posted: 1,
                delivered: 1
            }
        );
        assert_eq!(counts.total(), pool.capacity());
        pool.put_back(a).unwrap();
    }
}
