// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Receive descriptor ring.
//!
//! Slots between the consumer and the producer counter hold posted pool
//! buffers. Hardware fills them in order and advances its consumer counter;
//! [`RxRing::advance`] hands whole frames to the upper layer as [`RxFrame`]s
//! and refills the freed slots from the pool. A slot the pool cannot refill
//! stays empty until a later advance, which only shrinks the window of
//! posted buffers.

use alloc::{sync::Arc, vec::Vec};
use core::{
    fmt,
    mem::ManuallyDrop,
    ptr::{self, NonNull},
    slice,
    sync::atomic::{AtomicU64, Ordering, fence},
};

use spin::Mutex;

use crate::{
    RxDelivery,
    error::{RingError, RingResult},
    hal::{DmaControl, NicHardware, Register, RxCompletion},
    index::{advance, distance, is_valid_ring_size, slot_of},
    pool::{BufferId, BufferPool, ReturnHandle},
};

/// A received frame, borrowed zero-copy from its pool buffer.
///
/// Dropping the frame returns the buffer to the pool. Use
/// [`RxFrame::into_handle`] to keep the buffer past the frame and release it
/// later with [`BufferPool::release`].
pub struct RxFrame {
    pool: Arc<BufferPool>,
    handle: ManuallyDrop<ReturnHandle>,
    data: NonNull<u8>,
    len: usize,
}

// The buffer belongs to this frame alone until its handle is released.
unsafe impl Send for RxFrame {}
unsafe impl Sync for RxFrame {}

impl RxFrame {
    /// Frame payload, without the leading pad.
    pub fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// Payload length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for an empty frame.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The handle naming this frame's buffer.
    pub fn handle(&self) -> &ReturnHandle {
        &self.handle
    }

    /// Detaches the buffer from the frame without releasing it.
    pub fn into_handle(self) -> ReturnHandle {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each field is taken once.
        unsafe {
            ptr::drop_in_place(&mut this.pool);
            ManuallyDrop::take(&mut this.handle)
        }
    }
}

impl fmt::Debug for RxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxFrame")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for RxFrame {
    fn drop(&mut self) {
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        if let Err(e) = self.pool.release(handle) {
            error!("rx frame: release failed: {}", e);
        }
    }
}

/// Counters of one RX ring.
#[derive(Debug, Default)]
pub struct RxStats {
    delivered: AtomicU64,
    bytes: AtomicU64,
    framing_errors: AtomicU64,
    refill_deferred: AtomicU64,
    discarded: AtomicU64,
    bad_consumer: AtomicU64,
}

/// Point-in-time copy of [`RxStats`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct RxStatsSnapshot {
    /// Frames handed to the upper layer.
    pub delivered: u64,
    /// Payload bytes handed to the upper layer.
    pub bytes: u64,
    /// Completions dropped for bad status or length.
    pub framing_errors: u64,
    /// Refills postponed because the pool was empty.
    pub refill_deferred: u64,
    /// Posted buffers recycled by cancellation.
    pub discarded: u64,
    /// Implausible hardware consumer readings.
    pub bad_consumer: u64,
}

impl RxStats {
    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            refill_deferred: self.refill_deferred.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            bad_consumer: self.bad_consumer.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Phase {
    Stopped,
    Running,
    Cancelled,
}

struct RxState {
    /// Oldest posted slot.
    consumer: u16,
    /// Next slot to fill.
    producer: u16,
    /// Buffer posted in each slot.
    slots: Vec<Option<BufferId>>,
    phase: Phase,
}

/// A receive descriptor ring of `size` slots fed from a [`BufferPool`].
pub struct RxRing<D: NicHardware> {
    hw: Arc<D>,
    pool: Arc<BufferPool>,
    size: usize,
    leading_pad: usize,
    state: Mutex<RxState>,
    stats: RxStats,
}

impl<D: NicHardware> RxRing<D> {
    /// Creates a stopped ring. Frames start `leading_pad` bytes into their
    /// buffer.
    pub fn new(
        hw: Arc<D>,
        pool: Arc<BufferPool>,
        size: usize,
        leading_pad: usize,
    ) -> RingResult<Self> {
        if !is_valid_ring_size(size) {
            return Err(RingError::InvalidConfig("rx ring size must be a power of two"));
        }
        if leading_pad >= pool.buffer_size() {
            return Err(RingError::InvalidConfig("rx buffer size"));
        }
        Ok(Self {
            hw,
            pool,
            size,
            leading_pad,
            state: Mutex::new(RxState {
                consumer: 0,
                producer: 0,
                slots: alloc::vec![None; size],
                phase: Phase::Stopped,
            }),
            stats: RxStats::default(),
        })
    }

    /// Number of descriptor slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Most buffers that can be posted at once.
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// The pool this ring draws from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Fills every usable slot with a buffer and enables RX DMA.
    ///
    /// Buffers left over from a previous run are recycled first. Fails with
    /// [`RingError::InsufficientBuffers`] and posts nothing if the pool
    /// cannot fill the ring.
    pub fn start(&self) -> RingResult {
        let mut st = self.state.lock();
        self.hw.write(Register::RxDmaControl, DmaControl::empty().bits());
        self.recycle_posted(&mut st);

        let needed = self.capacity();
        let mut batch = Vec::with_capacity(needed);
        while batch.len() < needed {
            match self.pool.acquire_free() {
                Some(id) => batch.push(id),
                None => break,
            }
        }
        if batch.len() < needed {
            let available = batch.len();
            for id in batch {
                self.pool.put_back(id)?;
            }
            st.phase = Phase::Stopped;
            warn!("rx ring: {} buffers free, {} needed", available, needed);
            return Err(RingError::InsufficientBuffers { needed, available });
        }

        let consumer = self.hw.read(Register::RxConsumer) as u16;
        st.consumer = consumer;
        st.producer = consumer;
        for id in batch {
            self.post_buffer(&mut st, id)?;
        }
        st.phase = Phase::Running;
        fence(Ordering::Release);
        self.hw.write(Register::RxProducer, st.producer as u32);
        self.hw
            .write(Register::RxDmaControl, DmaControl::ENABLE.bits());
        debug!(
            "rx ring: started at counter {} with {} buffers",
            consumer, needed
        );
        Ok(())
    }

    /// Stops RX DMA. The next [`RxRing::advance`] recycles every posted
    /// buffer and delivers nothing. Calling it again has no effect.
    pub fn cancel(&self) {
        let mut st = self.state.lock();
        if st.phase == Phase::Cancelled {
            return;
        }
        self.hw.write(Register::RxDmaControl, DmaControl::empty().bits());
        st.phase = Phase::Cancelled;
        debug!(
            "rx ring: cancelled with {} buffers posted",
            distance(st.producer, st.consumer, self.size)
        );
    }

    /// Delivers completed frames and refills the ring.
    ///
    /// Frames are passed to `sink` in arrival order, with the ring lock
    /// held. Returns the number of delivered frames.
    pub fn advance<S: RxDelivery + ?Sized>(&self, sink: &S) -> usize {
        let mut st = self.state.lock();
        match st.phase {
            Phase::Stopped => return 0,
            Phase::Cancelled => {
                self.recycle_posted(&mut st);
                return 0;
            }
            Phase::Running => {}
        }

        let consumer = self.hw.read(Register::RxConsumer) as u16;
        let posted = distance(st.producer, st.consumer, self.size);
        // Both counters run over the full 16-bit space, so the raw difference
        // exposes readings more than a ring ahead.
        let mut ready = consumer.wrapping_sub(st.consumer) as usize;
        if ready > posted {
            warn!(
                "rx ring: consumer {} outside posted window [{}, {}]",
                consumer, st.consumer, st.producer
            );
            self.stats.bad_consumer.fetch_add(1, Ordering::Relaxed);
            ready = 0;
        }
        // Completion words and buffer contents are read after the counter.
        fence(Ordering::Acquire);

        let mut delivered = 0;
        let mut filled = 0;
        for _ in 0..ready {
            let slot = slot_of(st.consumer, self.size);
            let id = st.slots[slot].take();
            st.consumer = advance(st.consumer, 1);
            if let Some(id) = id {
                let completion = self.hw.read_rx(slot);
                if self.deliver(id, completion, sink) {
                    delivered += 1;
                }
            } else {
                error!("rx ring: slot {} completed without a buffer", slot);
            }
            filled += self.refill(&mut st);
        }
        filled += self.refill(&mut st);

        if filled > 0 {
            fence(Ordering::Release);
            self.hw.write(Register::RxProducer, st.producer as u32);
        }
        if ready > 0 {
            trace!(
                "rx ring: {} completions, {} delivered, {} refilled",
                ready, delivered, filled
            );
        }
        delivered
    }

    fn deliver<S: RxDelivery + ?Sized>(
        &self,
        id: BufferId,
        completion: RxCompletion,
        sink: &S,
    ) -> bool {
        let len = completion.len as usize;
        if !completion.is_whole_frame()
            || len < self.leading_pad
            || len > self.pool.buffer_size()
        {
            trace!("rx ring: dropping {:?}", completion);
            self.stats.framing_errors.fetch_add(1, Ordering::Relaxed);
            self.recycle(id);
            return false;
        }
        let Some(region) = self.pool.region(id) else {
            error!("rx ring: buffer {:?} outside pool", id);
            return false;
        };
        let data = unsafe { region.cpu_addr.add(self.leading_pad) };
        let handle = match self.pool.mark_delivered(id) {
            Ok(handle) => handle,
            Err(e) => {
                error!("rx ring: delivery failed: {}", e);
                return false;
            }
        };
        let frame = RxFrame {
            pool: self.pool.clone(),
            handle: ManuallyDrop::new(handle),
            data,
            len: len - self.leading_pad,
        };
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(frame.len as u64, Ordering::Relaxed);
        sink.on_rx_deliver(frame);
        true
    }

    fn recycle(&self, id: BufferId) {
        if let Err(e) = self.pool.recycle(id) {
            error!("rx ring: recycle failed: {}", e);
        }
    }

    /// Posts free buffers into empty slots, in order. Returns the number
    /// posted.
    fn refill(&self, st: &mut RxState) -> usize {
        let mut filled = 0;
        while distance(st.producer, st.consumer, self.size) < self.capacity() {
            let Some(id) = self.pool.acquire_free() else {
                self.stats.refill_deferred.fetch_add(1, Ordering::Relaxed);
                trace!("rx ring: pool empty, refill deferred");
                break;
            };
            if self.post_buffer(st, id).is_err() {
                break;
            }
            filled += 1;
        }
        filled
    }

    fn post_buffer(&self, st: &mut RxState, id: BufferId) -> RingResult {
        let Some(addr) = self.pool.bus_addr(id) else {
            self.pool.put_back(id)?;
            return Err(RingError::BadState);
        };
        let slot = slot_of(st.producer, self.size);
        self.hw
            .write_rx(slot, addr, self.pool.buffer_size() as u32);
        self.pool.mark_posted(id)?;
        st.slots[slot] = Some(id);
        st.producer = advance(st.producer, 1);
        Ok(())
    }

    /// Returns every posted buffer to the pool. DMA must be off.
    fn recycle_posted(&self, st: &mut RxState) {
        let mut discarded = 0;
        for id in st.slots.iter_mut().filter_map(Option::take) {
            self.recycle(id);
            discarded += 1;
        }
        st.producer = st.consumer;
        if discarded > 0 {
            self.stats
                .discarded
                .fetch_add(discarded, Ordering::Relaxed);
            debug!("rx ring: recycled {} posted buffers", discarded);
        }
    }

    /// Buffers currently posted.
    pub fn posted(&self) -> usize {
        let st = self.state.lock();
        distance(st.producer, st.consumer, self.size)
    }

    /// Usable slots without a buffer.
    pub fn unfilled(&self) -> usize {
        self.capacity() - self.posted()
    }

    /// Whether [`RxRing::cancel`] was called since the last start.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().phase == Phase::Cancelled
    }

    /// Ring counters.
    pub fn stats(&self) -> &RxStats {
        &self.stats
    }
}
