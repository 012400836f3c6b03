// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Transmit descriptor ring.
//!
//! Packets go through three stages:
//!
//! 1. `submit` validates the packet and drops it on the intake queue.
//! 2. `advance` moves it to the pending queue and, once enough slots are
//!    free, writes all its fragments into consecutive descriptors.
//! 3. A later `advance` observes the hardware consumer counter past the
//!    packet's last descriptor, frees its slots and completes it.
//!
//! Descriptors are posted in submission order and hardware consumes them in
//! order, so completions are FIFO.

use alloc::{collections::VecDeque, sync::Arc};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

use spin::Mutex;

use crate::{
    TxCompletion,
    error::{RingError, RingResult},
    hal::{DmaControl, NicHardware, Register},
    index::{advance, distance, is_valid_ring_size, slot_of},
    packet::Packet,
};

/// Counters of one TX ring.
#[derive(Debug, Default)]
pub struct TxStats {
    posted_packets: AtomicU64,
    posted_descriptors: AtomicU64,
    completed: AtomicU64,
    ignored: AtomicU64,
    backpressure: AtomicU64,
    bad_consumer: AtomicU64,
}

/// Point-in-time copy of [`TxStats`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct TxStatsSnapshot {
    /// Packets written into the ring.
    pub posted_packets: u64,
    /// Descriptors written into the ring.
    pub posted_descriptors: u64,
    /// Packets reclaimed after transmission.
    pub completed: u64,
    /// Packets completed without being transmitted.
    pub ignored: u64,
    /// Post walks stopped for lack of free slots.
    pub backpressure: u64,
    /// Implausible hardware consumer readings.
    pub bad_consumer: u64,
}

impl TxStats {
    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            posted_packets: self.posted_packets.load(Ordering::Relaxed),
            posted_descriptors: self.posted_descriptors.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
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

struct TxEntry {
    packet: Packet,
    /// Counter of the packet's last descriptor, once posted.
    last: Option<u16>,
}

struct TxState {
    /// Next descriptor to write.
    producer: u16,
    /// Oldest descriptor not yet reclaimed.
    reclaim: u16,
    /// Packets not yet completed, in submission order.
    pending: VecDeque<TxEntry>,
    /// Leading entries of `pending` already handled by the post walk.
    passed: usize,
    phase: Phase,
}

/// A transmit descriptor ring of `size` slots.
pub struct TxRing<D: NicHardware> {
    hw: Arc<D>,
    size: usize,
    queue_depth: usize,
    intake: Mutex<VecDeque<Packet>>,
    outstanding: AtomicUsize,
    state: Mutex<TxState>,
    stats: TxStats,
}

impl<D: NicHardware> TxRing<D> {
    /// Creates a ring of `size` descriptors accepting at most `queue_depth`
    /// outstanding packets.
    pub fn new(hw: Arc<D>, size: usize, queue_depth: usize) -> RingResult<Self> {
        if !is_valid_ring_size(size) {
            return Err(RingError::InvalidConfig("tx ring size must be a power of two"));
        }
        Ok(Self {
            hw,
            size,
            queue_depth,
            intake: Mutex::new(VecDeque::new()),
            outstanding: AtomicUsize::new(0),
            state: Mutex::new(TxState {
                producer: 0,
                reclaim: 0,
                pending: VecDeque::new(),
                passed: 0,
                phase: Phase::Stopped,
            }),
            stats: TxStats::default(),
        })
    }

    /// Number of descriptor slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Most descriptors that can be in flight at once.
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// Queues a packet for transmission.
    ///
    /// Safe to call from a completion callback.
    pub fn submit(&self, packet: Packet) -> RingResult {
        let fragments = packet.fragment_count();
        if fragments == 0 {
            return Err(RingError::EmptyPacket);
        }
        if fragments > self.capacity() {
            return Err(RingError::PacketTooLarge {
                fragments,
                capacity: self.capacity(),
            });
        }
        let depth = self.queue_depth;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < depth).then_some(n + 1)
            })
            .map_err(|_| RingError::RingFull)?;
        self.intake.lock().push_back(packet);
        Ok(())
    }

    /// Synchronises the ring with the hardware counters and enables DMA.
    ///
    /// Fails with [`RingError::BadState`] if descriptors are still in flight.
    pub fn start(&self) -> RingResult {
        let mut st = self.state.lock();
        if distance(st.producer, st.reclaim, self.size) != 0 {
            return Err(RingError::BadState);
        }
        let consumer = self.hw.read(Register::TxConsumer) as u16;
        st.producer = consumer;
        st.reclaim = consumer;
        st.phase = Phase::Running;
        self.hw.write(Register::TxProducer, consumer as u32);
        self.hw
            .write(Register::TxDmaControl, DmaControl::ENABLE.bits());
        debug!("tx ring: started at counter {}", consumer);
        Ok(())
    }

    /// Stops TX DMA and marks every pending packet ignored.
    ///
    /// The next [`TxRing::advance`] completes all of them in order without
    /// waiting for hardware. Calling it again has no effect.
    pub fn cancel(&self) {
        let mut st = self.state.lock();
        if st.phase == Phase::Cancelled {
            return;
        }
        self.hw.write(Register::TxDmaControl, DmaControl::empty().bits());
        st.phase = Phase::Cancelled;
        for entry in st.pending.iter_mut() {
            entry.packet.set_ignore();
        }
        debug!(
            "tx ring: cancelled with {} packets pending",
            st.pending.len()
        );
    }

    /// Posts queued packets, then reclaims the ones hardware has finished.
    ///
    /// Completed packets are passed to `sink` in submission order, with the
    /// ring lock held. Returns the number of completed packets. Before the
    /// first [`TxRing::start`] nothing is posted.
    pub fn advance<S: TxCompletion + ?Sized>(&self, sink: &S) -> usize {
        let mut st = self.state.lock();
        if st.phase == Phase::Stopped {
            return 0;
        }
        {
            let mut intake = self.intake.lock();
            st.pending
                .extend(intake.drain(..).map(|packet| TxEntry { packet, last: None }));
        }
        if st.phase == Phase::Cancelled {
            return self.drain_cancelled(&mut st, sink);
        }
        self.post(&mut st);
        self.reclaim(&mut st, sink)
    }

    fn post(&self, st: &mut TxState) {
        let mut posted = 0;
        while let Some(entry) = st.pending.get(st.passed) {
            if entry.packet.is_ignored() {
                st.passed += 1;
                continue;
            }
            let needed = entry.packet.fragment_count();
            let free = self.capacity() - distance(st.producer, st.reclaim, self.size);
            if needed > free {
                self.stats.backpressure.fetch_add(1, Ordering::Relaxed);
                trace!("tx ring: {} fragments pending, {} slots free", needed, free);
                break;
            }
            let mut counter = st.producer;
            for desc in entry.packet.descriptors() {
                self.hw.write_tx(slot_of(counter, self.size), &desc);
                counter = advance(counter, 1);
            }
            let index = st.passed;
            st.pending[index].last = Some(counter.wrapping_sub(1));
            st.producer = counter;
            st.passed += 1;
            posted += needed;
            self.stats.posted_packets.fetch_add(1, Ordering::Relaxed);
        }
        if posted > 0 {
            self.stats
                .posted_descriptors
                .fetch_add(posted as u64, Ordering::Relaxed);
            // Descriptor writes must be visible before the doorbell.
            fence(Ordering::Release);
            self.hw.write(Register::TxProducer, st.producer as u32);
            trace!("tx ring: posted {} descriptors, producer {}", posted, st.producer);
        }
    }

    fn reclaim<S: TxCompletion + ?Sized>(&self, st: &mut TxState, sink: &S) -> usize {
        let consumer = self.hw.read(Register::TxConsumer) as u16;
        fence(Ordering::Acquire);
        let in_flight = distance(st.producer, st.reclaim, self.size);
        let mut outstanding = distance(st.producer, consumer, self.size);
        // The raw difference also catches readings more than a ring ahead.
        if consumer.wrapping_sub(st.reclaim) as usize > in_flight {
            warn!(
                "tx ring: consumer {} outside in-flight window [{}, {}]",
                consumer, st.reclaim, st.producer
            );
            self.stats.bad_consumer.fetch_add(1, Ordering::Relaxed);
            outstanding = in_flight;
        }

        let mut done = 0;
        while st.passed > 0 {
            let Some(front) = st.pending.front() else {
                break;
            };
            if let Some(last) = front.last {
                // Hardware has consumed `last` once fewer descriptors are
                // outstanding than lie between `last` and the producer.
                if distance(st.producer, last, self.size) <= outstanding {
                    break;
                }
                st.reclaim = advance(last, 1);
            }
            let Some(entry) = st.pending.pop_front() else {
                break;
            };
            st.passed -= 1;
            self.complete(entry.packet, sink);
            done += 1;
        }
        if done > 0 {
            trace!("tx ring: reclaimed {} packets", done);
        }
        done
    }

    fn drain_cancelled<S: TxCompletion + ?Sized>(&self, st: &mut TxState, sink: &S) -> usize {
        let mut done = 0;
        while let Some(mut entry) = st.pending.pop_front() {
            entry.packet.set_ignore();
            self.complete(entry.packet, sink);
            done += 1;
        }
        // DMA is off: the abandoned descriptors no longer count as in flight.
        st.passed = 0;
        st.reclaim = st.producer;
        done
    }

    fn complete<S: TxCompletion + ?Sized>(&self, packet: Packet, sink: &S) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if packet.is_ignored() {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        sink.on_tx_complete(packet);
    }

    /// Descriptors posted and not yet reclaimed.
    pub fn in_flight(&self) -> usize {
        let st = self.state.lock();
        distance(st.producer, st.reclaim, self.size)
    }

    /// Descriptors available for posting.
    pub fn free_slots(&self) -> usize {
        self.capacity() - self.in_flight()
    }

    /// Packets queued and not yet posted.
    pub fn pending(&self) -> usize {
        let st = self.state.lock();
        let queued = st.pending.len() - st.passed;
        queued + self.intake.lock().len()
    }

    /// Packets submitted and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Software producer counter.
    pub fn producer(&self) -> u16 {
        self.state.lock().producer
    }

    /// Whether [`TxRing::cancel`] was called since the last start.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().phase == Phase::Cancelled
    }

    /// Ring counters.
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }
}
