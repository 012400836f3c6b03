// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The engine of one network adapter: both rings, the receive pool and the
//! notification arbiter over a single hardware collaborator.

use alloc::sync::Arc;

use crate::{
    RxDelivery, TxCompletion, UpperLayer,
    config::RingConfig,
    dma::DmaAllocator,
    error::RingResult,
    hal::{NicHardware, Register},
    notify::{Direction, IrqMask, NotificationArbiter},
    packet::Packet,
    pool::{BufferPool, ReturnHandle},
    rx::{RxFrame, RxRing},
    tx::TxRing,
};

/// Descriptor-ring engine of one adapter.
pub struct NicEngine<D: NicHardware> {
    hw: Arc<D>,
    config: RingConfig,
    pool: Arc<BufferPool>,
    tx: TxRing<D>,
    rx: RxRing<D>,
    arbiter: NotificationArbiter<D>,
}

impl<D: NicHardware> NicEngine<D> {
    /// Validates `config`, allocates the receive pool and builds both rings.
    ///
    /// Nothing is posted and DMA stays off until [`NicEngine::start`].
    pub fn new(
        hw: Arc<D>,
        allocator: Arc<dyn DmaAllocator>,
        config: RingConfig,
    ) -> RingResult<Self> {
        config.validate()?;
        let pool = BufferPool::create(
            allocator,
            config.rx_buffer_count,
            config.rx_buffer_size,
            config.rx_buffer_align,
        )?;
        let tx = TxRing::new(hw.clone(), config.tx_ring_size, config.tx_queue_depth)?;
        let rx = RxRing::new(
            hw.clone(),
            pool.clone(),
            config.rx_ring_size,
            config.rx_leading_pad,
        )?;
        let arbiter = NotificationArbiter::new(hw.clone());
        info!(
            "nic engine: tx {} slots, rx {} slots, {} rx buffers",
            config.tx_ring_size, config.rx_ring_size, config.rx_buffer_count
        );
        Ok(Self {
            hw,
            config,
            pool,
            tx,
            rx,
            arbiter,
        })
    }

    /// Starts both rings. If the receive ring cannot be filled the transmit
    /// ring is cancelled again.
    pub fn start(&self) -> RingResult {
        self.tx.start()?;
        if let Err(e) = self.rx.start() {
            self.tx.cancel();
            return Err(e);
        }
        Ok(())
    }

    /// Disarms notifications, cancels both rings and drains them.
    ///
    /// Every pending packet is completed as ignored and every posted receive
    /// buffer returns to the pool. Must not be called from a callback.
    pub fn stop<U: UpperLayer + ?Sized>(&self, upper: &U) {
        self.arbiter.set_armed(Direction::Tx, false);
        self.arbiter.set_armed(Direction::Rx, false);
        self.tx.cancel();
        self.rx.cancel();
        let ignored = self.tx.advance(upper);
        self.rx.advance(upper);
        debug!("nic engine: stopped, {} tx packets ignored", ignored);
    }

    /// Queues a packet for transmission. See [`TxRing::submit`].
    pub fn submit(&self, packet: Packet) -> RingResult {
        self.tx.submit(packet)
    }

    /// Posts queued packets and completes transmitted ones.
    pub fn advance_tx<S: TxCompletion + ?Sized>(&self, sink: &S) -> usize {
        self.tx.advance(sink)
    }

    /// Delivers received frames and refills the receive ring.
    pub fn advance_rx<S: RxDelivery + ?Sized>(&self, sink: &S) -> usize {
        self.rx.advance(sink)
    }

    /// Returns a buffer detached with [`RxFrame::into_handle`].
    pub fn release_rx_buffer(&self, handle: ReturnHandle) -> RingResult {
        self.pool.release(handle)
    }

    /// Arms or disarms the one-shot TX completion notification.
    pub fn arm_tx_notification(&self, enabled: bool) {
        self.arbiter.set_armed(Direction::Tx, enabled);
    }

    /// Arms or disarms the one-shot RX notification.
    pub fn arm_rx_notification(&self, enabled: bool) {
        self.arbiter.set_armed(Direction::Rx, enabled);
    }

    /// Services the adapter interrupt.
    ///
    /// Notifies `upper` for armed directions among the pending causes, then
    /// advances the rings whose causes were pending. Returns the pending
    /// causes.
    pub fn handle_interrupt<U: UpperLayer + ?Sized>(&self, upper: &U) -> IrqMask {
        let pending = IrqMask::from_bits_truncate(self.hw.read(Register::IrqStatus));
        if pending.is_empty() {
            return pending;
        }
        let fired = self.arbiter.on_hardware_signal(pending, upper);
        trace!("nic engine: irq {:?}, notified {:?}", pending, fired);
        if pending.contains(IrqMask::TX_DONE) {
            self.tx.advance(upper);
        }
        if pending.contains(IrqMask::RX_DONE) {
            self.rx.advance(upper);
        }
        pending
    }

    /// The transmit ring.
    pub fn tx(&self) -> &TxRing<D> {
        &self.tx
    }

    /// The receive ring.
    pub fn rx(&self) -> &RxRing<D> {
        &self.rx
    }

    /// The receive buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The notification arbiter.
    pub fn arbiter(&self) -> &NotificationArbiter<D> {
        &self.arbiter
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// The hardware collaborator.
    pub fn hardware(&self) -> &Arc<D> {
        &self.hw
    }
}

impl<D: NicHardware> Drop for NicEngine<D> {
    fn drop(&mut self) {
        self.hw
            .write(Register::IrqEnable, IrqMask::empty().bits());
        self.tx.cancel();
        self.rx.cancel();
        // DMA is off; hand posted buffers back before the pool goes away.
        self.rx.advance(&|_: RxFrame| {});
        let dropped = self.tx.outstanding();
        if dropped != 0 {
            warn!("nic engine: dropped with {} tx packets outstanding", dropped);
        }
    }
}
