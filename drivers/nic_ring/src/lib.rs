// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! DMA descriptor-ring engine for network adapters.
//!
//! The engine bridges packets made of fragments to fixed-size hardware rings
//! of transmit and receive descriptors:
//!
//! - [`TxRing`] posts packet fragments in order and reclaims them once the
//!   hardware consumer counter has moved past them.
//! - [`RxRing`] keeps the receive ring filled with buffers from a
//!   [`BufferPool`] and delivers completed frames as zero-copy [`RxFrame`]s.
//! - [`NotificationArbiter`] arms one-shot completion interrupts.
//! - [`NicEngine`] ties them together over one [`NicHardware`] collaborator.
//!
//! Register access and descriptor layout are left to the device driver
//! through the [`RegisterIo`] and [`DescriptorIo`] traits, and DMA memory
//! comes from a [`DmaAllocator`].
//!
//! # Locking
//!
//! Each ring has its own spinlock, the TX intake queue and the pool free
//! list have theirs, and locks are only taken in ring, then intake or pool,
//! order. Callbacks run with the ring lock held: they may submit packets and
//! release buffers but must not advance, start or cancel the same ring.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

pub mod config;
pub mod dma;
pub mod engine;
pub mod error;
pub mod hal;
pub mod index;
pub mod notify;
pub mod packet;
pub mod pool;
pub mod rx;
pub mod tx;

#[cfg(test)]
mod mock;

pub use self::{
    config::RingConfig,
    dma::{DmaAllocator, DmaBusAddress, DmaRegion, HeapDma},
    engine::NicEngine,
    error::{RingError, RingResult},
    hal::{
        DescriptorIo, DmaControl, NicHardware, Register, RegisterIo, RxCompletion, RxStatus,
        TxDescriptor, TxFlags,
    },
    notify::{Direction, IrqMask, NotificationArbiter},
    packet::{Fragment, Packet},
    pool::{BufferId, BufferPool, BufferState, PoolCounts, ReturnHandle},
    rx::{RxFrame, RxRing, RxStats, RxStatsSnapshot},
    tx::{TxRing, TxStats, TxStatsSnapshot},
};

/// Receiver of completed transmit packets.
pub trait TxCompletion {
    /// Called once per packet, in submission order. Ignored packets come
    /// back with [`Packet::is_ignored`] set.
    fn on_tx_complete(&self, packet: Packet);
}

impl<F: Fn(Packet) + ?Sized> TxCompletion for F {
    fn on_tx_complete(&self, packet: Packet) {
        self(packet)
    }
}

/// Receiver of received frames.
pub trait RxDelivery {
    /// Called once per frame, in arrival order.
    fn on_rx_deliver(&self, frame: RxFrame);
}

impl<F: Fn(RxFrame) + ?Sized> RxDelivery for F {
    fn on_rx_deliver(&self, frame: RxFrame) {
        self(frame)
    }
}

/// Receiver of one-shot completion notifications.
pub trait NotificationSink {
    /// More completions are available in `direction`.
    fn notify(&self, direction: Direction);
}

impl<F: Fn(Direction) + ?Sized> NotificationSink for F {
    fn notify(&self, direction: Direction) {
        self(direction)
    }
}

/// Everything the engine calls back into.
pub trait UpperLayer: TxCompletion + RxDelivery + NotificationSink {}

impl<T: TxCompletion + RxDelivery + NotificationSink + ?Sized> UpperLayer for T {}
