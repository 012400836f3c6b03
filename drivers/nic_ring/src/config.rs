// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Ring engine configuration.

use crate::{
    error::{RingError, RingResult},
    index::is_valid_ring_size,
};

/// Default number of TX descriptors.
pub const DEFAULT_TX_RING_SIZE: usize = 256;
/// Default number of RX descriptors.
pub const DEFAULT_RX_RING_SIZE: usize = 256;
/// Default size of one receive buffer.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 2048;
/// Default alignment of receive buffers.
pub const DEFAULT_RX_BUFFER_ALIGN: usize = 64;
/// Bytes of alignment padding the MAC writes before each received frame.
pub const DEFAULT_RX_LEADING_PAD: usize = 2;
/// Default limit of outstanding TX packets.
pub const DEFAULT_TX_QUEUE_DEPTH: usize = 1024;

/// Static parameters of one adapter's rings and receive pool.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RingConfig {
    /// TX descriptor count, a power of two.
    pub tx_ring_size: usize,
    /// RX descriptor count, a power of two.
    pub rx_ring_size: usize,
    /// Receive buffers in the pool, at least `rx_ring_size`.
    pub rx_buffer_count: usize,
    /// Size of each receive buffer in bytes.
    pub rx_buffer_size: usize,
    /// Alignment of each receive buffer.
    pub rx_buffer_align: usize,
    /// Padding in front of every received frame.
    pub rx_leading_pad: usize,
    /// Maximum submitted-but-not-completed TX packets.
    pub tx_queue_depth: usize,
}

impl RingConfig {
    /// Configuration with the given ring sizes and default everything else.
    ///
    /// The receive pool is sized at twice the RX ring so the upper layer can
    /// hold a full ring of delivered frames while reception continues.
    pub const fn with_ring_sizes(tx_ring_size: usize, rx_ring_size: usize) -> Self {
        Self {
            tx_ring_size,
            rx_ring_size,
            rx_buffer_count: 2 * rx_ring_size,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            rx_buffer_align: DEFAULT_RX_BUFFER_ALIGN,
            rx_leading_pad: DEFAULT_RX_LEADING_PAD,
            tx_queue_depth: DEFAULT_TX_QUEUE_DEPTH,
        }
    }

    /// Usable TX slots.
    pub const fn tx_capacity(&self) -> usize {
        self.tx_ring_size - 1
    }

    /// Usable RX slots.
    pub const fn rx_capacity(&self) -> usize {
        self.rx_ring_size - 1
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> RingResult {
        if !is_valid_ring_size(self.tx_ring_size) {
            return Err(RingError::InvalidConfig("tx ring size must be a power of two"));
        }
        if !is_valid_ring_size(self.rx_ring_size) {
            return Err(RingError::InvalidConfig("rx ring size must be a power of two"));
        }
        if self.rx_buffer_count < self.rx_ring_size {
            return Err(RingError::InvalidConfig(
                "rx buffer count smaller than rx ring",
            ));
        }
        if self.rx_buffer_count > u16::MAX as usize {
            return Err(RingError::InvalidConfig("too many rx buffers"));
        }
        if !self.rx_buffer_align.is_power_of_two() {
            return Err(RingError::InvalidConfig("rx buffer alignment"));
        }
        if self.rx_buffer_size <= self.rx_leading_pad || self.rx_buffer_size > u32::MAX as usize {
            return Err(RingError::InvalidConfig("rx buffer size"));
        }
        if self.tx_queue_depth == 0 {
            return Err(RingError::InvalidConfig("tx queue depth"));
        }
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::with_ring_sizes(DEFAULT_TX_RING_SIZE, DEFAULT_RX_RING_SIZE)
    }
}
