// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Error types of the ring engine.

use core::fmt;

/// The error type for ring engine operations.
///
/// Only caller misuse and setup failures are errors. Running out of ring
/// slots or receive buffers during `advance` is normal contention and shows
/// up as partial progress instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RingError {
    /// A packet without fragments was submitted.
    EmptyPacket,
    /// The packet needs more descriptors than the ring can ever hold.
    PacketTooLarge {
        /// Fragments in the rejected packet.
        fragments: usize,
        /// Usable ring capacity (`N - 1`).
        capacity: usize,
    },
    /// Too many packets are outstanding, try again after completions.
    RingFull,
    /// The return handle does not name a delivered buffer of this pool.
    InvalidHandle,
    /// A buffer was driven through an illegal state transition.
    BadState,
    /// DMA memory could not be allocated.
    OutOfMemory,
    /// The buffer pool cannot fill the receive ring.
    InsufficientBuffers {
        /// Buffers required to fill the ring.
        needed: usize,
        /// Free buffers in the pool.
        available: usize,
    },
    /// The ring configuration is inconsistent.
    InvalidConfig(&'static str),
}

impl RingError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            RingError::EmptyPacket => "Packet has no fragments",
            RingError::PacketTooLarge { .. } => "Packet exceeds ring capacity",
            RingError::RingFull => "Ring is full",
            RingError::InvalidHandle => "Invalid return handle",
            RingError::BadState => "Bad buffer state",
            RingError::OutOfMemory => "Out of DMA memory",
            RingError::InsufficientBuffers { .. } => "Not enough receive buffers",
            RingError::InvalidConfig(_) => "Invalid ring configuration",
        }
    }

    /// Returns `true` for conditions that resolve once hardware or the
    /// upper layer makes progress.
    pub const fn is_transient(&self) -> bool {
        matches!(self, RingError::RingFull)
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::PacketTooLarge {
                fragments,
                capacity,
            } => write!(
                f,
                "{}: {} fragments, {} usable slots",
                self.message(),
                fragments,
                capacity
            ),
            RingError::InsufficientBuffers { needed, available } => write!(
                f,
                "{}: need {}, have {}",
                self.message(),
                needed,
                available
            ),
            RingError::InvalidConfig(reason) => write!(f, "{}: {}", self.message(), reason),
            _ => f.write_str(self.message()),
        }
    }
}

/// A specialized `Result` type for ring operations.
pub type RingResult<T = ()> = Result<T, RingError>;
