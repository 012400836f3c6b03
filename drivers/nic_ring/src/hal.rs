// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Hardware collaborator interface.
//!
//! The engine never touches MMIO or descriptor memory directly. The
//! register map and the bit layout of descriptors belong to the device
//! driver, which implements [`RegisterIo`] and [`DescriptorIo`].

use bitflags::bitflags;
use strum::EnumCount;

use crate::dma::DmaBusAddress;

/// Registers the engine reads or writes.
#[repr(usize)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumCount)]
pub enum Register {
    /// TX producer counter (doorbell), written by software.
    TxProducer,
    /// TX consumer counter, advanced by hardware.
    TxConsumer,
    /// RX producer counter (doorbell), written by software.
    RxProducer,
    /// RX consumer counter, advanced by hardware.
    RxConsumer,
    /// Pending interrupt causes, see [`crate::IrqMask`].
    IrqStatus,
    /// Write-one-to-clear acknowledgement of interrupt causes.
    IrqClear,
    /// Enabled interrupt causes; cleared bits are masked in hardware.
    IrqEnable,
    /// TX DMA engine control, see [`DmaControl`].
    TxDmaControl,
    /// RX DMA engine control, see [`DmaControl`].
    RxDmaControl,
}

impl Register {
    /// Dense index of the register, for register-file implementations.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Word-sized register access.
///
/// Every access is a single atomic load or store of the named register.
pub trait RegisterIo: Send + Sync {
    /// Reads a register.
    fn read(&self, reg: Register) -> u32;

    /// Writes a register.
    ///
    /// Writing [`DmaControl::empty()`] to a DMA control register must not
    /// return before the engine has stopped touching descriptors and buffers.
    fn write(&self, reg: Register, value: u32);
}

bitflags! {
    /// Per-descriptor TX control flags.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct TxFlags: u32 {
        /// First fragment of a frame (start of packet).
        const FIRST = 1 << 0;
        /// Last fragment of a frame (end of packet).
        const LAST = 1 << 1;
        /// Hardware appends the frame CRC; set together with `FIRST`.
        const APPEND_CRC = 1 << 2;
    }
}

bitflags! {
    /// RX completion status bits.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct RxStatus: u32 {
        /// Buffer holds the start of a frame.
        const SOP = 1 << 0;
        /// Buffer holds the end of a frame.
        const EOP = 1 << 1;
        /// CRC mismatch.
        const CRC_ERROR = 1 << 2;
        /// Receive FIFO overrun.
        const OVERRUN = 1 << 3;
        /// Frame length not a whole number of octets.
        const NON_OCTET = 1 << 4;
        /// Frame longer than the configured maximum.
        const TOO_LONG = 1 << 5;
        /// Generic receive error signalled by the PHY.
        const RX_ERROR = 1 << 6;

        /// Any error bit.
        const ERRORS = Self::CRC_ERROR.bits()
            | Self::OVERRUN.bits()
            | Self::NON_OCTET.bits()
            | Self::TOO_LONG.bits()
            | Self::RX_ERROR.bits();
    }
}

bitflags! {
    /// DMA engine control word.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct DmaControl: u32 {
        /// Engine enabled.
        const ENABLE = 1 << 0;
    }
}

/// One TX descriptor as handed to the hardware collaborator.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TxDescriptor {
    /// Bus address of the fragment.
    pub addr: DmaBusAddress,
    /// Fragment length in bytes.
    pub len: u32,
    /// Frame delimiting flags.
    pub flags: TxFlags,
}

/// Completion word of an RX descriptor.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct RxCompletion {
    /// Status bits written by hardware.
    pub status: RxStatus,
    /// Bytes written into the buffer, including the leading pad.
    pub len: u32,
}

impl RxCompletion {
    /// A complete, error-free single-buffer frame.
    pub fn is_whole_frame(&self) -> bool {
        self.status.contains(RxStatus::SOP.union(RxStatus::EOP))
            && !self.status.intersects(RxStatus::ERRORS)
    }
}

/// Access to the TX and RX descriptor arrays.
pub trait DescriptorIo: Send + Sync {
    /// Writes TX descriptor `slot`.
    fn write_tx(&self, slot: usize, desc: &TxDescriptor);

    /// Writes RX descriptor `slot` with an empty buffer of `capacity` bytes,
    /// clearing its completion word.
    fn write_rx(&self, slot: usize, addr: DmaBusAddress, capacity: u32);

    /// Reads the completion word of RX descriptor `slot`.
    fn read_rx(&self, slot: usize) -> RxCompletion;
}

/// A device usable by the engine.
pub trait NicHardware: RegisterIo + DescriptorIo {}

impl<T: RegisterIo + DescriptorIo> NicHardware for T {}
