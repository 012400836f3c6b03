// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Outbound packets.

use alloc::vec::Vec;

use crate::{
    dma::DmaBusAddress,
    hal::{TxDescriptor, TxFlags},
};

/// One contiguous piece of a packet, mapped to exactly one descriptor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Fragment {
    /// Device-visible address of the data.
    pub addr: DmaBusAddress,
    /// Length in bytes.
    pub len: u32,
}

impl Fragment {
    /// Creates a fragment.
    pub const fn new(addr: DmaBusAddress, len: u32) -> Self {
        Self { addr, len }
    }
}

/// A packet to transmit: an ordered list of fragments.
///
/// A packet does not own the memory its fragments point to. The upper
/// layer keeps that memory alive until the packet comes back through
/// [`crate::TxCompletion::on_tx_complete`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    cookie: usize,
    fragments: Vec<Fragment>,
    ignore: bool,
}

impl Packet {
    /// Creates a packet. `cookie` is returned untouched on completion.
    pub fn new(cookie: usize, fragments: Vec<Fragment>) -> Self {
        Self {
            cookie,
            fragments,
            ignore: false,
        }
    }

    /// Creates a single-fragment packet.
    pub fn single(cookie: usize, addr: DmaBusAddress, len: u32) -> Self {
        Self::new(cookie, alloc::vec![Fragment::new(addr, len)])
    }

    /// Appends a fragment.
    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    /// The upper layer's identifier of this packet.
    pub const fn cookie(&self) -> usize {
        self.cookie
    }

    /// The fragments, in transmit order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Number of descriptors the packet occupies.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Total payload length.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.len as usize).sum()
    }

    /// Returns true if the packet carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the packet is to be skipped instead of transmitted.
    pub const fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Marks the packet as not-to-be-transmitted. It keeps its queue
    /// position and completes in order.
    pub fn set_ignore(&mut self) {
        self.ignore = true;
    }

    /// Descriptors for this packet with frame delimiting flags applied.
    pub(crate) fn descriptors(&self) -> impl Iterator<Item = TxDescriptor> + '_ {
        let last = self.fragments.len().saturating_sub(1);
        self.fragments.iter().enumerate().map(move |(i, frag)| {
            let mut flags = TxFlags::empty();
            if i == 0 {
                flags |= TxFlags::FIRST | TxFlags::APPEND_CRC;
            }
            if i == last {
                flags |= TxFlags::LAST;
            }
            TxDescriptor {
                addr: frag.addr,
                len: frag.len,
                flags,
            }
        })
    }
}
