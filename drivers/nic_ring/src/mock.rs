// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! In-memory NIC for unit tests. Relies on [`crate::dma::HeapDma`] identity
//! mapping to write received data through bus addresses.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;
use strum::EnumCount;

use crate::{
    dma::DmaBusAddress,
    hal::{DescriptorIo, RegisterIo, Register, RxCompletion, RxStatus, TxDescriptor},
};

#[derive(Clone, Copy, Default)]
pub struct MockRxSlot {
    pub addr: DmaBusAddress,
    pub capacity: u32,
    pub completion: RxCompletion,
}

pub struct MockNic {
    regs: [AtomicU32; Register::COUNT],
    rx_size: usize,
    pub tx: Mutex<Vec<Option<TxDescriptor>>>,
    pub rx: Mutex<Vec<MockRxSlot>>,
}

impl MockNic {
    pub fn new(tx_size: usize, rx_size: usize) -> Self {
        Self {
            regs: core::array::from_fn(|_| AtomicU32::new(0)),
            rx_size,
            tx: Mutex::new(alloc::vec![None; tx_size]),
            rx: Mutex::new(alloc::vec![MockRxSlot::default(); rx_size]),
        }
    }

    pub fn reg(&self, reg: Register) -> u32 {
        self.regs[reg.index()].load(Ordering::SeqCst)
    }

    pub fn set_reg(&self, reg: Register, value: u32) {
        self.regs[reg.index()].store(value, Ordering::SeqCst);
    }

    /// Hardware transmits `n` more descriptors.
    pub fn consume_tx(&self, n: u16) {
        let c = self.reg(Register::TxConsumer) as u16;
        self.set_reg(Register::TxConsumer, c.wrapping_add(n) as u32);
    }

    /// Hardware receives `payload` into the next posted buffer, after `pad`
    /// bytes of padding.
    pub fn receive(&self, pad: usize, payload: &[u8], status: RxStatus) {
        let c = self.reg(Register::RxConsumer) as u16;
        let slot = c as usize % self.rx_size;
        let mut rx = self.rx.lock();
        let entry = &mut rx[slot];
        let len = pad + payload.len();
        assert!(len <= entry.capacity as usize);
        let dst = entry.addr.as_u64() as usize as *mut u8;
        unsafe { core::ptr::copy_nonoverlapping(payload.as_ptr(), dst.add(pad), payload.len()) };
        entry.completion = RxCompletion {
            status,
            len: len as u32,
        };
        self.set_reg(Register::RxConsumer, c.wrapping_add(1) as u32);
    }
}

impl RegisterIo for MockNic {
    fn read(&self, reg: Register) -> u32 {
        self.reg(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        self.set_reg(reg, value);
    }
}

impl DescriptorIo for MockNic {
    fn write_tx(&self, slot: usize, desc: &TxDescriptor) {
        self.tx.lock()[slot] = Some(*desc);
    }

    fn write_rx(&self, slot: usize, addr: DmaBusAddress, capacity: u32) {
        self.rx.lock()[slot] = MockRxSlot {
            addr,
            capacity,
            completion: RxCompletion::default(),
        };
    }

    fn read_rx(&self, slot: usize) -> RxCompletion {
        self.rx.lock()[slot].completion
    }
}
