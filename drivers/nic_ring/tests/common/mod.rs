// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Simulated adapter shared by the integration tests.
//!
//! Receive buffers come from [`HeapDma`], so a bus address is a usable CPU
//! pointer and the simulator can write frames straight into them.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use nic_ring::{
    DescriptorIo, Direction, DmaBusAddress, Fragment, HeapDma, IrqMask, NicEngine,
    NotificationSink, Packet, Register, RegisterIo, ReturnHandle, RingConfig, RxCompletion,
    RxDelivery, RxFrame, RxStatus, TxCompletion, TxDescriptor,
};
use strum::EnumCount;

pub const PAD: usize = nic_ring::config::DEFAULT_RX_LEADING_PAD;
pub const WHOLE: RxStatus = RxStatus::SOP.union(RxStatus::EOP);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Default)]
struct RxSlot {
    addr: DmaBusAddress,
    capacity: u32,
    completion: RxCompletion,
}

pub struct SimNic {
    regs: [AtomicU32; Register::COUNT],
    rx_size: usize,
    tx: Mutex<Vec<Option<TxDescriptor>>>,
    rx: Mutex<Vec<RxSlot>>,
}

impl SimNic {
    pub fn new(tx_size: usize, rx_size: usize) -> Self {
        Self {
            regs: std::array::from_fn(|_| AtomicU32::new(0)),
            rx_size,
            tx: Mutex::new(vec![None; tx_size]),
            rx: Mutex::new(vec![RxSlot::default(); rx_size]),
        }
    }

    pub fn reg(&self, reg: Register) -> u32 {
        self.regs[reg.index()].load(Ordering::SeqCst)
    }

    pub fn set_reg(&self, reg: Register, value: u32) {
        self.regs[reg.index()].store(value, Ordering::SeqCst);
    }

    pub fn tx_descriptor(&self, slot: usize) -> Option<TxDescriptor> {
        self.tx.lock().unwrap()[slot]
    }

    /// Descriptors posted and not yet consumed by the simulated MAC.
    pub fn tx_backlog(&self) -> u16 {
        let p = self.reg(Register::TxProducer) as u16;
        let c = self.reg(Register::TxConsumer) as u16;
        p.wrapping_sub(c)
    }

    /// Transmits up to `n` posted descriptors. Returns how many were sent.
    pub fn consume_tx(&self, n: u16) -> u16 {
        let n = n.min(self.tx_backlog());
        let c = self.reg(Register::TxConsumer) as u16;
        self.set_reg(Register::TxConsumer, c.wrapping_add(n) as u32);
        n
    }

    /// Buffers posted and not yet filled.
    pub fn rx_backlog(&self) -> u16 {
        let p = self.reg(Register::RxProducer) as u16;
        let c = self.reg(Register::RxConsumer) as u16;
        p.wrapping_sub(c)
    }

    /// Receives a frame into the next posted buffer. Returns false if the
    /// ring has no posted buffer or DMA is off.
    pub fn receive(&self, payload: &[u8], status: RxStatus) -> bool {
        if self.rx_backlog() == 0 || self.reg(Register::RxDmaControl) == 0 {
            return false;
        }
        let c = self.reg(Register::RxConsumer) as u16;
        let slot = c as usize % self.rx_size;
        {
            let mut rx = self.rx.lock().unwrap();
            let entry = &mut rx[slot];
            assert!(PAD + payload.len() <= entry.capacity as usize);
            let dst = entry.addr.as_u64() as usize as *mut u8;
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), dst.add(PAD), payload.len());
            }
            entry.completion = RxCompletion {
                status,
                len: (PAD + payload.len()) as u32,
            };
        }
        self.set_reg(Register::RxConsumer, c.wrapping_add(1) as u32);
        true
    }

    /// Latches interrupt causes into the status register.
    pub fn raise(&self, causes: IrqMask) {
        let status = self.reg(Register::IrqStatus) | causes.bits();
        self.set_reg(Register::IrqStatus, status);
    }
}

impl RegisterIo for SimNic {
    fn read(&self, reg: Register) -> u32 {
        self.reg(reg)
    }

    fn write(&self, reg: Register, value: u32) {
        match reg {
            Register::IrqClear => {
                let status = self.reg(Register::IrqStatus) & !value;
                self.set_reg(Register::IrqStatus, status);
                self.set_reg(Register::IrqClear, value);
            }
            _ => self.set_reg(reg, value),
        }
    }
}

impl DescriptorIo for SimNic {
    fn write_tx(&self, slot: usize, desc: &TxDescriptor) {
        self.tx.lock().unwrap()[slot] = Some(*desc);
    }

    fn write_rx(&self, slot: usize, addr: DmaBusAddress, capacity: u32) {
        self.rx.lock().unwrap()[slot] = RxSlot {
            addr,
            capacity,
            completion: RxCompletion::default(),
        };
    }

    fn read_rx(&self, slot: usize) -> RxCompletion {
        self.rx.lock().unwrap()[slot].completion
    }
}

/// Upper layer that records every callback.
#[derive(Default)]
pub struct Recorder {
    /// Cookies and ignore flags of completed packets.
    pub completed: Mutex<Vec<(usize, bool)>>,
    /// Payloads of received frames.
    pub received: Mutex<Vec<Vec<u8>>>,
    /// Handles of received frames, when `keep_buffers` is set.
    pub held: Mutex<Vec<ReturnHandle>>,
    /// Notifications.
    pub notified: Mutex<Vec<Direction>>,
    pub keep_buffers: bool,
}

impl Recorder {
    pub fn keeping_buffers() -> Self {
        Self {
            keep_buffers: true,
            ..Self::default()
        }
    }

    pub fn completed_cookies(&self) -> Vec<usize> {
        self.completed.lock().unwrap().iter().map(|c| c.0).collect()
    }
}

impl TxCompletion for Recorder {
    fn on_tx_complete(&self, packet: Packet) {
        self.completed
            .lock()
            .unwrap()
            .push((packet.cookie(), packet.is_ignored()));
    }
}

impl RxDelivery for Recorder {
    fn on_rx_deliver(&self, frame: RxFrame) {
        self.received.lock().unwrap().push(frame.data().to_vec());
        if self.keep_buffers {
            self.held.lock().unwrap().push(frame.into_handle());
        }
    }
}

impl NotificationSink for Recorder {
    fn notify(&self, direction: Direction) {
        self.notified.lock().unwrap().push(direction);
    }
}

/// Fake bus address of a TX fragment. The simulator never reads it.
pub fn tx_addr(cookie: usize, fragment: usize) -> DmaBusAddress {
    DmaBusAddress::new(0x10_0000 + (cookie as u64) * 0x1000 + (fragment as u64) * 0x100)
}

pub fn packet(cookie: usize, fragments: usize) -> Packet {
    Packet::new(
        cookie,
        (0..fragments)
            .map(|i| Fragment::new(tx_addr(cookie, i), 60))
            .collect(),
    )
}

pub fn engine(tx: usize, rx: usize) -> (Arc<SimNic>, NicEngine<SimNic>) {
    engine_with(RingConfig::with_ring_sizes(tx, rx))
}

pub fn engine_with(config: RingConfig) -> (Arc<SimNic>, NicEngine<SimNic>) {
    init_logger();
    let nic = Arc::new(SimNic::new(config.tx_ring_size, config.rx_ring_size));
    let engine = NicEngine::new(nic.clone(), Arc::new(HeapDma), config).unwrap();
    (nic, engine)
}
