// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! One-shot completion notifications.
//!
//! The upper layer arms a direction when it wants to hear about new
//! completions. The next hardware signal for that direction disarms it,
//! masks the interrupt source and notifies the upper layer exactly once.
//! Further signals are dropped until the direction is armed again.

use alloc::sync::Arc;
use core::{
    hint::spin_loop,
    sync::atomic::{AtomicUsize, Ordering},
};

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    NotificationSink,
    hal::{Register, RegisterIo},
};

bitflags! {
    /// Interrupt causes in the status, clear and enable registers.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct IrqMask: u32 {
        /// TX descriptors were consumed.
        const TX_DONE = 1 << 0;
        /// RX descriptors were filled.
        const RX_DONE = 1 << 1;
    }
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Direction {
    /// Transmit.
    Tx,
    /// Receive.
    Rx,
}

impl Direction {
    /// Both directions.
    pub const ALL: [Direction; 2] = [Direction::Tx, Direction::Rx];

    /// Interrupt cause of this direction.
    pub const fn mask(self) -> IrqMask {
        match self {
            Direction::Tx => IrqMask::TX_DONE,
            Direction::Rx => IrqMask::RX_DONE,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Arbitrates between arming requests and hardware signals.
pub struct NotificationArbiter<R: RegisterIo> {
    regs: Arc<R>,
    armed: Mutex<[bool; 2]>,
    in_flight: [AtomicUsize; 2],
}

impl<R: RegisterIo> NotificationArbiter<R> {
    /// Creates an arbiter with both directions disarmed and masks all
    /// interrupt causes.
    pub fn new(regs: Arc<R>) -> Self {
        regs.write(Register::IrqEnable, IrqMask::empty().bits());
        Self {
            regs,
            armed: Mutex::new([false; 2]),
            in_flight: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    fn enable_mask(armed: &[bool; 2]) -> IrqMask {
        Direction::ALL
            .into_iter()
            .filter(|d| armed[d.index()])
            .fold(IrqMask::empty(), |mask, d| mask | d.mask())
    }

    /// Arms or disarms notifications for `direction`.
    ///
    /// Disarming waits until a notification already being delivered for
    /// that direction has returned, so it must not be called from inside
    /// that notification.
    pub fn set_armed(&self, direction: Direction, enabled: bool) {
        {
            let mut armed = self.armed.lock();
            armed[direction.index()] = enabled;
            self.regs
                .write(Register::IrqEnable, Self::enable_mask(&armed).bits());
        }
        trace!("notify: {:?} armed={}", direction, enabled);
        if !enabled {
            while self.in_flight[direction.index()].load(Ordering::Acquire) != 0 {
                spin_loop();
            }
        }
    }

    /// Handles a hardware signal carrying the `pending` causes.
    ///
    /// Acknowledges `pending`, disarms every armed direction among them and
    /// notifies `sink` once for each. Returns the directions notified.
    pub fn on_hardware_signal<S: NotificationSink + ?Sized>(
        &self,
        pending: IrqMask,
        sink: &S,
    ) -> IrqMask {
        if pending.is_empty() {
            return IrqMask::empty();
        }
        self.regs.write(Register::IrqClear, pending.bits());

        let fired = {
            let mut armed = self.armed.lock();
            let mut fired = IrqMask::empty();
            for direction in Direction::ALL {
                if pending.contains(direction.mask()) && armed[direction.index()] {
                    armed[direction.index()] = false;
                    self.in_flight[direction.index()].fetch_add(1, Ordering::AcqRel);
                    fired |= direction.mask();
                }
            }
            self.regs
                .write(Register::IrqEnable, Self::enable_mask(&armed).bits());
            fired
        };

        for direction in Direction::ALL {
            if fired.contains(direction.mask()) {
                sink.notify(direction);
                self.in_flight[direction.index()].fetch_sub(1, Ordering::AcqRel);
            }
        }
        fired
    }

    /// Whether `direction` is armed.
    pub fn is_armed(&self, direction: Direction) -> bool {
        self.armed.lock()[direction.index()]
    }

    /// Causes currently enabled in hardware.
    pub fn enabled_mask(&self) -> IrqMask {
        Self::enable_mask(&self.armed.lock())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;
    use crate::mock::MockNic;

    fn arbiter() -> (Arc<MockNic>, NotificationArbiter<MockNic>) {
        let nic = Arc::new(MockNic::new(2, 2));
        nic.set_reg(Register::IrqEnable, u32::MAX);
        let arbiter = NotificationArbiter::new(nic.clone());
        (nic, arbiter)
    }

    #[test]
    fn test_new_masks_everything() {
        let (nic, arbiter) = arbiter();
        assert_eq!(nic.reg(Register::IrqEnable), 0);
        assert_eq!(arbiter.enabled_mask(), IrqMask::empty());
    }

    #[test]
    fn test_one_shot() {
        let (nic, arbiter) = arbiter();
        let seen = RefCell::new(Vec::new());
        let sink = |d: Direction| seen.borrow_mut().push(d);

        arbiter.set_armed(Direction::Rx, true);
        assert_eq!(nic.reg(Register::IrqEnable), IrqMask::RX_DONE.bits());

        assert_eq!(arbiter.on_hardware_signal(IrqMask::RX_DONE, &sink), IrqMask::RX_DONE);
        assert_eq!(nic.reg(Register::IrqClear), IrqMask::RX_DONE.bits());
        assert_eq!(nic.reg(Register::IrqEnable), 0);
        assert!(!arbiter.is_armed(Direction::Rx));

        assert_eq!(arbiter.on_hardware_signal(IrqMask::RX_DONE, &sink), IrqMask::empty());
        assert_eq!(*seen.borrow(), [Direction::Rx]);
    }

    #[test]
    fn test_directions_are_independent() {
        let (nic, arbiter) = arbiter();
        let seen = RefCell::new(Vec::new());
        let sink = |d: Direction| seen.borrow_mut().push(d);

        arbiter.set_armed(Direction::Tx, true);
        arbiter.set_armed(Direction::Rx, true);
        assert_eq!(arbiter.enabled_mask(), IrqMask::all());

        assert_eq!(arbiter.on_hardware_signal(IrqMask::TX_DONE, &sink), IrqMask::TX_DONE);
        assert_eq!(nic.reg(Register::IrqEnable), IrqMask::RX_DONE.bits());
        assert!(arbiter.is_armed(Direction::Rx));

        assert_eq!(arbiter.on_hardware_signal(IrqMask::all(), &sink), IrqMask::RX_DONE);
        assert_eq!(*seen.borrow(), [Direction::Tx, Direction::Rx]);
    }

    #[test]
    fn test_disarm_before_signal() {
        let (nic, arbiter) = arbiter();
        let seen = RefCell::new(0);
        arbiter.set_armed(Direction::Tx, true);
        arbiter.set_armed(Direction::Tx, false);
        assert_eq!(nic.reg(Register::IrqEnable), 0);
        let fired = arbiter.on_hardware_signal(IrqMask::TX_DONE, &|_: Direction| *seen.borrow_mut() += 1);
        assert!(fired.is_empty());
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn test_rearm_from_callback() {
        let (_nic, arbiter) = arbiter();
        let sink = |d: Direction| arbiter.set_armed(d, true);
        arbiter.set_armed(Direction::Tx, true);
        arbiter.on_hardware_signal(IrqMask::TX_DONE, &sink);
        assert!(arbiter.is_armed(Direction::Tx));
    }
}
