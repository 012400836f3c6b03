// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Ring index arithmetic.
//!
//! Hardware producer/consumer registers hold 16-bit sequence counters that
//! keep counting past the ring size and wrap at 65536. A descriptor slot is
//! the counter reduced modulo the ring size. Since every valid ring size is a
//! power of two no larger than [`MAX_RING_SIZE`], it divides 65536 and the
//! reduction commutes with the 16-bit wrap.

/// Number of distinct counter values.
pub const COUNTER_SPAN: usize = 1 << 16;

/// Smallest ring that can hold anything (one slot always stays empty).
pub const MIN_RING_SIZE: usize = 2;

/// Largest supported ring.
pub const MAX_RING_SIZE: usize = 1 << 15;

/// Returns `true` if `size` can be used as a descriptor ring size.
#[inline]
pub const fn is_valid_ring_size(size: usize) -> bool {
    size.is_power_of_two() && size >= MIN_RING_SIZE && size <= MAX_RING_SIZE
}

/// Descriptor slot addressed by `counter` in a ring of `size` slots.
#[inline]
pub const fn slot_of(counter: u16, size: usize) -> usize {
    counter as usize % size
}

/// Forward distance from `b` to `a`, modulo the ring size.
///
/// This is the number of descriptors between the two counters when walking
/// forward from `b`, and stays correct across the 16-bit wrap.
#[inline]
pub const fn distance(a: u16, b: u16, size: usize) -> usize {
    a.wrapping_sub(b) as usize % size
}

/// Moves `counter` forward by `n` descriptors.
#[inline]
pub const fn advance(counter: u16, n: usize) -> u16 {
    counter.wrapping_add(n as u16)
}
