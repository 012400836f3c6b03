// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! DMA-coherent memory seam and bus address types.

use alloc::alloc::{alloc_zeroed, dealloc};
use core::{alloc::Layout, fmt, ptr::NonNull};

/// A bus memory address.
///
/// It's a wrapper type around an [`u64`].
#[repr(transparent)]
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DmaBusAddress(u64);

impl DmaBusAddress {
    /// Converts an [`u64`] to a bus address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Converts the address to an [`u64`].
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `offset` bytes further.
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

impl From<u64> for DmaBusAddress {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for DmaBusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DmaBusAddress")
            .field(&format_args!("{:#X}", self.0))
            .finish()
    }
}

/// A region of DMA-coherent memory.
///
/// The CPU address and the bus address stay fixed for the region's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct DmaRegion {
    /// Address the CPU uses to access this memory.
    pub cpu_addr: NonNull<u8>,
    /// Address the device uses to access this memory.
    pub bus_addr: DmaBusAddress,
    /// Size of the region in bytes.
    pub size: usize,
}

// The region is plain memory; synchronisation is up to its owner.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

/// Allocator of DMA-coherent memory, provided by the platform.
pub trait DmaAllocator: Send + Sync {
    /// Allocates a coherent region satisfying `layout`.
    ///
    /// Returns [`None`] if no such memory is available.
    fn allocate(&self, layout: Layout) -> Option<DmaRegion>;

    /// Frees a region previously returned by [`DmaAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `region` must come from this allocator with the same `layout`, and
    /// no device may still reference it.
    unsafe fn deallocate(&self, region: DmaRegion, layout: Layout);
}

/// Heap-backed allocator with identity bus mapping.
///
/// Bus addresses equal CPU addresses. Suitable for hosted environments,
/// IOMMU identity domains and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapDma;

impl DmaAllocator for HeapDma {
    fn allocate(&self, layout: Layout) -> Option<DmaRegion> {
        if layout.size() == 0 {
            return None;
        }
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(DmaRegion {
            cpu_addr: ptr,
            bus_addr: DmaBusAddress::new(ptr.as_ptr() as usize as u64),
            size: layout.size(),
        })
    }

    unsafe fn deallocate(&self, region: DmaRegion, layout: Layout) {
        unsafe { dealloc(region.cpu_addr.as_ptr(), layout) }
    }
}
