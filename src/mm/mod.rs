// SPDX-License-Identifier: MPL-2.0

//! Virtual memory and physical memory management.

pub mod address_space;
pub mod boot_alloc;
#[cfg(target_os = "none")]
pub mod heap_allocator;
pub mod kspace;
pub mod page_table;
pub mod vrange;

use core::sync::atomic::{AtomicUsize, Ordering};

/// A physical address. Carries no provenance.
pub type Paddr = usize;
/// A virtual address.
pub type Vaddr = usize;

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

const_assert!(PAGE_SIZE.is_power_of_two());

bitflags::bitflags! {
    /// The abstract protection of a mapping.
    ///
    /// Translation to native entry bits: no `READ` means not present,
    /// `WRITE` sets the writable bit, no `EXEC` sets the no-execute bit and
    /// no `KERNEL` sets the user-accessible bit.
    pub struct VmProt: u8 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const EXEC   = 1 << 2;
        const KERNEL = 1 << 3;

        const RW  = Self::READ.bits | Self::WRITE.bits;
        const RX  = Self::READ.bits | Self::EXEC.bits;
        const RWX = Self::READ.bits | Self::WRITE.bits | Self::EXEC.bits;
        const KERNEL_RW = Self::RW.bits | Self::KERNEL.bits;
        const KERNEL_RWX = Self::RWX.bits | Self::KERNEL.bits;
    }
}

/// Base of the direct map: the contiguous kernel-half window that mirrors
/// all usable physical memory. Zero until the kernel address space is
/// bootstrapped, which makes the mapping an identity one for early
/// (physical-is-virtual) and hosted environments.
static LINEAR_MAPPING_BASE: AtomicUsize = AtomicUsize::new(0);

pub fn paddr_to_vaddr(paddr: Paddr) -> Vaddr {
    LINEAR_MAPPING_BASE.load(Ordering::Relaxed) + paddr
}

pub fn vaddr_to_paddr(vaddr: Vaddr) -> Paddr {
    vaddr - LINEAR_MAPPING_BASE.load(Ordering::Relaxed)
}

pub(crate) fn set_linear_mapping_base(base: Vaddr) {
    LINEAR_MAPPING_BASE.store(base, Ordering::Relaxed);
}

pub const fn align_down(value: usize, alignment: usize) -> usize {
    value & !(alignment - 1)
}

pub const fn align_up(value: usize, alignment: usize) -> usize {
    align_down(value + alignment - 1, alignment)
}

pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}
