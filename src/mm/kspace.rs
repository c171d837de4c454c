// SPDX-License-Identifier: MPL-2.0

//! Kernel address space bootstrap.
//!
//! The kernel half starts at [`KERNEL_BASE_VADDR`]. Its lowest part is the
//! direct map: every usable byte of physical memory is mirrored at
//! `LINEAR_MAPPING_BASE_VADDR + paddr`, mapped with huge pages. Above it
//! live the dynamically-allocated kernel windows (MMIO, vmalloc-style
//! areas), handed out by the kernel address space's range allocator. The
//! kernel binary itself sits in the top 2 GiB, where the linker put it.

use spin::Once;

use crate::boot::memory_region::MemoryRegionType;
use crate::mm::address_space::AddressSpace;
use crate::mm::boot_alloc::boot_allocator;
use crate::mm::page_table::{page_size, KernelMode};
use crate::mm::{align_down, align_up, Vaddr, VmProt};

/// Start of the kernel half.
pub const KERNEL_BASE_VADDR: Vaddr = 0xffff_8000_0000_0000;

/// First byte above the user half, exclusive.
pub const MAX_USERSPACE_VADDR: Vaddr = 0x0000_8000_0000_0000;

/// Base of the direct map of physical memory.
pub const LINEAR_MAPPING_BASE_VADDR: Vaddr = 0xffff_8000_0000_0000;

/// The direct map window spans 64 TiB of physical memory.
pub const LINEAR_MAPPING_SPAN: usize = 0x4000_0000_0000;

/// Kernel windows allocated at runtime come from this range.
pub const KERNEL_WINDOW_BASE_VADDR: Vaddr = LINEAR_MAPPING_BASE_VADDR + LINEAR_MAPPING_SPAN;
pub const KERNEL_WINDOW_END_VADDR: Vaddr = 0xffff_ffff_8000_0000;

static KERNEL_SPACE: Once<AddressSpace<KernelMode>> = Once::new();

/// The kernel address space. Exactly one exists process-wide.
pub fn kernel_space() -> &'static AddressSpace<KernelMode> {
    KERNEL_SPACE
        .get()
        .expect("the kernel address space is used before kspace::init")
}

/// Bootstraps the kernel address space: builds the direct map of all
/// usable physical memory out of huge pages, preallocates the kernel-half
/// root tables, and switches translation to the new root.
pub(crate) fn init() {
    let kernel_as = AddressSpace::new_kernel(boot_allocator())
        .unwrap_or_else(|err| panic!("cannot create the kernel address space: {:?}", err));

    let huge = page_size::<crate::arch::mm::PagingConsts>(2);
    for region in crate::boot::memory_regions() {
        let usable = matches!(
            region.typ(),
            MemoryRegionType::Free
                | MemoryRegionType::Reclaimable
                | MemoryRegionType::KernelBinary
                | MemoryRegionType::LoaderReclaimable
                | MemoryRegionType::Module
        );
        if !usable || region.is_empty() {
            continue;
        }

        let phys_base = align_down(region.base(), huge);
        let phys_end = align_up(region.end(), huge);
        kernel_as
            .map_huge_range(
                LINEAR_MAPPING_BASE_VADDR + phys_base..LINEAR_MAPPING_BASE_VADDR + phys_end,
                phys_base..phys_end,
                VmProt::KERNEL_RW,
            )
            .unwrap_or_else(|err| panic!("cannot build the direct map: {:?}", err));
    }

    kernel_as
        .range_allocator()
        .lock_irq_disabled()
        .reset_with(KERNEL_WINDOW_BASE_VADDR..KERNEL_WINDOW_END_VADDR);

    let kernel_as = KERNEL_SPACE.call_once(|| kernel_as);

    // The loader hands over with its own direct map at the same offset
    // (arch early init records the base), so activating the new root keeps
    // every table frame reachable.
    kernel_as.make_active();

    log::info!(
        "kernel address space active, root at {:#x}",
        kernel_as.root_paddr()
    );
}
