// SPDX-License-Identifier: MPL-2.0

//! Address spaces.
//!
//! An address space owns a root paging structure and a virtual-range
//! allocator for its half of the address space. Mutations take the
//! per-address-space spin lock; translation reads are lock-free (see the
//! ordering notes in [`crate::mm::page_table`]). Unmapping invalidates
//! locally first, then broadcasts a range-invalidation IPI and blocks
//! until every other CPU has acknowledged.

use core::ops::Range;

use crate::mm::boot_alloc::BootAllocator;
use crate::mm::page_table::{
    page_size, page_walk, KernelMode, PageTable, PageTableMode, UserMode,
};
use crate::mm::vrange::VirtRangeAllocator;
use crate::mm::{is_aligned, Paddr, Vaddr, VmProt, PAGE_SIZE};
use crate::prelude::Result;
use crate::smp;
use crate::sync::SpinLock;
use crate::trap::disable_local;

type NativeEntry = crate::arch::mm::PageTableEntry;
type NativeConsts = crate::arch::mm::PagingConsts;

/// An owning handle over a root paging structure plus the virtual-range
/// allocator for the covered half.
pub struct AddressSpace<M: PageTableMode> {
    root_paddr: Paddr,
    pt: SpinLock<PageTable<M, NativeEntry, NativeConsts>>,
    /// Reached from interrupt context (driver probe paths allocate MMIO
    /// windows), hence locked with IRQs disabled.
    allocator: SpinLock<VirtRangeAllocator>,
}

impl AddressSpace<KernelMode> {
    /// Creates the kernel address space with its kernel-half root tables
    /// preallocated.
    pub fn new_kernel(alloc: &'static SpinLock<BootAllocator>) -> Result<Self> {
        let pt = PageTable::new_kernel(alloc)?;
        Ok(Self {
            root_paddr: pt.root_paddr(),
            pt: SpinLock::new(pt),
            allocator: SpinLock::new(VirtRangeAllocator::new(KernelMode::VADDR_RANGE)),
        })
    }

    /// Creates a user address space that shares this kernel half by
    /// aliasing the preallocated top-level entries.
    pub fn create_user(
        &self,
        alloc: &'static SpinLock<BootAllocator>,
    ) -> Result<AddressSpace<UserMode>> {
        let pt = self.pt.lock_irq_disabled().derive_user(alloc)?;
        Ok(AddressSpace {
            root_paddr: pt.root_paddr(),
            pt: SpinLock::new(pt),
            allocator: SpinLock::new(VirtRangeAllocator::new(UserMode::VADDR_RANGE)),
        })
    }
}

impl<M: PageTableMode> AddressSpace<M> {
    /// The physical address of the root paging structure.
    pub fn root_paddr(&self) -> Paddr {
        self.root_paddr
    }

    pub fn range_allocator(&self) -> &SpinLock<VirtRangeAllocator> {
        &self.allocator
    }

    pub fn map_page(&self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.pt.lock_irq_disabled().map_page(vaddr, paddr, prot)
    }

    pub fn map_huge_page(&self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.pt.lock_irq_disabled().map_huge_page(vaddr, paddr, prot)
    }

    pub fn map_range(
        &self,
        vrange: Range<Vaddr>,
        prange: Range<Paddr>,
        prot: VmProt,
    ) -> Result<()> {
        Self::check_ranges(&vrange, &prange, PAGE_SIZE);

        let mut pt = self.pt.lock_irq_disabled();
        for offset in (0..vrange.end - vrange.start).step_by(PAGE_SIZE) {
            pt.map_page(vrange.start + offset, prange.start + offset, prot)?;
        }
        Ok(())
    }

    pub fn map_huge_range(
        &self,
        vrange: Range<Vaddr>,
        prange: Range<Paddr>,
        prot: VmProt,
    ) -> Result<()> {
        let huge = page_size::<NativeConsts>(2);
        Self::check_ranges(&vrange, &prange, huge);

        let mut pt = self.pt.lock_irq_disabled();
        for offset in (0..vrange.end - vrange.start).step_by(huge) {
            pt.map_huge_page(vrange.start + offset, prange.start + offset, prot)?;
        }
        Ok(())
    }

    /// Maps assuming every intermediate table already exists; the
    /// bootstrap path before the page allocator is generally usable.
    pub fn early_map_page(&self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.pt.lock_irq_disabled().early_map_page(vaddr, paddr, prot)
    }

    pub fn early_map_huge_page(&self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.pt
            .lock_irq_disabled()
            .early_map_huge_page(vaddr, paddr, prot)
    }

    pub fn early_map_range(
        &self,
        vrange: Range<Vaddr>,
        prange: Range<Paddr>,
        prot: VmProt,
    ) -> Result<()> {
        Self::check_ranges(&vrange, &prange, PAGE_SIZE);

        let mut pt = self.pt.lock_irq_disabled();
        for offset in (0..vrange.end - vrange.start).step_by(PAGE_SIZE) {
            pt.early_map_page(vrange.start + offset, prange.start + offset, prot)?;
        }
        Ok(())
    }

    pub fn early_map_huge_range(
        &self,
        vrange: Range<Vaddr>,
        prange: Range<Paddr>,
        prot: VmProt,
    ) -> Result<()> {
        let huge = page_size::<NativeConsts>(2);
        Self::check_ranges(&vrange, &prange, huge);

        let mut pt = self.pt.lock_irq_disabled();
        for offset in (0..vrange.end - vrange.start).step_by(huge) {
            pt.early_map_huge_page(vrange.start + offset, prange.start + offset, prot)?;
        }
        Ok(())
    }

    /// Unmaps one page: clears the leaf locally, invalidates the local
    /// TLB entry, then broadcasts a range invalidation and blocks until
    /// every other CPU has acknowledged it.
    pub fn unmap_page(&self, vaddr: Vaddr) {
        let _irq_guard = disable_local();

        self.pt.lock().unmap_page(vaddr);
        smp::broadcast_range_invalidation(vaddr..vaddr + PAGE_SIZE);
    }

    /// Unmaps a range with a single invalidation broadcast at the end.
    pub fn unmap_range(&self, range: Range<Vaddr>) {
        bug_on!(!is_aligned(range.start, PAGE_SIZE));

        let _irq_guard = disable_local();

        {
            let mut pt = self.pt.lock();
            for vaddr in range.clone().step_by(PAGE_SIZE) {
                pt.unmap_page(vaddr);
            }
        }
        smp::broadcast_range_invalidation(range);
    }

    /// Lock-free software walk. `None` when any entry in the chain is not
    /// present.
    pub fn query(&self, vaddr: Vaddr) -> Option<(Paddr, VmProt)> {
        // SAFETY: The root frame lives as long as `self`; structure frames
        // are never freed while the address space is alive.
        unsafe { page_walk::<NativeEntry, NativeConsts>(self.root_paddr, vaddr) }
    }

    /// The frame backing `vaddr`, or 0 when nothing is mapped there.
    pub fn physical_address_of(&self, vaddr: Vaddr) -> Paddr {
        self.query(vaddr).map_or(0, |(paddr, _)| paddr)
    }

    /// Loads the root into the translation-base register unless it is
    /// already active.
    pub fn make_active(&self) {
        let _irq_guard = disable_local();

        if crate::arch::mm::current_page_table_paddr() == self.root_paddr {
            return;
        }
        // SAFETY: The root references a fully-built paging structure, and
        // its kernel half aliases the preallocated kernel tables, so the
        // kernel keeps running after the switch.
        unsafe { crate::arch::mm::activate_page_table(self.root_paddr) };
    }

    fn check_ranges(vrange: &Range<Vaddr>, prange: &Range<Paddr>, granularity: usize) {
        bug_on!(
            vrange.end - vrange.start != prange.end - prange.start,
            "virtual and physical range lengths differ"
        );
        bug_on!(!is_aligned(vrange.start, granularity));
        bug_on!(!is_aligned(prange.start, granularity));
        bug_on!(!is_aligned(vrange.end - vrange.start, granularity));
    }
}
