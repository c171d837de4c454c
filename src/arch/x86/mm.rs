// SPDX-License-Identifier: MPL-2.0

//! x86-64 paging: the entry format and the TLB/translation-base hooks.

use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::registers::control::{Cr3, Cr4};
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

use crate::mm::page_table::{PageTableEntryTrait, PagingConstsTrait, PagingLevel};
use crate::mm::{Paddr, Vaddr, VmProt};

const PT_PRESENT: u64 = 1 << 0;
const PT_WRITE: u64 = 1 << 1;
const PT_USER: u64 = 1 << 2;
const PT_HUGE: u64 = 1 << 7;
const PT_NX: u64 = 1 << 63;

const MAX_PHYS_BITS: u64 = 52;
const PHYS_MASK: u64 = (1 << MAX_PHYS_BITS) - 1;
const PFN_MASK: u64 = PHYS_MASK & !0xfff;

/// Intel Xeon Phi x200 (KNL4): the Accessed and/or Dirty bits may be set
/// on an entry whose Present bit another logical processor has just
/// cleared. "No mapping" tests must mask them out.
const KNL4_ERRATUM_MASK: u64 = (1 << 5) | (1 << 6);

/// Whether 5-level paging (LA57) is enabled; probed once at early init.
static LA57: AtomicBool = AtomicBool::new(false);

const CR4_LA57: u64 = 1 << 12;

pub(super) fn probe_paging_levels() {
    let la57 = Cr4::read_raw() & CR4_LA57 != 0;
    LA57.store(la57, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug)]
pub struct PagingConsts {}

impl PagingConstsTrait for PagingConsts {
    const BASE_PAGE_SIZE: usize = 4096;
    const MAX_NR_LEVELS: PagingLevel = 5;
    const HIGHEST_TRANSLATION_LEVEL: PagingLevel = 2;
    const PTE_SIZE: usize = core::mem::size_of::<PageTableEntry>();

    fn nr_levels() -> PagingLevel {
        if LA57.load(Ordering::Relaxed) {
            5
        } else {
            4
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(u64);

impl PageTableEntryTrait for PageTableEntry {
    fn new_absent() -> Self {
        Self(0)
    }

    fn is_present(&self) -> bool {
        self.0 & PT_PRESENT != 0
    }

    fn is_vacant(&self) -> bool {
        self.0 & !KNL4_ERRATUM_MASK == 0
    }

    fn new_page(paddr: Paddr, huge: bool, prot: VmProt) -> Self {
        let mut value = (paddr as u64) & PFN_MASK;
        if huge {
            value |= PT_HUGE;
        }
        if prot.contains(VmProt::READ) {
            value |= PT_PRESENT;
        }
        if prot.contains(VmProt::WRITE) {
            value |= PT_WRITE;
        }
        if !prot.contains(VmProt::EXEC) {
            value |= PT_NX;
        }
        if !prot.contains(VmProt::KERNEL) {
            value |= PT_USER;
        }
        Self(value)
    }

    fn new_pt(paddr: Paddr, user: bool) -> Self {
        let mut value = ((paddr as u64) & PFN_MASK) | PT_PRESENT | PT_WRITE;
        if user {
            value |= PT_USER;
        }
        Self(value)
    }

    fn paddr(&self) -> Paddr {
        (self.0 & PFN_MASK) as Paddr
    }

    fn prot(&self) -> VmProt {
        let mut prot = VmProt::empty();
        if self.is_present() {
            prot |= VmProt::READ;
        }
        if self.0 & PT_WRITE != 0 {
            prot |= VmProt::WRITE;
        }
        if self.0 & PT_NX == 0 {
            prot |= VmProt::EXEC;
        }
        if self.0 & PT_USER == 0 {
            prot |= VmProt::KERNEL;
        }
        prot
    }

    fn is_huge(&self) -> bool {
        self.0 & PT_HUGE != 0
    }

    fn clear_present(&mut self) {
        self.0 &= !PT_PRESENT;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("raw", &format_args!("{:#x}", self.0))
            .field("paddr", &format_args!("{:#x}", self.paddr()))
            .field("prot", &self.prot())
            .finish()
    }
}

pub fn tlb_flush(vaddr: Vaddr) {
    x86_64::instructions::tlb::flush(VirtAddr::new(vaddr as u64));
}

pub fn tlb_flush_all() {
    x86_64::instructions::tlb::flush_all();
}

/// # Safety
///
/// Loading a new translation root changes every mapping at once; the root
/// must describe a structure that keeps the running kernel mapped.
pub unsafe fn activate_page_table(root_paddr: Paddr) {
    // SAFETY: Per the function contract.
    unsafe {
        Cr3::write(
            PhysFrame::from_start_address(PhysAddr::new(root_paddr as u64)).unwrap(),
            x86_64::registers::control::Cr3Flags::empty(),
        );
    }
}

pub fn current_page_table_paddr() -> Paddr {
    Cr3::read().0.start_address().as_u64() as Paddr
}
