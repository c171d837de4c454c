// SPDX-License-Identifier: MPL-2.0

//! The arch-neutral page table engine.
//!
//! A page table is a tree of fixed-fan-out table frames. The engine is
//! parameterised over the entry format ([`PageTableEntryTrait`]) and the
//! paging geometry ([`PagingConstsTrait`]); the number of levels in use is
//! a runtime value so one binary runs on both 4-level and 5-level
//! machines. Table frames are reached through the direct map and allocated
//! from the boot physical allocator.
//!
//! Mutations are serialised by the owning address space. Readers walk the
//! structures without the lock: a child table is fully zeroed before the
//! parent entry referencing it is made present, so a lock-free walk never
//! observes garbage.

use core::fmt::Debug;
use core::marker::PhantomData;
use core::ops::Range;

use alloc::vec::Vec;

use crate::mm::boot_alloc::BootAllocator;
use crate::mm::{is_aligned, kspace, paddr_to_vaddr, Paddr, Vaddr, VmProt};
use crate::prelude::Result;
use crate::sync::SpinLock;
use crate::Error;

#[cfg(test)]
mod test;

/// A level in a paging hierarchy. Level 1 is the leaf level; the root sits
/// at level `nr_levels()`.
pub type PagingLevel = usize;

/// A minimal set of constants that determines the geometry of the page
/// table, abstracting over the paging modes of common architectures.
pub trait PagingConstsTrait: Clone + Copy + Debug + 'static {
    /// The smallest page size.
    const BASE_PAGE_SIZE: usize;

    /// The most levels the architecture can ever run with.
    const MAX_NR_LEVELS: PagingLevel;

    /// The highest level at which an entry may directly translate an
    /// address; this bounds the largest supported page size.
    const HIGHEST_TRANSLATION_LEVEL: PagingLevel;

    /// The size of one entry.
    const PTE_SIZE: usize;

    /// The number of levels in use, resolved once at arch init.
    fn nr_levels() -> PagingLevel;
}

/// The number of page table entries per table frame.
pub(crate) const fn nr_ptes_per_node<C: PagingConstsTrait>() -> usize {
    C::BASE_PAGE_SIZE / C::PTE_SIZE
}

/// The number of virtual address bits used to index entries at one level.
const fn nr_pte_index_bits<C: PagingConstsTrait>() -> usize {
    nr_ptes_per_node::<C>().ilog2() as usize
}

/// The page size at a given level.
pub(crate) const fn page_size<C: PagingConstsTrait>(level: PagingLevel) -> usize {
    C::BASE_PAGE_SIZE << (nr_pte_index_bits::<C>() * (level - 1))
}

/// The index of a VA's entry in a page table frame at the given level.
pub(crate) const fn pte_index<C: PagingConstsTrait>(va: Vaddr, level: PagingLevel) -> usize {
    (va >> (C::BASE_PAGE_SIZE.ilog2() as usize + nr_pte_index_bits::<C>() * (level - 1)))
        & (nr_ptes_per_node::<C>() - 1)
}

/// The root-table index from which the kernel half begins. Entries at and
/// above it are preallocated in the kernel root and shared into every user
/// root.
pub(crate) const fn kernel_first_index<C: PagingConstsTrait>() -> usize {
    nr_ptes_per_node::<C>() / 2
}

/// The interface for defining architecture-specific page table entries.
pub trait PageTableEntryTrait: Clone + Copy + Debug + Sized {
    /// An entry that maps nothing.
    fn new_absent() -> Self;

    fn is_present(&self) -> bool;

    /// Whether the entry holds no mapping at all.
    ///
    /// Not simply the negation of [`Self::is_present`]: bits the hardware
    /// may spuriously set on a non-present entry (the KNL4 erratum on x86)
    /// are masked out before the comparison with zero.
    fn is_vacant(&self) -> bool;

    /// A leaf entry. `huge` must only be set above level 1.
    fn new_page(paddr: Paddr, huge: bool, prot: VmProt) -> Self;

    /// An entry referencing a child table. When `user` is set the child is
    /// stamped present, writable and user-accessible so that leaf
    /// protection may still downgrade; otherwise the subtree is
    /// supervisor-only.
    fn new_pt(paddr: Paddr, user: bool) -> Self;

    fn paddr(&self) -> Paddr;

    fn prot(&self) -> VmProt;

    fn is_huge(&self) -> bool;

    fn clear_present(&mut self);
}

/// A compile-time split between the two halves of the address space, so a
/// user mapping can never be attempted on the kernel page table by
/// accident (and vice versa).
pub trait PageTableMode: Clone + Debug + 'static {
    /// The range of virtual addresses the page table manages.
    const VADDR_RANGE: Range<Vaddr>;

    fn covers(r: &Range<Vaddr>) -> bool {
        Self::VADDR_RANGE.start <= r.start && r.end <= Self::VADDR_RANGE.end
    }
}

#[derive(Clone, Debug)]
pub struct UserMode {}

impl PageTableMode for UserMode {
    const VADDR_RANGE: Range<Vaddr> = 0..kspace::MAX_USERSPACE_VADDR;
}

#[derive(Clone, Debug)]
pub struct KernelMode {}

impl PageTableMode for KernelMode {
    const VADDR_RANGE: Range<Vaddr> = kspace::KERNEL_BASE_VADDR..Vaddr::MAX;
}

/// An owned N-level paging structure.
pub struct PageTable<
    M: PageTableMode,
    E: PageTableEntryTrait = crate::arch::mm::PageTableEntry,
    C: PagingConstsTrait = crate::arch::mm::PagingConsts,
> {
    root_paddr: Paddr,
    /// Table frames owned by this page table, the root included. Frames
    /// aliased from the kernel half are not listed and never freed here.
    frames: Vec<Paddr>,
    alloc: &'static SpinLock<BootAllocator>,
    _phantom: PhantomData<(M, E, C)>,
}

impl<M: PageTableMode, E: PageTableEntryTrait, C: PagingConstsTrait> PageTable<M, E, C> {
    /// Creates an empty page table whose frames come from `alloc`.
    pub fn new(alloc: &'static SpinLock<BootAllocator>) -> Result<Self> {
        debug_assert!(C::nr_levels() <= C::MAX_NR_LEVELS);
        let mut pt = Self {
            root_paddr: 0,
            frames: Vec::new(),
            alloc,
            _phantom: PhantomData,
        };
        pt.root_paddr = pt.alloc_table_frame()?;
        Ok(pt)
    }

    /// The physical address of the root table frame.
    pub fn root_paddr(&self) -> Paddr {
        self.root_paddr
    }

    fn alloc_table_frame(&mut self) -> Result<Paddr> {
        let frame = self.alloc.lock().alloc(1)?;
        // Zeroed through the direct map before anything references it.
        // SAFETY: The frame was just handed out by the allocator.
        unsafe {
            core::ptr::write_bytes(paddr_to_vaddr(frame) as *mut u8, 0, C::BASE_PAGE_SIZE);
        }
        self.frames.push(frame);
        Ok(frame)
    }

    fn entry_ptr(table_paddr: Paddr, index: usize) -> *mut E {
        debug_assert!(index < nr_ptes_per_node::<C>());
        // SAFETY contract is on the callers: `table_paddr` must reference a
        // live table frame.
        unsafe { (paddr_to_vaddr(table_paddr) as *mut E).add(index) }
    }

    fn check_vaddr(vaddr: Vaddr, level: PagingLevel) -> Result<()> {
        let span = vaddr..vaddr + page_size::<C>(level);
        if !M::covers(&span) {
            return Err(Error::InvalidArgs);
        }
        bug_on!(
            !is_aligned(vaddr, page_size::<C>(level)),
            "unaligned virtual address {:#x} at level {}",
            vaddr,
            level
        );
        Ok(())
    }

    /// Walks towards `target_level`, allocating any missing intermediate
    /// table, and returns a pointer to the entry for `vaddr` at that level.
    fn ensure_entry(&mut self, vaddr: Vaddr, target_level: PagingLevel) -> Result<*mut E> {
        let mut table = self.root_paddr;
        let mut level = C::nr_levels();

        while level > target_level {
            let ptr = Self::entry_ptr(table, pte_index::<C>(vaddr, level));
            // SAFETY: `table` is a live frame of this page table.
            let pte = unsafe { ptr.read() };

            table = if pte.is_vacant() {
                let frame = self.alloc_table_frame()?;
                // The child is fully zeroed; only now may the parent entry
                // become present.
                // SAFETY: As above; the entry is within the table frame.
                unsafe { ptr.write(E::new_pt(frame, true)) };
                frame
            } else {
                bug_on!(
                    pte.is_huge(),
                    "mapping across a huge page at {:#x}",
                    vaddr
                );
                pte.paddr()
            };
            level -= 1;
        }

        Ok(Self::entry_ptr(table, pte_index::<C>(vaddr, target_level)))
    }

    /// Walks towards `target_level` asserting every intermediate table is
    /// already present. The early-boot path must not allocate.
    fn existing_entry(&self, vaddr: Vaddr, target_level: PagingLevel) -> *mut E {
        let mut table = self.root_paddr;
        let mut level = C::nr_levels();

        while level > target_level {
            let ptr = Self::entry_ptr(table, pte_index::<C>(vaddr, level));
            // SAFETY: `table` is a live frame of this page table.
            let pte = unsafe { ptr.read() };
            bug_on!(
                !pte.is_present(),
                "no preallocated table for {:#x} at level {}",
                vaddr,
                level
            );
            table = pte.paddr();
            level -= 1;
        }

        Self::entry_ptr(table, pte_index::<C>(vaddr, target_level))
    }

    fn map_at_level(
        &mut self,
        vaddr: Vaddr,
        paddr: Paddr,
        level: PagingLevel,
        prot: VmProt,
    ) -> Result<()> {
        Self::check_vaddr(vaddr, level)?;
        bug_on!(!is_aligned(paddr, page_size::<C>(level)));
        debug_assert!(level <= C::HIGHEST_TRANSLATION_LEVEL);

        let ptr = self.ensure_entry(vaddr, level)?;
        // SAFETY: `ptr` references an entry of a live table frame.
        unsafe { ptr.write(E::new_page(paddr, level > 1, prot)) };
        crate::arch::mm::tlb_flush(vaddr);
        Ok(())
    }

    /// Maps one base page, creating intermediate tables on demand, and
    /// invalidates the local TLB entry.
    pub fn map_page(&mut self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.map_at_level(vaddr, paddr, 1, prot)
    }

    /// Maps one huge page. Both addresses must be naturally aligned to the
    /// huge page size.
    pub fn map_huge_page(&mut self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        self.map_at_level(vaddr, paddr, 2, prot)
    }

    /// Maps a base page assuming all intermediate tables already exist.
    pub fn early_map_page(&mut self, vaddr: Vaddr, paddr: Paddr, prot: VmProt) -> Result<()> {
        Self::check_vaddr(vaddr, 1)?;
        bug_on!(!is_aligned(paddr, C::BASE_PAGE_SIZE));

        let ptr = self.existing_entry(vaddr, 1);
        // SAFETY: `ptr` references an entry of a live table frame.
        unsafe { ptr.write(E::new_page(paddr, false, prot)) };
        Ok(())
    }

    /// Maps a huge page assuming all intermediate tables already exist.
    pub fn early_map_huge_page(
        &mut self,
        vaddr: Vaddr,
        paddr: Paddr,
        prot: VmProt,
    ) -> Result<()> {
        Self::check_vaddr(vaddr, 2)?;
        bug_on!(!is_aligned(paddr, page_size::<C>(2)));

        let ptr = self.existing_entry(vaddr, 2);
        // SAFETY: `ptr` references an entry of a live table frame.
        unsafe { ptr.write(E::new_page(paddr, true, prot)) };
        Ok(())
    }

    /// Clears the leaf's present bit and invalidates the local TLB entry.
    /// The caller is responsible for remote invalidation.
    pub fn unmap_page(&mut self, vaddr: Vaddr) {
        bug_on!(!is_aligned(vaddr, C::BASE_PAGE_SIZE));

        let mut table = self.root_paddr;
        let mut level = C::nr_levels();

        loop {
            let ptr = Self::entry_ptr(table, pte_index::<C>(vaddr, level));
            // SAFETY: `table` is a live frame of this page table.
            let mut pte = unsafe { ptr.read() };

            if !pte.is_present() {
                return;
            }
            if level == 1 || pte.is_huge() {
                pte.clear_present();
                // SAFETY: As above.
                unsafe { ptr.write(pte) };
                crate::arch::mm::tlb_flush(vaddr);
                return;
            }
            table = pte.paddr();
            level -= 1;
        }
    }

    /// A software walk of the structures; `None` when any entry in the
    /// chain is not present.
    pub fn query(&self, vaddr: Vaddr) -> Option<(Paddr, VmProt)> {
        // SAFETY: The root belongs to this live page table.
        unsafe { page_walk::<E, C>(self.root_paddr, vaddr) }
    }
}

impl<E: PageTableEntryTrait, C: PagingConstsTrait> PageTable<KernelMode, E, C> {
    /// Creates the kernel page table with every kernel-half root entry
    /// preallocated (one zero-filled supervisor table each), so the kernel
    /// half never takes a lazy allocation and can be shared by address.
    pub fn new_kernel(alloc: &'static SpinLock<BootAllocator>) -> Result<Self> {
        let mut pt = Self::new(alloc)?;
        for index in kernel_first_index::<C>()..nr_ptes_per_node::<C>() {
            let frame = pt.alloc_table_frame()?;
            let ptr = Self::entry_ptr(pt.root_paddr, index);
            // SAFETY: The root is a live frame; the child is zeroed.
            unsafe { ptr.write(E::new_pt(frame, false)) };
        }
        Ok(pt)
    }

    /// Creates a user page table sharing this kernel half: the top-level
    /// kernel entries are copied verbatim, so kernel addresses resolve
    /// identically in every address space with no cross-AS synchronisation.
    pub fn derive_user(
        &self,
        alloc: &'static SpinLock<BootAllocator>,
    ) -> Result<PageTable<UserMode, E, C>> {
        let user = PageTable::<UserMode, E, C>::new(alloc)?;
        for index in kernel_first_index::<C>()..nr_ptes_per_node::<C>() {
            let src = Self::entry_ptr(self.root_paddr, index);
            let dst = PageTable::<UserMode, E, C>::entry_ptr(user.root_paddr, index);
            // SAFETY: Both roots are live frames; the kernel-half entries
            // were fully initialised by `new_kernel`.
            unsafe { dst.write(src.read()) };
        }
        Ok(user)
    }
}

impl<M: PageTableMode, E: PageTableEntryTrait, C: PagingConstsTrait> Drop for PageTable<M, E, C> {
    fn drop(&mut self) {
        // Only frames this table allocated itself are returned; aliased
        // kernel-half tables live for the kernel lifetime.
        let mut alloc = self.alloc.lock();
        for frame in self.frames.drain(..) {
            alloc.free(frame, 1);
        }
    }
}

/// A software emulation of the MMU translation process.
///
/// # Safety
///
/// `root_paddr` must reference the live root frame of a page table whose
/// structure frames stay alive for the duration of the call.
pub(crate) unsafe fn page_walk<E: PageTableEntryTrait, C: PagingConstsTrait>(
    root_paddr: Paddr,
    vaddr: Vaddr,
) -> Option<(Paddr, VmProt)> {
    let mut level = C::nr_levels();
    let mut table = root_paddr;

    loop {
        let index = pte_index::<C>(vaddr, level);
        // SAFETY: The caller guarantees the chain of frames is live; the
        // index never exceeds the frame.
        let pte = unsafe { (paddr_to_vaddr(table) as *const E).add(index).read() };

        if !pte.is_present() {
            return None;
        }
        if level == 1 || pte.is_huge() {
            debug_assert!(level <= C::HIGHEST_TRANSLATION_LEVEL);
            let offset = vaddr & (page_size::<C>(level) - 1);
            return Some((pte.paddr() + offset, pte.prot()));
        }

        table = pte.paddr();
        level -= 1;
    }
}
