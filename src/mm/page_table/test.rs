// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::arch::mm::PageTableEntry;
use crate::mm::boot_alloc::{MemoryRange, RangeKind};
use crate::mm::{VmProt, PAGE_SIZE};
use alloc::alloc::{alloc_zeroed, Layout};
use alloc::boxed::Box;

fn leaked_allocator(pages: usize) -> &'static SpinLock<BootAllocator> {
    let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
    let base = unsafe { alloc_zeroed(layout) } as usize;

    let mut allocator = BootAllocator::new();
    allocator
        .append(MemoryRange::new(
            base,
            (pages * PAGE_SIZE) as u64,
            RangeKind::Free,
        ))
        .unwrap();
    Box::leak(Box::new(SpinLock::new(allocator)))
}

type NativeConsts = crate::arch::mm::PagingConsts;

#[test]
fn geometry_helpers() {
    assert_eq!(nr_ptes_per_node::<NativeConsts>(), 512);
    assert_eq!(page_size::<NativeConsts>(1), 4096);
    assert_eq!(page_size::<NativeConsts>(2), 2 * 1024 * 1024);
    assert_eq!(page_size::<NativeConsts>(3), 1024 * 1024 * 1024);

    let va = 0x0000_7fff_dead_b000;
    assert_eq!(pte_index::<NativeConsts>(va, 1), (va >> 12) & 511);
    assert_eq!(pte_index::<NativeConsts>(va, 2), (va >> 21) & 511);
    assert_eq!(pte_index::<NativeConsts>(va, 4), (va >> 39) & 511);
}

#[test]
fn map_allocates_each_missing_level_once() {
    let alloc = leaked_allocator(16);
    let mut pt = PageTable::<UserMode>::new(alloc).unwrap();

    // Root plus three intermediate levels for a 4-level walk.
    pt.map_page(0x2000_0000, 0xf000, VmProt::RW).unwrap();
    assert_eq!(pt.frames.len(), 4);

    // A second page under the same leaf table allocates nothing new.
    pt.map_page(0x2000_1000, 0x1_0000, VmProt::RW).unwrap();
    assert_eq!(pt.frames.len(), 4);

    assert_eq!(pt.query(0x2000_0000), Some((0xf000, VmProt::RW)));
    assert_eq!(pt.query(0x2000_1000), Some((0x1_0000, VmProt::RW)));
    assert_eq!(pt.query(0x2000_2000), None);
}

#[test]
fn unaligned_queries_carry_the_page_offset() {
    let alloc = leaked_allocator(16);
    let mut pt = PageTable::<UserMode>::new(alloc).unwrap();

    pt.map_page(0x2000_0000, 0xf000, VmProt::RW).unwrap();
    assert_eq!(
        pt.query(0x2000_0123),
        Some((0xf123, VmProt::RW))
    );
}

/// A spuriously set A/D pair on a non-present entry (the KNL4 erratum)
/// must not make the walk treat the slot as populated.
#[test]
fn erratum_bits_are_ignored_when_probing_vacancy() {
    let alloc = leaked_allocator(16);
    let mut pt = PageTable::<UserMode>::new(alloc).unwrap();

    let vaddr = 0x2000_0000;
    let index = pte_index::<NativeConsts>(vaddr, NativeConsts::nr_levels());
    let root_entry =
        unsafe { (paddr_to_vaddr(pt.root_paddr()) as *mut u64).add(index) };
    unsafe { root_entry.write((1 << 5) | (1 << 6)) };

    // The dirtied slot still counts as vacant, so mapping replaces it with
    // a fresh table instead of dereferencing garbage.
    pt.map_page(vaddr, 0xf000, VmProt::RW).unwrap();
    assert_eq!(pt.query(vaddr), Some((0xf000, VmProt::RW)));
}

#[test]
fn dropping_a_page_table_returns_every_frame() {
    let alloc = leaked_allocator(16);
    let before = alloc.lock().ranges().to_vec();

    {
        let mut pt = PageTable::<UserMode>::new(alloc).unwrap();
        pt.map_page(0x2000_0000, 0xf000, VmProt::RW).unwrap();
        pt.map_page(0x4000_0000, 0x1_0000, VmProt::RX).unwrap();
    }

    assert_eq!(alloc.lock().ranges(), &before[..]);
}

/// The engine is generic over the level count; three levels must behave
/// like a 3-level machine, not a truncated 4-level one.
#[derive(Clone, Copy, Debug)]
struct ThreeLevelConsts {}

impl PagingConstsTrait for ThreeLevelConsts {
    const BASE_PAGE_SIZE: usize = 4096;
    const MAX_NR_LEVELS: PagingLevel = 3;
    const HIGHEST_TRANSLATION_LEVEL: PagingLevel = 2;
    const PTE_SIZE: usize = core::mem::size_of::<PageTableEntry>();

    fn nr_levels() -> PagingLevel {
        3
    }
}

#[test]
fn three_level_walks_terminate_at_the_shallower_root() {
    let alloc = leaked_allocator(16);
    let mut pt =
        PageTable::<UserMode, PageTableEntry, ThreeLevelConsts>::new(alloc).unwrap();

    pt.map_page(0x2000_0000, 0xf000, VmProt::RW).unwrap();
    // Root plus two intermediate levels.
    assert_eq!(pt.frames.len(), 3);
    assert_eq!(pt.query(0x2000_0000), Some((0xf000, VmProt::RW)));

    pt.unmap_page(0x2000_0000);
    assert_eq!(pt.query(0x2000_0000), None);
}

#[test]
fn huge_leaves_stop_the_walk_at_level_two() {
    let alloc = leaked_allocator(16);
    let mut pt = PageTable::<UserMode>::new(alloc).unwrap();

    let huge = page_size::<NativeConsts>(2);
    pt.map_huge_page(huge * 3, huge * 7, VmProt::RW).unwrap();
    // Root plus two intermediate levels; no level-1 table exists.
    assert_eq!(pt.frames.len(), 3);

    assert_eq!(pt.query(huge * 3), Some((huge * 7, VmProt::RW)));
    assert_eq!(
        pt.query(huge * 3 + 0x1234),
        Some((huge * 7 + 0x1234, VmProt::RW))
    );
}

#[test]
#[should_panic]
fn misaligned_huge_mappings_are_a_bug() {
    let alloc = leaked_allocator(16);
    let mut pt = PageTable::<UserMode>::new(alloc).unwrap();
    let _ = pt.map_huge_page(PAGE_SIZE, 0, VmProt::RW);
}
