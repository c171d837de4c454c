// SPDX-License-Identifier: MPL-2.0

//! The boot physical allocator.
//!
//! This allocator runs from the moment the memory map is parsed until (and
//! beyond) the point where the ordinary kernel heap exists. Its state is a
//! single sorted array of [`MemoryRange`]s in canonical form: ranges are
//! strictly ascending, sizes are non-zero and page aligned, and no two
//! adjacent ranges have the same type, because every mutation re-merges.
//!
//! The array initially lives in a static buffer. When free slots run low
//! the allocator doubles the array by allocating the new backing *from
//! itself*, copying, and releasing the old backing (unless it is the
//! initial static buffer, which is never freed).

use core::fmt;

use crate::boot::memory_region::MemoryRegionType;
use crate::mm::{is_aligned, paddr_to_vaddr, Paddr, PAGE_SHIFT, PAGE_SIZE};
use crate::prelude::Result;
use crate::sync::SpinLock;
use crate::Error;

/// Whether a range is free or handed out.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RangeKind {
    Free = 0,
    Allocated = 1,
}

const RANGE_TYPE_MASK: u64 = 0b1;

/// One maximal run of same-type physical memory. The low bit of
/// `size_and_type` is the type tag; the remaining bits are the size.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    physical_address: Paddr,
    size_and_type: u64,
}

impl MemoryRange {
    pub const fn new(physical_address: Paddr, size: u64, kind: RangeKind) -> Self {
        Self {
            physical_address,
            size_and_type: size | kind as u64,
        }
    }

    const fn zeroed() -> Self {
        Self {
            physical_address: 0,
            size_and_type: 0,
        }
    }

    pub fn physical_address(&self) -> Paddr {
        self.physical_address
    }

    pub fn size(&self) -> u64 {
        self.size_and_type & !RANGE_TYPE_MASK
    }

    pub fn kind(&self) -> RangeKind {
        if self.size_and_type & RANGE_TYPE_MASK == 0 {
            RangeKind::Free
        } else {
            RangeKind::Allocated
        }
    }

    pub fn end(&self) -> Paddr {
        self.physical_address + self.size() as usize
    }
}

impl fmt::Debug for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:#018x}..{:#018x} {:?}",
            self.physical_address,
            self.end(),
            self.kind()
        )
    }
}

pub const INITIAL_CAPACITY: usize = PAGE_SIZE / core::mem::size_of::<MemoryRange>();

/// The middle-split carve emplaces two new ranges; no operation grows the
/// array by more.
const WORST_CASE_GROWTH_PER_OPERATION: usize = 2;

enum Backing {
    Initial,
    Dynamic { base: Paddr, capacity: usize },
}

pub struct BootAllocator {
    initial: [MemoryRange; INITIAL_CAPACITY],
    backing: Backing,
    len: usize,
    #[cfg(test)]
    capacity_limit: Option<usize>,
}

fn pages_to_bytes(page_count: usize) -> usize {
    let bytes = page_count.wrapping_mul(PAGE_SIZE);
    bug_on!(
        bytes <= page_count,
        "invalid allocation size ({} pages)",
        page_count
    );
    bytes
}

fn can_merge(lhs: &MemoryRange, rhs: &MemoryRange) -> bool {
    lhs.kind() == rhs.kind() && lhs.end() == rhs.physical_address
}

impl BootAllocator {
    pub const fn new() -> Self {
        Self {
            initial: [MemoryRange::zeroed(); INITIAL_CAPACITY],
            backing: Backing::Initial,
            len: 0,
            #[cfg(test)]
            capacity_limit: None,
        }
    }

    /// The current range array, in canonical form.
    pub fn ranges(&self) -> &[MemoryRange] {
        match self.backing {
            Backing::Initial => &self.initial[..self.len],
            Backing::Dynamic { base, .. } => {
                // SAFETY: The dynamic backing covers `capacity >= len` ranges
                // and is owned by this allocator.
                unsafe {
                    core::slice::from_raw_parts(
                        paddr_to_vaddr(base) as *const MemoryRange,
                        self.len,
                    )
                }
            }
        }
    }

    fn capacity(&self) -> usize {
        let capacity = match self.backing {
            Backing::Initial => INITIAL_CAPACITY,
            Backing::Dynamic { capacity, .. } => capacity,
        };
        #[cfg(test)]
        let capacity = self.capacity_limit.unwrap_or(capacity);
        capacity
    }

    fn slots_mut(&mut self) -> &mut [MemoryRange] {
        match self.backing {
            Backing::Initial => &mut self.initial[..],
            Backing::Dynamic { base, capacity } => {
                // SAFETY: See `ranges`; `&mut self` makes the slice unique.
                unsafe {
                    core::slice::from_raw_parts_mut(
                        paddr_to_vaddr(base) as *mut MemoryRange,
                        capacity,
                    )
                }
            }
        }
    }

    fn emplace_at(&mut self, idx: usize, mr: MemoryRange) {
        bug_on!(idx > self.len);
        bug_on!(self.len >= self.capacity());

        let len = self.len;
        let slots = self.slots_mut();
        slots.copy_within(idx..len, idx + 1);
        slots[idx] = mr;
        self.len += 1;
    }

    fn remove_starting_at(&mut self, idx: usize, count: usize) {
        let len = self.len;
        let slots = self.slots_mut();
        slots.copy_within(idx + count..len, idx);
        self.len -= count;
    }

    /// Binary search for the range whose span contains `value` (or that
    /// begins exactly at it).
    fn find_containing(&self, value: Paddr) -> Option<usize> {
        let ranges = self.ranges();
        match ranges.binary_search_by(|mr| mr.physical_address.cmp(&value)) {
            Ok(idx) => Some(idx),
            Err(insertion) => insertion
                .checked_sub(1)
                .filter(|&below| value < ranges[below].end()),
        }
    }

    /// Like [`Self::find_containing`], but falls back to the closest range
    /// above `value`.
    fn find_at_or_after(&self, value: Paddr) -> Option<usize> {
        let ranges = self.ranges();
        match ranges.binary_search_by(|mr| mr.physical_address.cmp(&value)) {
            Ok(idx) => Some(idx),
            Err(insertion) => {
                if let Some(below) = insertion.checked_sub(1) {
                    if value < ranges[below].end() {
                        return Some(below);
                    }
                }
                (insertion < ranges.len()).then_some(insertion)
            }
        }
    }

    /// Carves `new_mr` out of the range at `idx` and restores canonical
    /// form.
    ///
    /// The carve leaves up to three pieces (left remainder, the carved
    /// middle, right remainder) and must then consider merging with both
    /// neighbours; the cases below are exhaustive. The array grows by at
    /// most [`WORST_CASE_GROWTH_PER_OPERATION`] and may shrink by two.
    fn carve_out_of(&mut self, idx: usize, new_mr: MemoryRange) {
        let current = self.ranges()[idx];

        // The carve is always fully inside the chosen range and flips its
        // type.
        bug_on!(
            current.physical_address > new_mr.physical_address
                || current.end() < new_mr.end()
        );
        bug_on!(current.kind() == new_mr.kind());

        let lhs = MemoryRange::new(
            current.physical_address,
            (new_mr.physical_address - current.physical_address) as u64,
            current.kind(),
        );
        let rhs = MemoryRange::new(
            new_mr.end(),
            (current.end() - new_mr.end()) as u64,
            current.kind(),
        );

        // Case 1: carved out of the middle. Both remainders keep the old
        // type, so neither neighbour can merge.
        if lhs.size() != 0 && rhs.size() != 0 {
            self.slots_mut()[idx] = lhs;
            self.emplace_at(idx + 1, new_mr);
            self.emplace_at(idx + 2, rhs);
            return;
        }

        let mergeable_before = idx > 0 && can_merge(&self.ranges()[idx - 1], &new_mr);

        // Case 2: no left remainder.
        if lhs.size() == 0 && rhs.size() != 0 {
            if mergeable_before {
                let slots = self.slots_mut();
                slots[idx - 1].size_and_type += new_mr.size();
                slots[idx] = rhs;
            } else {
                self.slots_mut()[idx] = new_mr;
                self.emplace_at(idx + 1, rhs);
            }
            return;
        }

        let mergeable_after =
            idx + 1 < self.len && can_merge(&new_mr, &self.ranges()[idx + 1]);

        // Case 3: no right remainder.
        if lhs.size() != 0 && rhs.size() == 0 {
            if mergeable_after {
                let slots = self.slots_mut();
                slots[idx] = lhs;
                slots[idx + 1].physical_address = new_mr.physical_address;
                slots[idx + 1].size_and_type += new_mr.size();
            } else {
                self.slots_mut()[idx] = lhs;
                self.emplace_at(idx + 1, new_mr);
            }
            return;
        }

        // Case 4: the whole range is consumed.
        match (mergeable_before, mergeable_after) {
            (false, false) => self.slots_mut()[idx].size_and_type = new_mr.size_and_type,
            (true, true) => {
                let after_size = self.ranges()[idx + 1].size();
                self.slots_mut()[idx - 1].size_and_type += new_mr.size() + after_size;
                self.remove_starting_at(idx, 2);
            }
            (true, false) => {
                self.slots_mut()[idx - 1].size_and_type += new_mr.size();
                self.remove_starting_at(idx, 1);
            }
            (false, true) => {
                let slots = self.slots_mut();
                slots[idx + 1].physical_address = new_mr.physical_address;
                slots[idx + 1].size_and_type += new_mr.size();
                self.remove_starting_at(idx, 1);
            }
        }
    }

    /// Scans free ranges from the top of memory down, so low memory stays
    /// available for DMA-constrained users.
    fn allocate_top_down(&mut self, page_count: usize, upper_limit: Paddr) -> Result<Paddr> {
        let bytes = pages_to_bytes(page_count);
        let mut picked = None;

        for idx in (0..self.len).rev() {
            let mr = self.ranges()[idx];

            if mr.physical_address >= upper_limit {
                continue;
            }
            if mr.kind() != RangeKind::Free {
                continue;
            }

            let range_end = mr.end().min(upper_limit);
            if range_end - mr.physical_address < bytes {
                continue;
            }

            picked = Some((idx, range_end));
            break;
        }

        let Some((idx, range_end)) = picked else {
            return Err(Error::NoMemory);
        };

        let allocated = MemoryRange::new(range_end - bytes, bytes as u64, RangeKind::Allocated);
        self.carve_out_of(idx, allocated);
        Ok(allocated.physical_address)
    }

    /// Allocates inside `[lower_limit, upper_limit)`; the window must fall
    /// entirely within a single free range.
    fn allocate_within(
        &mut self,
        page_count: usize,
        lower_limit: Paddr,
        upper_limit: Paddr,
    ) -> Result<Paddr> {
        let bytes = pages_to_bytes(page_count);

        bug_on!(
            lower_limit >= upper_limit
                || lower_limit.wrapping_add(bytes) > upper_limit
                || lower_limit.wrapping_add(bytes) < lower_limit,
            "invalid allocation: {} pages within {:#018x} -> {:#018x}",
            page_count,
            lower_limit,
            upper_limit
        );

        let Some(mut idx) = self.find_at_or_after(lower_limit) else {
            return Err(Error::NoMemory);
        };

        let picked = loop {
            if idx == self.len {
                return Err(Error::NoMemory);
            }
            let mr = self.ranges()[idx];
            let end = mr.end();

            if mr.physical_address > upper_limit {
                return Err(Error::NoMemory);
            }

            if mr.kind() == RangeKind::Free {
                let gap = end.min(upper_limit) - mr.physical_address.max(lower_limit);
                if gap >= bytes {
                    break mr;
                }
            }

            if end >= upper_limit {
                return Err(Error::NoMemory);
            }
            if upper_limit - end < bytes {
                return Err(Error::NoMemory);
            }
            idx += 1;
        };

        let range_begin = lower_limit.max(picked.physical_address);
        let allocated = MemoryRange::new(range_begin, bytes as u64, RangeKind::Allocated);
        self.carve_out_of(idx, allocated);
        Ok(range_begin)
    }

    /// Ensures the array can absorb the next operation, doubling the
    /// backing through the allocator itself when free slots fall below the
    /// watermark.
    fn maybe_grow(&mut self) -> bool {
        // Room for at least two worst-case operations: the one at the call
        // site and the growth carve the next operation may need.
        let mut growth_watermark = WORST_CASE_GROWTH_PER_OPERATION * 2;

        // A dynamic buffer is itself released through the allocator when it
        // is replaced, so account for that carve as well.
        if matches!(self.backing, Backing::Dynamic { .. }) {
            growth_watermark += WORST_CASE_GROWTH_PER_OPERATION;
        }

        if self.capacity() - self.len >= growth_watermark {
            return true;
        }

        let new_capacity_bytes = crate::mm::align_up(
            self.capacity() * 2 * core::mem::size_of::<MemoryRange>(),
            PAGE_SIZE,
        );

        let addr = match self.allocate_top_down(new_capacity_bytes >> PAGE_SHIFT, Paddr::MAX) {
            Ok(addr) => addr,
            Err(_) => {
                log::warn!("boot-alloc: cannot grow the range array");
                return false;
            }
        };

        // SAFETY: The freshly allocated backing does not overlap the old
        // one and has room for every live entry.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.ranges().as_ptr(),
                paddr_to_vaddr(addr) as *mut MemoryRange,
                self.len,
            );
        }

        let old = core::mem::replace(
            &mut self.backing,
            Backing::Dynamic {
                base: addr,
                capacity: new_capacity_bytes / core::mem::size_of::<MemoryRange>(),
            },
        );
        #[cfg(test)]
        {
            self.capacity_limit = None;
        }

        // Release the previous dynamic backing through the allocator
        // itself; the watermark above reserved the slots this carve needs.
        // The initial static buffer is never freed.
        if let Backing::Dynamic { base, capacity } = old {
            let old_bytes =
                crate::mm::align_up(capacity * core::mem::size_of::<MemoryRange>(), PAGE_SIZE);
            self.free_internal(base, old_bytes >> PAGE_SHIFT);
        }
        true
    }

    fn free_internal(&mut self, address: Paddr, page_count: usize) {
        let bytes = pages_to_bytes(page_count);
        let freed = MemoryRange::new(address, bytes as u64, RangeKind::Free);

        let idx = self.find_containing(address);
        bug_on!(
            idx.is_none(),
            "invalid free at {:#018x} ({} pages)",
            address,
            page_count
        );

        self.carve_out_of(idx.unwrap(), freed);
    }

    /// Reserves `page_count` contiguous pages anywhere.
    pub fn alloc(&mut self, page_count: usize) -> Result<Paddr> {
        if !self.maybe_grow() {
            return Err(Error::NoMemory);
        }
        self.allocate_top_down(page_count, Paddr::MAX)
    }

    /// Reserves exactly `[address, address + page_count * PAGE_SIZE)`. The
    /// array is unmodified on failure.
    pub fn alloc_at(&mut self, address: Paddr, page_count: usize) -> Result<Paddr> {
        if !self.maybe_grow() {
            return Err(Error::NoMemory);
        }
        self.allocate_within(
            page_count,
            address,
            address + (page_count << PAGE_SHIFT),
        )
    }

    /// Releases a previously allocated window. Freeing memory this
    /// allocator has never seen is a kernel bug.
    pub fn free(&mut self, address: Paddr, page_count: usize) {
        if !self.maybe_grow() {
            log::warn!(
                "boot-alloc: leaking memory at {:#018x} ({} pages)",
                address,
                page_count
            );
            return;
        }
        self.free_internal(address, page_count);
    }

    /// Appends a seed range. The memory map is walked in ascending order,
    /// so appending keeps the array sorted.
    pub fn append(&mut self, mr: MemoryRange) -> Result<()> {
        bug_on!(
            mr.size() == 0 || !is_aligned(mr.size() as usize, PAGE_SIZE),
            "malformed memory map entry {:?}",
            mr
        );
        bug_on!(!is_aligned(mr.physical_address, PAGE_SIZE));
        debug_assert!(self
            .ranges()
            .last()
            .map_or(true, |last| last.end() <= mr.physical_address));

        if !self.maybe_grow() {
            return Err(Error::NoMemory);
        }
        self.emplace_at(self.len, mr);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_capacity(&mut self, capacity: usize) {
        assert!(capacity >= self.len);
        self.capacity_limit = Some(capacity);
    }

    #[cfg(test)]
    pub(crate) fn backing_base(&self) -> Option<Paddr> {
        match self.backing {
            Backing::Initial => None,
            Backing::Dynamic { base, .. } => Some(base),
        }
    }
}

static BOOT_ALLOCATOR: SpinLock<BootAllocator> = SpinLock::new(BootAllocator::new());

/// The process-wide boot allocator. It exists for the whole kernel
/// lifetime and is single-threaded by construction until SMP start.
pub fn boot_allocator() -> &'static SpinLock<BootAllocator> {
    &BOOT_ALLOCATOR
}

pub fn boot_alloc(page_count: usize) -> Result<Paddr> {
    BOOT_ALLOCATOR.lock_irq_disabled().alloc(page_count)
}

pub fn boot_alloc_at(address: Paddr, page_count: usize) -> Result<Paddr> {
    BOOT_ALLOCATOR
        .lock_irq_disabled()
        .alloc_at(address, page_count)
}

pub fn boot_free(address: Paddr, page_count: usize) {
    BOOT_ALLOCATOR.lock_irq_disabled().free(address, page_count)
}

/// Seeds the allocator from the boot memory map: reclaimable, kernel
/// binary and loader-reclaimable entries are appended allocated, free
/// entries free, everything else is ignored.
pub(crate) fn init() {
    let mut allocator = BOOT_ALLOCATOR.lock_irq_disabled();

    for region in crate::boot::memory_regions() {
        let kind = match region.typ() {
            MemoryRegionType::Reclaimable
            | MemoryRegionType::KernelBinary
            | MemoryRegionType::LoaderReclaimable => RangeKind::Allocated,
            MemoryRegionType::Free => RangeKind::Free,
            _ => continue,
        };

        if kind == RangeKind::Free {
            log::info!(
                "boot-alloc: adding memory {:#018x} -> {:#018x}",
                region.base(),
                region.end()
            );
        }

        let mr = MemoryRange::new(region.base(), region.len() as u64, kind);
        warn_on!(allocator.append(mr).is_err());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::alloc::{alloc_zeroed, Layout};
    use alloc::vec::Vec;

    const FREE: RangeKind = RangeKind::Free;
    const ALLOC: RangeKind = RangeKind::Allocated;

    fn allocator_with(ranges: &[(Paddr, u64, RangeKind)]) -> BootAllocator {
        let mut allocator = BootAllocator::new();
        for &(base, size, kind) in ranges {
            allocator.append(MemoryRange::new(base, size, kind)).unwrap();
        }
        allocator
    }

    #[track_caller]
    fn check_state(allocator: &BootAllocator, expected: &[(Paddr, u64, RangeKind)]) {
        let actual: Vec<_> = allocator
            .ranges()
            .iter()
            .map(|mr| (mr.physical_address(), mr.size(), mr.kind()))
            .collect();
        assert_eq!(actual, expected);
    }

    /// Every range array must stay canonical: strictly ascending, no two
    /// adjacent ranges of equal type, all sizes non-zero and page aligned.
    #[track_caller]
    fn check_canonical(allocator: &BootAllocator) {
        let ranges = allocator.ranges();
        for window in ranges.windows(2) {
            assert!(window[0].end() <= window[1].physical_address());
            if window[0].end() == window[1].physical_address() {
                assert_ne!(window[0].kind(), window[1].kind());
            }
        }
        for mr in ranges {
            assert!(mr.size() != 0);
            assert!(is_aligned(mr.size() as usize, PAGE_SIZE));
        }
    }

    #[test]
    fn middle_split() {
        let mut a = allocator_with(&[(0x1000, 0x3000, FREE)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x1000, 0x1000, FREE),
                (0x2000, 0x1000, ALLOC),
                (0x3000, 0x1000, FREE),
            ],
        );
        check_canonical(&a);
    }

    #[test]
    fn left_mergeable() {
        let mut a = allocator_with(&[(0x1000, 0x1000, ALLOC), (0x2000, 0x2000, FREE)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(&a, &[(0x1000, 0x2000, ALLOC), (0x3000, 0x1000, FREE)]);
    }

    #[test]
    fn left_non_mergeable() {
        let mut a = allocator_with(&[(0x0000, 0x1000, ALLOC), (0x2000, 0x2000, FREE)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x0000, 0x1000, ALLOC),
                (0x2000, 0x1000, ALLOC),
                (0x3000, 0x1000, FREE),
            ],
        );
    }

    #[test]
    fn right_mergeable() {
        let mut a = allocator_with(&[(0x1000, 0x2000, FREE), (0x3000, 0x1000, ALLOC)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(&a, &[(0x1000, 0x1000, FREE), (0x2000, 0x2000, ALLOC)]);
    }

    #[test]
    fn right_non_mergeable() {
        let mut a = allocator_with(&[(0x1000, 0x2000, FREE), (0x4000, 0x1000, ALLOC)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x1000, 0x1000, FREE),
                (0x2000, 0x1000, ALLOC),
                (0x4000, 0x1000, ALLOC),
            ],
        );
    }

    #[test]
    fn entire_non_mergeable() {
        let mut a = allocator_with(&[
            (0x0000, 0x1000, ALLOC),
            (0x2000, 0x1000, FREE),
            (0x4000, 0x1000, ALLOC),
        ]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x0000, 0x1000, ALLOC),
                (0x2000, 0x1000, ALLOC),
                (0x4000, 0x1000, ALLOC),
            ],
        );
    }

    #[test]
    fn entire_mergeable() {
        let mut a = allocator_with(&[
            (0x0000, 0x1000, ALLOC),
            (0x1000, 0x1000, FREE),
            (0x2000, 0x1000, ALLOC),
        ]);
        assert_eq!(a.alloc_at(0x1000, 1).unwrap(), 0x1000);
        check_state(&a, &[(0x0000, 0x3000, ALLOC)]);
    }

    #[test]
    fn entire_left_mergeable() {
        let mut a = allocator_with(&[
            (0x0000, 0x1000, ALLOC),
            (0x1000, 0x1000, FREE),
            (0x3000, 0x1000, ALLOC),
        ]);
        assert_eq!(a.alloc_at(0x1000, 1).unwrap(), 0x1000);
        check_state(&a, &[(0x0000, 0x2000, ALLOC), (0x3000, 0x1000, ALLOC)]);
    }

    #[test]
    fn entire_right_mergeable() {
        let mut a = allocator_with(&[
            (0x0000, 0x1000, ALLOC),
            (0x2000, 0x1000, FREE),
            (0x3000, 0x1000, ALLOC),
            (0x5000, 0x1000, ALLOC),
        ]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x0000, 0x1000, ALLOC),
                (0x2000, 0x2000, ALLOC),
                (0x5000, 0x1000, ALLOC),
            ],
        );
    }

    #[test]
    fn alloc_at_oom_leaves_the_array_unchanged() {
        let initial = [
            (0x2000, 0x1000, FREE),
            (0x4000, 0x1000, ALLOC),
            (0x6000, 0x1000, FREE),
            (0x8000, 0x2000, FREE),
        ];
        let mut a = allocator_with(&initial);

        for (addr, pages) in [
            (0x4000, 1),
            (0x2000, 2),
            (0x6000, 2),
            (0x0000, 1),
            (0x10000, 1),
            (0x7000, 2),
            (0x8000, 3),
            (0x3000, 1),
        ] {
            assert_eq!(a.alloc_at(addr, pages), Err(Error::NoMemory));
        }

        check_state(&a, &initial);
    }

    #[test]
    fn alloc_top_down_order() {
        let mut a = allocator_with(&[
            (0x2000, 0x2000, FREE),
            (0x4000, 0x1000, ALLOC),
            (0x6000, 0x1000, FREE),
            (0x8000, 0x3000, FREE),
        ]);

        assert_eq!(a.alloc(1).unwrap(), 0xA000);
        check_state(
            &a,
            &[
                (0x2000, 0x2000, FREE),
                (0x4000, 0x1000, ALLOC),
                (0x6000, 0x1000, FREE),
                (0x8000, 0x2000, FREE),
                (0xA000, 0x1000, ALLOC),
            ],
        );

        assert_eq!(a.alloc(2).unwrap(), 0x8000);
        check_state(
            &a,
            &[
                (0x2000, 0x2000, FREE),
                (0x4000, 0x1000, ALLOC),
                (0x6000, 0x1000, FREE),
                (0x8000, 0x3000, ALLOC),
            ],
        );

        assert_eq!(a.alloc(2).unwrap(), 0x2000);
        check_state(
            &a,
            &[
                (0x2000, 0x3000, ALLOC),
                (0x6000, 0x1000, FREE),
                (0x8000, 0x3000, ALLOC),
            ],
        );

        assert_eq!(a.alloc(2), Err(Error::NoMemory));

        assert_eq!(a.alloc(1).unwrap(), 0x6000);
        check_state(
            &a,
            &[
                (0x2000, 0x3000, ALLOC),
                (0x6000, 0x1000, ALLOC),
                (0x8000, 0x3000, ALLOC),
            ],
        );

        assert_eq!(a.alloc(1), Err(Error::NoMemory));
        check_canonical(&a);
    }

    #[test]
    fn alloc_free_round_trip_restores_the_array() {
        let mut a = allocator_with(&[
            (0x1000, 0x4000, FREE),
            (0x6000, 0x1000, ALLOC),
            (0x8000, 0x2000, FREE),
        ]);
        let before: Vec<MemoryRange> = a.ranges().to_vec();

        let addr = a.alloc(2).unwrap();
        a.free(addr, 2);

        assert_eq!(a.ranges(), &before[..]);
        check_canonical(&a);
    }

    #[test]
    fn free_rejoins_both_neighbours() {
        let mut a = allocator_with(&[(0x1000, 0x3000, FREE)]);
        assert_eq!(a.alloc_at(0x2000, 1).unwrap(), 0x2000);
        a.free(0x2000, 1);
        check_state(&a, &[(0x1000, 0x3000, FREE)]);
    }

    #[test]
    #[should_panic]
    fn freeing_unknown_memory_is_a_bug() {
        let mut a = allocator_with(&[(0x1000, 0x1000, FREE)]);
        a.free(0x8000, 1);
    }

    #[test]
    #[should_panic]
    fn zero_page_allocation_is_a_bug() {
        let mut a = allocator_with(&[(0x1000, 0x1000, FREE)]);
        let _ = a.alloc(0);
    }

    /// A page-aligned chunk of host memory whose addresses double as the
    /// "physical" addresses the allocator manages: the direct-map base is
    /// zero in hosted runs, so the allocator can relocate its own backing
    /// array into the arena.
    fn arena(pages: usize) -> (Paddr, usize) {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        // Leaked on purpose; the allocator under test owns it henceforth.
        let base = unsafe { alloc_zeroed(layout) } as usize;
        (base, pages)
    }

    #[test]
    fn growth_uses_the_allocator_itself() {
        let (base, pages) = arena(8);
        let mut a = allocator_with(&[(base, (pages * PAGE_SIZE) as u64, FREE)]);
        let before: Vec<MemoryRange> = a.ranges().to_vec();
        a.force_capacity(2);

        // The growth carve grabs the top page for the new backing, then the
        // requested page comes from below it.
        let top = base + (pages - 1) * PAGE_SIZE;
        let addr = a.alloc(1).unwrap();
        assert_eq!(addr, top - PAGE_SIZE);
        assert_eq!(a.backing_base(), Some(top));

        check_state(
            &a,
            &[
                (base, ((pages - 2) * PAGE_SIZE) as u64, FREE),
                (top - PAGE_SIZE, (2 * PAGE_SIZE) as u64, ALLOC),
            ],
        );

        // The single pre-growth entry was carried over; the two carves
        // above are the only difference.
        assert_eq!(before, [MemoryRange::new(base, (pages * PAGE_SIZE) as u64, FREE)]);

        // A second growth must release the first dynamic backing through
        // the allocator itself, making its page allocatable again.
        let first_backing = a.backing_base().unwrap();
        a.force_capacity(a.len + 2);
        let addr2 = a.alloc(1).unwrap();
        assert_ne!(a.backing_base(), Some(first_backing));
        assert_eq!(addr2, first_backing);
        check_state(
            &a,
            &[
                (base, ((pages - 3) * PAGE_SIZE) as u64, FREE),
                (base + (pages - 3) * PAGE_SIZE, (3 * PAGE_SIZE) as u64, ALLOC),
            ],
        );
        check_canonical(&a);
    }

    #[test]
    fn seeded_arrays_stay_canonical_under_load() {
        let (base, pages) = arena(64);
        let mut a = allocator_with(&[(base, (pages * PAGE_SIZE) as u64, FREE)]);

        let mut held = Vec::new();
        for i in 1..=16 {
            let addr = a.alloc(i % 3 + 1).unwrap();
            held.push((addr, i % 3 + 1));
            check_canonical(&a);
        }
        for (addr, pages) in held.drain(..).rev() {
            a.free(addr, pages);
            check_canonical(&a);
        }
    }
}
