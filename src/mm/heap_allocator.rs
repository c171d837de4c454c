// SPDX-License-Identifier: MPL-2.0

//! The kernel heap, fed by the boot physical allocator.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use buddy_system_allocator::Heap;

use crate::mm::boot_alloc::boot_alloc;
use crate::mm::{paddr_to_vaddr, PAGE_SIZE};
use crate::sync::SpinLock;

const INITIAL_HEAP_PAGES: usize = 256;

#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::new();

pub(crate) fn init() {
    let frames = boot_alloc(INITIAL_HEAP_PAGES)
        .unwrap_or_else(|err| panic!("cannot seed the kernel heap: {:?}", err));
    // SAFETY: The pages were just handed out by the boot allocator and are
    // reachable through the direct map.
    unsafe {
        HEAP_ALLOCATOR.init(paddr_to_vaddr(frames), INITIAL_HEAP_PAGES * PAGE_SIZE);
    }
}

struct LockedHeap<const ORDER: usize>(SpinLock<Heap<ORDER>>);

impl<const ORDER: usize> LockedHeap<ORDER> {
    const fn new() -> Self {
        LockedHeap(SpinLock::new(Heap::<ORDER>::new()))
    }

    /// # Safety
    ///
    /// `[start, start + size)` must be valid, unused memory.
    unsafe fn init(&self, start: usize, size: usize) {
        // SAFETY: Delegated to the caller.
        unsafe { self.0.lock_irq_disabled().init(start, size) };
    }
}

// SAFETY: The heap state is guarded by the IRQ-safe spin lock.
unsafe impl<const ORDER: usize> GlobalAlloc for LockedHeap<ORDER> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0
            .lock_irq_disabled()
            .alloc(layout)
            .map_or(core::ptr::null_mut(), |allocation| allocation.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        debug_assert!(!ptr.is_null());
        // SAFETY: `ptr` came out of this heap with the same layout.
        unsafe {
            self.0
                .lock_irq_disabled()
                .dealloc(NonNull::new_unchecked(ptr), layout)
        }
    }
}
