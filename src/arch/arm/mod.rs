// SPDX-License-Identifier: MPL-2.0

//! Experimental AArch64 support.
//!
//! Brings up enough of the architecture layer for the portable code to
//! compile and run: 4-level 4 KiB-granule stage-1 paging, DAIF-based IRQ
//! masking and MMIO-only IO windows. No SMP, no LA57-style level probing.

pub mod io;
pub mod irq;
pub mod mm;
pub mod unwind;

use crate::mm::kspace::LINEAR_MAPPING_BASE_VADDR;

pub(crate) fn early_init() {
    crate::mm::set_linear_mapping_base(LINEAR_MAPPING_BASE_VADDR);
}

pub(crate) fn late_init() {}

pub fn halt() -> ! {
    loop {
        // SAFETY: Waiting for an event has no memory effects.
        unsafe { core::arch::asm!("wfe", options(nomem, nostack)) };
    }
}
