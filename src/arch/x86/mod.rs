// SPDX-License-Identifier: MPL-2.0

//! x86-64 architecture support.

pub mod device;
pub mod io;
pub mod irq;
pub mod mm;
pub mod unwind;

use crate::mm::kspace::LINEAR_MAPPING_BASE_VADDR;

pub(crate) fn early_init() {
    // The loader hands over with a direct map of physical memory at the
    // canonical offset; record it before anything touches table frames.
    crate::mm::set_linear_mapping_base(LINEAR_MAPPING_BASE_VADDR);

    mm::probe_paging_levels();
    device::serial::init();
}

pub(crate) fn late_init() {}

pub fn halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
