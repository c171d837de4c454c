// SPDX-License-Identifier: MPL-2.0

//! A hosted stand-in for the architecture layer.
//!
//! Lets `cargo test` exercise the allocator, page-table and unwinder code
//! in an ordinary process: the direct map is an identity map, the
//! translation root is a recorded value, IRQ state is a flag and port IO
//! targets a scratch port space. The entry formats mirror x86-64 so the
//! hosted runs see the same bit-level behaviour as the real thing.

pub mod io;
pub mod irq;
pub mod mm;
pub mod unwind;

pub(crate) fn early_init() {}

pub(crate) fn late_init() {}

pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
