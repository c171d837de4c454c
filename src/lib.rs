// SPDX-License-Identifier: MPL-2.0

//! The hard core of the Vermilion kernel: virtual memory, the boot physical
//! allocator, IO windows, the early console pipeline and the DWARF unwinder.
//!
//! Everything else in the kernel (drivers, filesystems, the scheduler) is
//! built on top of this crate and stays out of it.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;
#[macro_use]
extern crate static_assertions;

use core::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
pub mod bug;
#[macro_use]
pub mod logger;

pub mod arch;
pub mod boot;
pub mod console;
mod error;
pub mod fmt;
pub mod io;
pub mod mm;
pub mod panicking;
pub mod prelude;
pub mod smp;
pub mod sync;
pub mod trap;
pub mod unwind;
pub mod util;

pub use self::{error::Error, prelude::Result};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Brings the core up in its one legal order: console sinks, the log
/// pipeline, the unwinder, the boot physical allocator, and finally the
/// kernel address space.
///
/// The boot context must already be parsed by the loader shim; this crate
/// never touches the wire format. Calling `init` twice is a bug.
pub fn init(ctx: boot::BootContext) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        panic!("kernel core initialized twice");
    }

    arch::early_init();
    logger::init();
    boot::init(ctx);

    if let Err(err) = unwind::init() {
        log::warn!("stack traces are not available: {:?}", err);
    }

    mm::boot_alloc::init();
    #[cfg(target_os = "none")]
    mm::heap_allocator::init();

    apply_kernel_params();

    #[cfg(target_os = "none")]
    mm::kspace::init();

    smp::init();
    arch::late_init();
}

/// Parameters the core itself understands on the kernel command line.
fn apply_kernel_params() {
    use boot::kcmdline::{Param, ParamSlot};

    let mut loglevel: u8 = logger::DEFAULT_LOG_LEVEL as u8;
    {
        let mut params = [Param::new("loglevel", ParamSlot::U8(&mut loglevel))];
        boot::kcmdline::parse(boot::kernel_cmdline(), &mut params, None);
    }
    if let Some(level) = logger::LogLevel::from_syslog(loglevel) {
        logger::set_log_level(level);
    }
}
