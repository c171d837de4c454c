// SPDX-License-Identifier: MPL-2.0

//! Terminal panic handling.
//!
//! A panic prints its reason, dumps the stack through the unwinder and
//! halts the CPU. There is no unwinding across a panic and no recovery; a
//! panic raised while another is in progress simply hangs the CPU instead
//! of recursing.

#[cfg(target_os = "none")]
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "none")]
static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Halts the CPU forever.
pub fn abort() -> ! {
    crate::arch::halt()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    if PANIC_IN_PROGRESS.swap(true, Ordering::SeqCst) {
        // A panic while panicking: no diagnostics, just stop.
        abort();
    }

    log::error!("kernel {}", info);
    crate::unwind::dump_stack(None);
    abort()
}
