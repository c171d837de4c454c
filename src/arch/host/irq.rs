// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};

static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

pub(crate) fn is_local_enabled() -> bool {
    IRQ_ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn enable_local() {
    IRQ_ENABLED.store(true, Ordering::Relaxed);
}

pub(crate) fn disable_local() {
    IRQ_ENABLED.store(false, Ordering::Relaxed);
}
