// SPDX-License-Identifier: MPL-2.0

use core::marker::PhantomData;

use crate::arch::irq;

/// Disable all IRQs on the current CPU (i.e., locally).
///
/// This function returns a guard object, which will automatically enable
/// local IRQs again when it is dropped. It works correctly even when called
/// in a nested way: the IRQs are only re-enabled when the outermost guard is
/// dropped.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled local IRQs.
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    _not_send: PhantomData<*mut ()>,
}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = irq::is_local_enabled();
        if was_enabled {
            irq::disable_local();
        }
        Self {
            was_enabled,
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            irq::enable_local();
        }
    }
}
