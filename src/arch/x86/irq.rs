// SPDX-License-Identifier: MPL-2.0

use x86_64::instructions::interrupts;

pub(crate) fn is_local_enabled() -> bool {
    interrupts::are_enabled()
}

pub(crate) fn enable_local() {
    interrupts::enable();
}

pub(crate) fn disable_local() {
    interrupts::disable();
}
