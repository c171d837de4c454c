// SPDX-License-Identifier: MPL-2.0

mod irq;

pub use self::irq::{disable_local, DisabledLocalIrqGuard};
