// SPDX-License-Identifier: MPL-2.0

mod spin;

pub use self::spin::{SpinLock, SpinLockGuard};
