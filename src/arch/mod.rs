// SPDX-License-Identifier: MPL-2.0

//! Architecture support.
//!
//! Exactly one implementation is compiled in: `x86` on bare-metal x86-64,
//! the experimental `arm` port on bare-metal AArch64, and `host` anywhere
//! else so the test suite can drive the portable code on a development
//! machine.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_os = "none"))] {
        pub mod x86;
        pub use self::x86::*;
    } else if #[cfg(all(target_arch = "aarch64", target_os = "none"))] {
        pub mod arm;
        pub use self::arm::*;
    } else {
        pub mod host;
        pub use self::host::*;
    }
}
