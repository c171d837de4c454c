// SPDX-License-Identifier: MPL-2.0

//! The prelude.

pub type Result<T> = core::result::Result<T, crate::error::Error>;

pub use crate::mm::{Paddr, Vaddr, PAGE_SIZE};
