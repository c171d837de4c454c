// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
///
/// Fatal conditions (freeing memory the allocator has never seen, a present
/// entry pointing at garbage, exhausted preallocated kernel tables) are not
/// errors; they panic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A malformed argument: a bad format string, a bad command-line value,
    /// bad DWARF operands.
    InvalidArgs,
    /// No physical frame, no virtual gap, no slot left in a fixed table.
    NoMemory,
    /// Size arithmetic overflowed, or a buffer cursor ran past its end.
    Overflow,
    /// An unimplemented path was reached, e.g. an unknown DWARF augmentation.
    NotSupported,
    /// The unwinder is not available.
    NoDevice,
    /// The resource is already registered.
    Busy,
}
