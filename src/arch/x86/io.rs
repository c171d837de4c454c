// SPDX-License-Identifier: MPL-2.0

//! Port IO primitives.

use x86_64::structures::port::{PortRead, PortWrite};

/// Port handles are shifted into this window so a raw window address still
/// classifies as PIO or MMIO.
pub const PORT_IO_WINDOW_OFFSET: usize = 0x1_0000;
pub const PORT_IO_WINDOW_LEN: usize = 0x1_0000;

pub fn port_read8(port: u16) -> u8 {
    // SAFETY: Port access rights were checked when the window was mapped.
    unsafe { u8::read_from_port(port) }
}

pub fn port_read16(port: u16) -> u16 {
    // SAFETY: As above.
    unsafe { u16::read_from_port(port) }
}

pub fn port_read32(port: u16) -> u32 {
    // SAFETY: As above.
    unsafe { u32::read_from_port(port) }
}

pub fn port_read64(_port: u16) -> u64 {
    panic!("x86 has no 64-bit port I/O");
}

pub fn port_write8(port: u16, value: u8) {
    // SAFETY: As above.
    unsafe { u8::write_to_port(port, value) }
}

pub fn port_write16(port: u16, value: u16) {
    // SAFETY: As above.
    unsafe { u16::write_to_port(port, value) }
}

pub fn port_write32(port: u16, value: u32) {
    // SAFETY: As above.
    unsafe { u32::write_to_port(port, value) }
}

pub fn port_write64(_port: u16, _value: u64) {
    panic!("x86 has no 64-bit port I/O");
}
