// SPDX-License-Identifier: MPL-2.0

//! Port IO emulation for hosted runs: a scratch 64 KiB port space.

use crate::sync::SpinLock;

/// Port handles are shifted into this window so a raw window address still
/// classifies as PIO or MMIO.
pub const PORT_IO_WINDOW_OFFSET: usize = 0x1_0000;
pub const PORT_IO_WINDOW_LEN: usize = 0x1_0000;

static PORT_SPACE: SpinLock<PortSpace> = SpinLock::new(PortSpace {
    bytes: [0; PORT_IO_WINDOW_LEN],
});

struct PortSpace {
    bytes: [u8; PORT_IO_WINDOW_LEN],
}

fn read(port: u16, width: usize) -> u64 {
    let space = PORT_SPACE.lock();
    let mut value = 0u64;
    for i in 0..width {
        let index = (port as usize + i) & (PORT_IO_WINDOW_LEN - 1);
        value |= (space.bytes[index] as u64) << (i * 8);
    }
    value
}

fn write(port: u16, width: usize, value: u64) {
    let mut space = PORT_SPACE.lock();
    for i in 0..width {
        let index = (port as usize + i) & (PORT_IO_WINDOW_LEN - 1);
        space.bytes[index] = (value >> (i * 8)) as u8;
    }
}

pub fn port_read8(port: u16) -> u8 {
    read(port, 1) as u8
}

pub fn port_read16(port: u16) -> u16 {
    read(port, 2) as u16
}

pub fn port_read32(port: u16) -> u32 {
    read(port, 4) as u32
}

pub fn port_read64(port: u16) -> u64 {
    read(port, 8)
}

pub fn port_write8(port: u16, value: u8) {
    write(port, 1, value as u64)
}

pub fn port_write16(port: u16, value: u16) {
    write(port, 2, value as u64)
}

pub fn port_write32(port: u16, value: u32) {
    write(port, 4, value as u64)
}

pub fn port_write64(port: u16, value: u64) {
    write(port, 8, value)
}
