// SPDX-License-Identifier: MPL-2.0

//! A port-mapped 16550 UART, the first console sink on x86.
//!
//! Ref: https://wiki.osdev.org/Serial_Ports

use crate::arch::x86::device::io_port::{IoPort, ReadWriteAccess, WriteOnlyAccess};
use crate::console::{register_console, Console};
use crate::logger::LogLevel;

pub struct SerialPort {
    data: IoPort<u8, ReadWriteAccess>,
    int_en: IoPort<u8, WriteOnlyAccess>,
    fifo_ctrl: IoPort<u8, WriteOnlyAccess>,
    line_ctrl: IoPort<u8, WriteOnlyAccess>,
    modem_ctrl: IoPort<u8, WriteOnlyAccess>,
    line_status: IoPort<u8, ReadWriteAccess>,
}

impl SerialPort {
    /// # Safety
    ///
    /// `port` must be the base of a real serial port.
    pub const unsafe fn new(port: u16) -> Self {
        // SAFETY: Delegated to the caller.
        unsafe {
            Self {
                data: IoPort::new(port),
                int_en: IoPort::new(port + 1),
                fifo_ctrl: IoPort::new(port + 2),
                line_ctrl: IoPort::new(port + 3),
                modem_ctrl: IoPort::new(port + 4),
                line_status: IoPort::new(port + 5),
            }
        }
    }

    pub fn init(&self) {
        // Disable interrupts, enable DLAB and program 38400 bps.
        self.int_en.write(0x00);
        self.line_ctrl.write(0x80);
        self.data.write(0x03);
        self.int_en.write(0x00);
        // 8 bits, no parity, one stop bit.
        self.line_ctrl.write(0x03);
        // Enable FIFO, clear queues, 14-byte watermark.
        self.fifo_ctrl.write(0xC7);
        // Data terminal ready, request to send, OUT2.
        self.modem_ctrl.write(0x0B);
    }

    fn send(&self, byte: u8) {
        const OUTPUT_EMPTY: u8 = 1 << 5;
        while self.line_status.read() & OUTPUT_EMPTY == 0 {
            core::hint::spin_loop();
        }
        self.data.write(byte);
    }
}

struct SerialConsole {
    port: SerialPort,
}

impl Console for SerialConsole {
    fn name(&self) -> &str {
        "ttyS0"
    }

    fn write(&self, _level: LogLevel, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' {
                self.port.send(b'\r');
            }
            self.port.send(byte);
        }
    }
}

const SERIAL_COM1_PORT: u16 = 0x3F8;

// SAFETY: COM1 is a legacy fixed-address serial port.
static CONSOLE: SerialConsole = SerialConsole {
    port: unsafe { SerialPort::new(SERIAL_COM1_PORT) },
};

pub(crate) fn init() {
    CONSOLE.port.init();
    register_console(&CONSOLE).unwrap();
}
