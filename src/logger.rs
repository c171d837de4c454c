// SPDX-License-Identifier: MPL-2.0

//! The log pipeline.
//!
//! A log record is `\x01<digit><body>`: an ASCII SOH byte, the syslog
//! severity as one digit, then the printf-formatted body. Records without a
//! recognised prefix default to NOTICE. Formatting happens once, into a
//! fixed stack buffer, before the record fans out to the console sinks.
//!
//! The `log` crate facade is wired into the same pipeline so that library
//! code using `log::warn!` and friends ends up on the same sinks.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::console::console_write;
use crate::fmt::{format_into, FmtArg};

/// Syslog severities. Lower values are more severe.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum LogLevel {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warn = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    pub fn from_syslog(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Emerg,
            1 => Self::Alert,
            2 => Self::Crit,
            3 => Self::Err,
            4 => Self::Warn,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }
}

/// The severity assigned to records with no (or an unrecognised) prefix.
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Notice;

/// ASCII SOH, the record prefix marker.
pub const PREFIX_CHAR: u8 = 0x01;

const LOG_BUF_SIZE: usize = 256;

static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Debug as u8);

/// Records strictly less severe than `level` are dropped by the pipeline.
pub fn set_log_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    LogLevel::from_syslog(MAX_LEVEL.load(Ordering::Relaxed)).unwrap_or(LogLevel::Debug)
}

fn split_severity(msg: &str) -> (LogLevel, &str) {
    let bytes = msg.as_bytes();
    if bytes.len() >= 2 && bytes[0] == PREFIX_CHAR && bytes[1].is_ascii_digit() {
        if let Some(level) = LogLevel::from_syslog(bytes[1] - b'0') {
            return (level, &msg[2..]);
        }
    }
    (DEFAULT_LOG_LEVEL, msg)
}

fn emit(level: LogLevel, bytes: &[u8]) {
    if level > log_level() {
        return;
    }
    console_write(level, bytes);
}

/// Formats one record and fans it out. `msg` may carry a severity prefix;
/// without one the record goes out at NOTICE. A malformed format string
/// drops the record instead of emitting garbage.
pub fn print(msg: &str, args: &[FmtArg]) {
    let (level, body) = split_severity(msg);
    vprint(level, body, args);
}

pub fn vprint(level: LogLevel, body: &str, args: &[FmtArg]) {
    let mut buf = [0u8; LOG_BUF_SIZE];
    let count = match format_into(&mut buf, body, args) {
        Ok(count) => count,
        Err(_) => return,
    };
    emit(level, &buf[..count]);
}

#[macro_export]
macro_rules! pr_emerg {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x010", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_alert {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x011", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_crit {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x012", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_err {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x013", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_warn {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x014", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_notice {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x015", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_info {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x016", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

#[macro_export]
macro_rules! pr_debug {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::logger::print(concat!("\x017", $fmt), &[$($crate::fmt::FmtArg::from($arg)),*])
    };
}

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

struct FixedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl core::fmt::Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let count = s.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + count].copy_from_slice(&s.as_bytes()[..count]);
        self.len += count;
        Ok(())
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        use core::fmt::Write;

        let level = match record.level() {
            log::Level::Error => LogLevel::Err,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        };

        let mut buf = [0u8; LOG_BUF_SIZE];
        let mut writer = FixedWriter {
            buf: &mut buf,
            len: 0,
        };
        let _ = write!(writer, "{}\n", record.args());
        let len = writer.len;
        emit(level, &buf[..len]);
    }

    fn flush(&self) {}
}

pub(crate) fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Debug))
        .unwrap();
}
