// SPDX-License-Identifier: MPL-2.0

//! Console output.
//!
//! A console is a named sink for log bytes. Sinks are registered once,
//! early, and every log record fans out to all of them in registration
//! order. The registry is a fixed table: consoles come up long before the
//! kernel heap does.

use crate::logger::LogLevel;
use crate::prelude::Result;
use crate::sync::SpinLock;
use crate::Error;

/// A registered log sink.
pub trait Console: Sync {
    fn name(&self) -> &str;

    /// Writes one log record. The severity prefix is already stripped;
    /// sinks may filter on `level`.
    fn write(&self, level: LogLevel, bytes: &[u8]);
}

const MAX_CONSOLES: usize = 8;

static CONSOLES: SpinLock<[Option<&'static dyn Console>; MAX_CONSOLES]> =
    SpinLock::new([None; MAX_CONSOLES]);

fn console_ptr(con: &'static dyn Console) -> *const () {
    con as *const dyn Console as *const ()
}

/// Registers a sink. Registering the same sink twice is refused.
pub fn register_console(con: &'static dyn Console) -> Result<()> {
    let mut consoles = CONSOLES.lock_irq_disabled();

    if consoles
        .iter()
        .flatten()
        .any(|c| console_ptr(*c) == console_ptr(con))
    {
        return Err(Error::Busy);
    }

    let slot = consoles
        .iter_mut()
        .find(|slot| slot.is_none())
        .ok_or(Error::NoMemory)?;
    *slot = Some(con);
    Ok(())
}

/// Removes a sink by identity.
pub fn unregister_console(con: &'static dyn Console) -> Result<()> {
    let mut consoles = CONSOLES.lock_irq_disabled();

    let idx = consoles
        .iter()
        .position(|slot| slot.is_some_and(|c| console_ptr(c) == console_ptr(con)))
        .ok_or(Error::InvalidArgs)?;

    // Close the gap so fan-out order stays registration order.
    for i in idx..MAX_CONSOLES - 1 {
        consoles[i] = consoles[i + 1];
    }
    consoles[MAX_CONSOLES - 1] = None;
    Ok(())
}

/// Fans one record out to every registered sink, in registration order.
pub(crate) fn console_write(level: LogLevel, bytes: &[u8]) {
    let consoles = CONSOLES.lock_irq_disabled();
    for con in consoles.iter().flatten() {
        con.write(level, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use crate::sync::SpinLock;
    use alloc::vec::Vec;

    struct RecordingConsole {
        records: SpinLock<Vec<(LogLevel, Vec<u8>)>>,
    }

    impl RecordingConsole {
        fn leaked() -> &'static Self {
            alloc::boxed::Box::leak(alloc::boxed::Box::new(Self {
                records: SpinLock::new(Vec::new()),
            }))
        }
    }

    impl Console for RecordingConsole {
        fn name(&self) -> &str {
            "recording"
        }

        fn write(&self, level: LogLevel, bytes: &[u8]) {
            self.records.lock().push((level, bytes.to_vec()));
        }
    }

    #[test]
    fn duplicate_registration_is_busy() {
        let con = RecordingConsole::leaked();
        register_console(con).unwrap();
        assert_eq!(register_console(con), Err(Error::Busy));
        unregister_console(con).unwrap();
    }

    #[test]
    fn unregister_unknown_is_invalid() {
        let con = RecordingConsole::leaked();
        assert_eq!(unregister_console(con), Err(Error::InvalidArgs));
    }

    #[test]
    fn fan_out_hits_sinks_in_registration_order() {
        let first = RecordingConsole::leaked();
        let second = RecordingConsole::leaked();
        register_console(first).unwrap();
        register_console(second).unwrap();

        console_write(LogLevel::Err, b"console-fanout");

        // Other tests may fan records out concurrently; only count ours.
        for con in [first, second] {
            let records = con.records.lock();
            let ours: Vec<_> = records
                .iter()
                .filter(|(_, bytes)| &bytes[..] == &b"console-fanout"[..])
                .collect();
            assert_eq!(ours.len(), 1);
            assert_eq!(ours[0].0, LogLevel::Err);
        }

        unregister_console(first).unwrap();
        unregister_console(second).unwrap();
    }
}
