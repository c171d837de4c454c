// SPDX-License-Identifier: MPL-2.0

//! Inlined invariant checks with automatic file/line reporting.

/// Panics when the condition holds. Invariant violations are terminal; there
/// is no unwinding across a kernel bug.
#[macro_export]
macro_rules! bug_on {
    ($cond:expr) => {
        if $cond {
            panic!("BUG: `{}`", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            panic!($($arg)+);
        }
    };
}

/// Logs the condition with its location and hands it back, so callers can
/// early-return on the same expression they report.
#[macro_export]
macro_rules! warn_on {
    ($cond:expr) => {{
        let cond = $cond;
        if cond {
            log::warn!("WARN: `{}` at {}:{}", stringify!($cond), file!(), line!());
        }
        cond
    }};
}
