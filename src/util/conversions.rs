// SPDX-License-Identifier: MPL-2.0

//! String-to-number conversions for command-line values.
//!
//! The grammar matches what the command line has always accepted: an
//! optional sign, then an optional base prefix (`0x`, `0b`, or a leading `0`
//! for octal), then digits. Overflow and out-of-range narrowing report
//! [`Error::Overflow`], not a clamped value.

use crate::prelude::Result;
use crate::Error;

fn consume_base(s: &mut &str) -> u32 {
    if let Some(rest) = s.strip_prefix("0x") {
        *s = rest;
        return 16;
    }
    if let Some(rest) = s.strip_prefix("0b") {
        *s = rest;
        return 2;
    }
    if let Some(rest) = s.strip_prefix('0') {
        if rest.is_empty() {
            // A lone zero is just a decimal zero, not an octal prefix.
            return 10;
        }
        *s = rest;
        return 8;
    }
    if s.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return 10;
    }
    0
}

fn digit_value(c: u8) -> Result<u64> {
    match c {
        b'0'..=b'9' => Ok((c - b'0') as u64),
        b'a'..=b'f' => Ok((c - b'a') as u64 + 10),
        b'A'..=b'F' => Ok((c - b'A') as u64 + 10),
        _ => Err(Error::InvalidArgs),
    }
}

fn do_parse_u64(s: &str, base: u32) -> Result<u64> {
    if s.is_empty() {
        return Err(Error::InvalidArgs);
    }

    let mut number: u64 = 0;
    for c in s.bytes() {
        let digit = digit_value(c)?;
        if digit >= base as u64 {
            return Err(Error::InvalidArgs);
        }
        number = number
            .checked_mul(base as u64)
            .and_then(|n| n.checked_add(digit))
            .ok_or(Error::Overflow)?;
    }
    Ok(number)
}

/// Parses with an explicit base; base 0 means "detect from the prefix".
pub fn parse_u64_with_base(s: &str, base: u32) -> Result<u64> {
    let mut s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(Error::InvalidArgs);
    }

    let detected = consume_base(&mut s);
    if base == 0 && detected == 0 {
        return Err(Error::InvalidArgs);
    }
    do_parse_u64(s, if base != 0 { base } else { detected })
}

pub fn parse_u64(s: &str) -> Result<u64> {
    parse_u64_with_base(s, 0)
}

pub fn parse_i64(s: &str) -> Result<i64> {
    if let Some(mut rest) = s.strip_prefix('-') {
        let detected = consume_base(&mut rest);
        let magnitude = do_parse_u64(rest, if detected != 0 { detected } else { 10 })?;
        if magnitude > i64::MIN.unsigned_abs() {
            return Err(Error::Overflow);
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        let magnitude = parse_u64(s)?;
        if magnitude > i64::MAX as u64 {
            return Err(Error::Overflow);
        }
        Ok(magnitude as i64)
    }
}

macro_rules! narrowing_parsers {
    ($($uname:ident -> $uty:ty, $iname:ident -> $ity:ty;)*) => {
        $(
            pub fn $uname(s: &str) -> Result<$uty> {
                let value = parse_u64(s)?;
                <$uty>::try_from(value).map_err(|_| Error::Overflow)
            }

            pub fn $iname(s: &str) -> Result<$ity> {
                let value = parse_i64(s)?;
                <$ity>::try_from(value).map_err(|_| Error::Overflow)
            }
        )*
    };
}

narrowing_parsers! {
    parse_u8 -> u8, parse_i8 -> i8;
    parse_u16 -> u16, parse_i16 -> i16;
    parse_u32 -> u32, parse_i32 -> i32;
}

/// The boolean accept-set: `y`/`t`/`on`/`1` and `n`/`f`/`off`/`0`,
/// case-insensitive.
pub fn parse_bool(s: &str) -> Result<bool> {
    if s.eq_ignore_ascii_case("y")
        || s.eq_ignore_ascii_case("t")
        || s.eq_ignore_ascii_case("on")
        || s == "1"
    {
        return Ok(true);
    }
    if s.eq_ignore_ascii_case("n")
        || s.eq_ignore_ascii_case("f")
        || s.eq_ignore_ascii_case("off")
        || s == "0"
    {
        return Ok(false);
    }
    Err(Error::InvalidArgs)
}
