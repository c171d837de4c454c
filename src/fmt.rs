// SPDX-License-Identifier: MPL-2.0

//! The formatting engine behind the log pipeline.
//!
//! This is deliberately not `core::fmt`: log formatting targets a fixed
//! stack buffer, reports malformed format strings as errors instead of
//! panicking, and speaks the classic specifier grammar (`%d`, `%08x`,
//! `%.*s`, ...) used throughout the kernel. Rust has no varargs, so the
//! `pr_*` macros hand the engine a slice of [`FmtArg`]s.

use crate::prelude::Result;
use crate::util::conversions::parse_u64_with_base;
use crate::Error;

/// One formatting argument.
#[derive(Clone, Copy, Debug)]
pub enum FmtArg<'a> {
    Int(i64),
    UInt(u64),
    Char(char),
    Str(&'a str),
    Ptr(usize),
}

macro_rules! fmt_arg_from {
    ($variant:ident: $($ty:ty),*) => {
        $(
            impl From<$ty> for FmtArg<'_> {
                fn from(value: $ty) -> Self {
                    FmtArg::$variant(value as _)
                }
            }
        )*
    };
}

fmt_arg_from!(Int: i8, i16, i32, i64, isize);
fmt_arg_from!(UInt: u8, u16, u32, u64);
fmt_arg_from!(Ptr: usize);

impl From<char> for FmtArg<'_> {
    fn from(value: char) -> Self {
        FmtArg::Char(value)
    }
}

impl<'a> From<&'a str> for FmtArg<'a> {
    fn from(value: &'a str) -> Self {
        FmtArg::Str(value)
    }
}

/// A possibly-absent string; `%s` substitutes `"<null>"` for the absent one.
impl<'a> From<Option<&'a str>> for FmtArg<'a> {
    fn from(value: Option<&'a str>) -> Self {
        FmtArg::Str(value.unwrap_or("<null>"))
    }
}

impl<T> From<*const T> for FmtArg<'_> {
    fn from(value: *const T) -> Self {
        FmtArg::Ptr(value as usize)
    }
}

impl<T> From<*mut T> for FmtArg<'_> {
    fn from(value: *mut T) -> Self {
        FmtArg::Ptr(value as usize)
    }
}

struct FmtBuf<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl FmtBuf<'_> {
    fn write_one(&mut self, c: u8) {
        if self.written < self.buf.len() {
            self.buf[self.written] = c;
        }
        self.written += 1;
    }

    fn write_many(&mut self, bytes: &[u8]) {
        if self.written < self.buf.len() {
            let count = bytes.len().min(self.buf.len() - self.written);
            self.buf[self.written..self.written + count].copy_from_slice(&bytes[..count]);
        }
        self.written += bytes.len();
    }

    fn stored(&self) -> usize {
        self.written.min(self.buf.len())
    }
}

struct FmtSpec {
    is_signed: bool,
    prepend: bool,
    uppercase: bool,
    left_justify: bool,
    alternate_form: bool,
    has_precision: bool,
    pad_char: u8,
    prepend_char: u8,
    min_width: u64,
    precision: u64,
    base: u32,
}

impl FmtSpec {
    fn new() -> Self {
        Self {
            is_signed: false,
            prepend: false,
            uppercase: false,
            left_justify: false,
            alternate_form: false,
            has_precision: false,
            pad_char: b' ',
            prepend_char: 0,
            min_width: 0,
            precision: 0,
            base: 10,
        }
    }
}

fn hex_char(upper: bool, value: u64) -> u8 {
    const UPPER: &[u8; 16] = b"0123456789ABCDEF";
    const LOWER: &[u8; 16] = b"0123456789abcdef";
    (if upper { UPPER } else { LOWER })[value as usize]
}

fn write_padding(fb: &mut FmtBuf, fm: &FmtSpec, repr_size: usize) {
    let mut mw = fm.min_width;
    if mw <= repr_size as u64 {
        return;
    }
    mw -= repr_size as u64;

    while mw > 0 {
        fb.write_one(if fm.left_justify { b' ' } else { fm.pad_char });
        mw -= 1;
    }
}

const REPR_BUFFER_SIZE: usize = 32;

fn write_integer(fb: &mut FmtBuf, fm: &FmtSpec, mut value: u64) {
    let mut repr = [0u8; REPR_BUFFER_SIZE];
    let mut index = REPR_BUFFER_SIZE;
    let mut negative = false;

    if fm.is_signed {
        let as_signed = value as i64;
        if as_signed < 0 {
            value = as_signed.unsigned_abs();
            negative = true;
        }
    }

    if fm.prepend || negative {
        fb.write_one(if negative { b'-' } else { fm.prepend_char });
    }

    while value != 0 {
        let remainder = value % fm.base as u64;
        value /= fm.base as u64;

        index -= 1;
        repr[index] = match fm.base {
            16 => hex_char(fm.uppercase, remainder),
            8 | 10 => remainder as u8 + b'0',
            _ => b'?',
        };
    }
    let mut repr_size = REPR_BUFFER_SIZE - index;

    if repr_size == 0 {
        index -= 1;
        repr[index] = b'0';
        repr_size = 1;
    }

    if fm.alternate_form {
        if fm.base == 16 {
            index -= 1;
            repr[index] = if fm.uppercase { b'X' } else { b'x' };
            index -= 1;
            repr[index] = b'0';
            repr_size += 2;
        } else if fm.base == 8 {
            index -= 1;
            repr[index] = b'0';
            repr_size += 1;
        }
    }

    if fm.left_justify {
        fb.write_many(&repr[index..index + repr_size]);
        write_padding(fb, fm, repr_size);
    } else {
        write_padding(fb, fm, repr_size);
        fb.write_many(&repr[index..index + repr_size]);
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn consume(&mut self, tok: &str) -> bool {
        if let Some(rest) = self.rest.strip_prefix(tok) {
            self.rest = rest;
            return true;
        }
        false
    }

    fn consume_one_of(&mut self, tok_list: &str) -> Option<u8> {
        let first = *self.rest.as_bytes().first()?;
        if tok_list.as_bytes().contains(&first) {
            self.rest = &self.rest[1..];
            return Some(first);
        }
        None
    }

    fn consume_digits(&mut self) -> &'a str {
        let end = self
            .rest
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let digits = &self.rest[..end];
        self.rest = &self.rest[end..];
        digits
    }
}

enum ParseNumberMode {
    Maybe,
    Must,
}

fn parse_number(cursor: &mut Cursor, mode: ParseNumberMode) -> Result<Option<u64>> {
    let digits = cursor.consume_digits();
    if digits.is_empty() {
        return match mode {
            ParseNumberMode::Maybe => Ok(None),
            ParseNumberMode::Must => Err(Error::InvalidArgs),
        };
    }
    parse_u64_with_base(digits, 10).map(Some)
}

struct Args<'a, 'b> {
    rest: &'b [FmtArg<'a>],
}

impl<'a> Args<'a, '_> {
    fn next(&mut self) -> Result<FmtArg<'a>> {
        let (first, rest) = self.rest.split_first().ok_or(Error::InvalidArgs)?;
        self.rest = rest;
        Ok(*first)
    }

    fn next_unsigned(&mut self) -> Result<u64> {
        match self.next()? {
            FmtArg::Int(v) => Ok(v as u64),
            FmtArg::UInt(v) => Ok(v),
            FmtArg::Ptr(v) => Ok(v as u64),
            FmtArg::Char(c) => Ok(c as u64),
            FmtArg::Str(_) => Err(Error::InvalidArgs),
        }
    }

    fn next_str(&mut self) -> Result<&'a str> {
        match self.next()? {
            FmtArg::Str(s) => Ok(s),
            _ => Err(Error::InvalidArgs),
        }
    }
}

fn base_from_specifier(specifier: u8) -> u32 {
    match specifier {
        b'x' | b'X' => 16,
        b'o' => 8,
        _ => 10,
    }
}

/// Truncation applied by a length modifier, in C `va_arg` fashion.
fn truncate(value: u64, bits: u32, signed: bool) -> u64 {
    if bits >= 64 {
        return value;
    }
    let masked = value & ((1u64 << bits) - 1);
    if signed && masked & (1u64 << (bits - 1)) != 0 {
        masked | (!0u64 << bits)
    } else {
        masked
    }
}

/// Formats `fmt_str` with `args` into `buf`, returning the number of bytes
/// stored. Output that does not fit is counted but dropped, like
/// `vscnprintf`. Malformed specifiers abort with [`Error::InvalidArgs`]
/// rather than producing undefined output.
pub fn format_into(buf: &mut [u8], fmt_str: &str, args: &[FmtArg]) -> Result<usize> {
    let mut fb = FmtBuf { buf, written: 0 };
    let mut fmt = Cursor { rest: fmt_str };
    let mut args = Args { rest: args };

    while !fmt.is_empty() {
        let mut fm = FmtSpec::new();

        let next_offset = fmt.rest.find('%').unwrap_or(fmt.rest.len());
        if next_offset > 0 {
            fb.write_many(&fmt.rest.as_bytes()[..next_offset]);
            fmt.rest = &fmt.rest[next_offset..];
        }
        if fmt.is_empty() {
            break;
        }

        if fmt.consume("%%") {
            fb.write_one(b'%');
            continue;
        }

        fmt.consume("%");

        while let Some(flag) = fmt.consume_one_of("+- 0#") {
            match flag {
                b'+' | b' ' => {
                    fm.prepend = true;
                    fm.prepend_char = flag;
                }
                b'-' => fm.left_justify = true,
                b'0' => fm.pad_char = b'0',
                b'#' => fm.alternate_form = true,
                _ => return Err(Error::InvalidArgs),
            }
        }

        if fmt.consume("*") {
            fm.min_width = (args.next_unsigned()? as i64).max(0) as u64;
        } else if let Some(width) = parse_number(&mut fmt, ParseNumberMode::Maybe)? {
            fm.min_width = width;
        }

        if fmt.consume(".") {
            fm.has_precision = true;
            if fmt.consume("*") {
                fm.precision = (args.next_unsigned()? as i64).max(0) as u64;
            } else {
                fm.precision = parse_number(&mut fmt, ParseNumberMode::Must)?.unwrap_or(0);
            }
        }

        if fmt.consume("c") {
            let c = match args.next()? {
                FmtArg::Char(c) => c,
                FmtArg::Int(v) => (v as u8) as char,
                FmtArg::UInt(v) => (v as u8) as char,
                _ => return Err(Error::InvalidArgs),
            };
            let mut encoded = [0u8; 4];
            fb.write_many(c.encode_utf8(&mut encoded).as_bytes());
            continue;
        }

        if fmt.consume("s") {
            let string = args.next_str()?;
            let mut count = 0u64;
            for byte in string.bytes() {
                if fm.has_precision && count >= fm.precision {
                    break;
                }
                fb.write_one(byte);
                count += 1;
            }
            while count < fm.min_width {
                fb.write_one(b' ');
                count += 1;
            }
            continue;
        }

        if fmt.consume("p") {
            if fmt.consume("S") {
                let string = args.next_str()?;
                let mut size = string.len() as u64;
                if fm.has_precision {
                    size = size.min(fm.precision);
                }
                fb.write_many(&string.as_bytes()[..size as usize]);
                while size < fm.precision {
                    fb.write_one(b' ');
                    size += 1;
                }
                continue;
            }

            // Fixed-width hex with the prefix outside the zero padding.
            let value = args.next_unsigned()?;
            fb.write_many(b"0x");
            fm.base = 16;
            fm.min_width = (core::mem::size_of::<usize>() * 2) as u64;
            fm.pad_char = b'0';
            write_integer(&mut fb, &fm, value);
            continue;
        }

        let bits = if fmt.consume("hh") {
            8
        } else if fmt.consume("h") {
            16
        } else if fmt.consume("ll") || fmt.consume("l") || fmt.consume("z") {
            64
        } else {
            32
        };

        let specifier = if fmt.consume("d") || fmt.consume("i") {
            fm.is_signed = true;
            0
        } else if let Some(spec) = fmt.consume_one_of("oxXu") {
            spec
        } else {
            return Err(Error::InvalidArgs);
        };

        if specifier != 0 {
            fm.base = base_from_specifier(specifier);
            fm.uppercase = specifier == b'X';
        }

        let value = truncate(args.next_unsigned()?, bits, fm.is_signed);
        write_integer(&mut fb, &fm, value);
    }

    Ok(fb.stored())
}
