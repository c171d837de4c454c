// SPDX-License-Identifier: MPL-2.0

//! The kernel command-line parser.
//!
//! The grammar is whitespace-separated `key[=value]` tokens. A value may be
//! quoted with `"..."` to embed spaces. A bare key sets a boolean parameter
//! to true. Keys are dash/underscore-insensitive, so `foo-bar` and
//! `foo_bar` name the same parameter. `--` terminates kernel parameters;
//! everything after it belongs to init and is returned to the caller.

use alloc::string::String;

use crate::prelude::Result;
use crate::util::conversions;
use crate::Error;

/// A typed destination for one command-line parameter.
pub enum ParamSlot<'a> {
    Bool(&'a mut bool),
    U8(&'a mut u8),
    I8(&'a mut i8),
    U16(&'a mut u16),
    I16(&'a mut i16),
    U32(&'a mut u32),
    I32(&'a mut i32),
    U64(&'a mut u64),
    I64(&'a mut i64),
    Str(&'a mut String),
}

/// A named parameter bound to its typed slot.
pub struct Param<'a> {
    name: &'static str,
    slot: ParamSlot<'a>,
}

impl<'a> Param<'a> {
    pub fn new(name: &'static str, slot: ParamSlot<'a>) -> Self {
        Self { name, slot }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Only booleans may be set by a bare key with no value.
    fn allows_empty_value(&self) -> bool {
        matches!(self.slot, ParamSlot::Bool(_))
    }

    fn set(&mut self, value: &str) -> Result<()> {
        match &mut self.slot {
            ParamSlot::Bool(slot) => {
                // A bare key means true, e.g. "bar" in "foo=1 bar baz=0".
                **slot = if value.is_empty() {
                    true
                } else {
                    conversions::parse_bool(value)?
                };
            }
            ParamSlot::U8(slot) => **slot = conversions::parse_u8(value)?,
            ParamSlot::I8(slot) => **slot = conversions::parse_i8(value)?,
            ParamSlot::U16(slot) => **slot = conversions::parse_u16(value)?,
            ParamSlot::I16(slot) => **slot = conversions::parse_i16(value)?,
            ParamSlot::U32(slot) => **slot = conversions::parse_u32(value)?,
            ParamSlot::I32(slot) => **slot = conversions::parse_i32(value)?,
            ParamSlot::U64(slot) => **slot = conversions::parse_u64(value)?,
            ParamSlot::I64(slot) => **slot = conversions::parse_i64(value)?,
            ParamSlot::Str(slot) => {
                slot.clear();
                slot.push_str(value);
            }
        }
        Ok(())
    }
}

/// `foo-bar` and `foo_bar` name the same parameter.
fn name_matches(param_name: &str, key: &str) -> bool {
    param_name.len() == key.len()
        && param_name.bytes().zip(key.bytes()).all(|(lhs, rhs)| {
            let dash = |c: u8| if c == b'-' { b'_' } else { c };
            dash(lhs) == dash(rhs)
        })
}

fn find_param<'a, 'p>(params: &'a mut [Param<'p>], key: &str) -> Option<&'a mut Param<'p>> {
    params.iter_mut().find(|p| name_matches(p.name, key))
}

fn trim_leading(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii_whitespace())
}

/// Parses `cmdline` into the given parameters and returns the init tail
/// (everything after `--`, leading whitespace trimmed).
///
/// Unknown keys are reported through `unknown` when provided; bad values
/// are logged and skipped. Each matched parameter's typed setter runs
/// exactly once per occurrence.
pub fn parse<'c>(
    cmdline: &'c str,
    params: &mut [Param<'_>],
    mut unknown: Option<&mut dyn FnMut(&str, &str)>,
) -> &'c str {
    let mut rest = trim_leading(cmdline);

    loop {
        let token_start = rest;
        let mut key_len = 0usize;
        let mut value = "";

        while !rest.is_empty() {
            // The rest of the arguments are for init.
            if let Some(tail) = rest.strip_prefix("--") {
                return trim_leading(tail);
            }

            let bytes = rest.as_bytes();

            // A space ends the token; the value stays empty.
            if bytes[0].is_ascii_whitespace() {
                rest = trim_leading(rest);
                break;
            }

            // This key has a value as well.
            if bytes[0] == b'=' {
                rest = &rest[1..];

                let value_end;
                if let Some(quoted) = rest.strip_prefix('"') {
                    rest = quoted;
                    value_end = rest.find('"');
                } else {
                    value_end = rest.find(|c: char| c.is_ascii_whitespace());
                }

                let end = value_end.unwrap_or(rest.len());
                value = &rest[..end];
                rest = &rest[end..];
                // Step past a closing quote, if one terminated the value.
                if value_end.is_some() && rest.starts_with('"') {
                    rest = &rest[1..];
                }
                break;
            }

            // Keys are byte-compared, but stay on char boundaries so odd
            // input cannot split a multi-byte sequence.
            let ch_len = rest.chars().next().map_or(1, |c| c.len_utf8());
            key_len += ch_len;
            rest = &rest[ch_len..];
        }

        let key = &token_start[..key_len];
        if key.is_empty() {
            return rest;
        }

        match find_param(params, key) {
            Some(param) => {
                let result = if !value.is_empty() || param.allows_empty_value() {
                    param.set(value)
                } else {
                    Err(Error::InvalidArgs)
                };
                if let Err(err) = result {
                    pr_err!("bad \"%s\" value \"%s\" (%d)\n", key, value, err as i32);
                }
            }
            None => {
                if let Some(cb) = unknown.as_mut() {
                    cb(key, value);
                }
            }
        }

        rest = trim_leading(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    #[test]
    fn full_grammar_round_trip() {
        let mut foo = false;
        let mut bar = 0u32;
        let mut baz = false;
        let mut cafe = String::new();
        let mut x = 0i8;

        let tail = {
            let mut params = [
                Param::new("foo", ParamSlot::Bool(&mut foo)),
                Param::new("bar", ParamSlot::U32(&mut bar)),
                Param::new("baz", ParamSlot::Bool(&mut baz)),
                Param::new("cafe", ParamSlot::Str(&mut cafe)),
                Param::new("x", ParamSlot::I8(&mut x)),
            ];
            parse(
                "foo bar=123 baz=on cafe=\"1 2\" x=-3 -- rest",
                &mut params,
                None,
            )
        };

        assert_eq!(foo, true);
        assert_eq!(bar, 123);
        assert_eq!(baz, true);
        assert_eq!(cafe, "1 2");
        assert_eq!(x, -3);
        assert_eq!(tail, "rest");
    }

    #[test]
    fn bool_accept_set() {
        let mut x = true;
        let mut y = false;
        let mut z = false;
        let mut a = true;
        let mut b = false;
        let mut c = true;

        let mut params = [
            Param::new("x", ParamSlot::Bool(&mut x)),
            Param::new("y", ParamSlot::Bool(&mut y)),
            Param::new("z", ParamSlot::Bool(&mut z)),
            Param::new("a", ParamSlot::Bool(&mut a)),
            Param::new("b", ParamSlot::Bool(&mut b)),
            Param::new("c", ParamSlot::Bool(&mut c)),
        ];
        let tail = parse("x=0 y=1 z=t a=F b=ON c=off", &mut params, None);
        drop(params);

        assert_eq!(
            (x, y, z, a, b, c),
            (false, true, true, false, true, false)
        );
        assert_eq!(tail, "");
    }

    #[test]
    fn dash_and_underscore_are_interchangeable() {
        let mut value = 0u16;
        let mut params = [Param::new("foo_bar", ParamSlot::U16(&mut value))];
        parse("foo-bar=7", &mut params, None);
        drop(params);
        assert_eq!(value, 7);
    }

    #[test]
    fn unknown_keys_hit_the_callback() {
        let mut seen = Vec::new();
        let mut cb = |key: &str, value: &str| {
            seen.push((String::from(key), String::from(value)));
        };
        parse("mystery=3 plain", &mut [], Some(&mut cb));
        assert_eq!(
            seen,
            [
                (String::from("mystery"), String::from("3")),
                (String::from("plain"), String::from(""))
            ]
        );
    }

    #[test]
    fn bad_values_leave_the_slot_alone() {
        let mut count = 5u8;
        let mut params = [Param::new("count", ParamSlot::U8(&mut count))];
        parse("count=4096", &mut params, None);
        drop(params);
        assert_eq!(count, 5);

        let mut flag = 0u32;
        let mut params = [Param::new("flag", ParamSlot::U32(&mut flag))];
        // Non-bool parameters reject an empty value.
        parse("flag", &mut params, None);
        drop(params);
        assert_eq!(flag, 0);
    }

    #[test]
    fn double_dash_without_tail() {
        let mut params: [Param; 0] = [];
        assert_eq!(parse("a=1 --", &mut params, None), "");
        assert_eq!(parse("--   spaced out  ", &mut params, None), "spaced out  ");
    }

    #[test]
    fn unterminated_quote_takes_the_rest() {
        let mut cafe = String::new();
        let mut params = [Param::new("cafe", ParamSlot::Str(&mut cafe))];
        parse("cafe=\"1 2", &mut params, None);
        drop(params);
        assert_eq!(cafe, "1 2");
    }

    #[test]
    fn integer_bases_work_on_the_command_line() {
        let mut hex = 0u64;
        let mut oct = 0u32;
        let mut bin = 0u8;
        let mut params = [
            Param::new("hex", ParamSlot::U64(&mut hex)),
            Param::new("oct", ParamSlot::U32(&mut oct)),
            Param::new("bin", ParamSlot::U8(&mut bin)),
        ];
        parse("hex=0xff oct=070 bin=0b101", &mut params, None);
        drop(params);
        assert_eq!((hex, oct, bin), (255, 56, 5));
    }
}
