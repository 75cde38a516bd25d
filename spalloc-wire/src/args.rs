//! Tolerant non-negative decimal parsing and positional/keyword argument
//! accessors (spec §4.3).

use std::collections::HashMap;

use serde_json::Value;
use spalloc_error::{make_input_err, Error};

/// Accepts `null` (→ `None`), any JSON number (→ its integer value), or a
/// base-10 string, and rejects anything else — including negative values,
/// which this spec's callers never accept — with a bad-input error.
pub fn parse_dec(value: &Value) -> Result<Option<u64>, Error> {
    let signed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| make_input_err!("bad input: non-integer number {n}"))?,
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| make_input_err!("bad input: not a base-10 integer: {s:?}"))?,
        other => return Err(make_input_err!("bad input: expected number or string, got {other}")),
    };
    if signed < 0 {
        return Err(make_input_err!("bad input: negative value {signed}"));
    }
    Ok(Some(signed as u64))
}

/// Like [`parse_dec`] but fails if the value was `null`.
pub fn parse_dec_required(value: &Value) -> Result<u64, Error> {
    parse_dec(value)?.ok_or_else(|| make_input_err!("bad input: null where a value was required"))
}

/// Fetch a positional argument or fail with "missing argument: <i>".
pub fn get_positional(args: &[Value], index: usize) -> Result<&Value, Error> {
    args.get(index)
        .ok_or_else(|| make_input_err!("missing argument: {index}"))
}

/// Fetch a keyword argument or fail with "missing argument: <key>".
pub fn get_keyword<'a>(kwargs: &'a HashMap<String, Value>, key: &str) -> Result<&'a Value, Error> {
    kwargs
        .get(key)
        .ok_or_else(|| make_input_err!("missing argument: {key}"))
}

/// Fetch an optional keyword argument; absent keys and explicit `null` are
/// both treated as `None`.
pub fn get_keyword_opt<'a>(kwargs: &'a HashMap<String, Value>, key: &str) -> Option<&'a Value> {
    kwargs.get(key).filter(|v| !v.is_null())
}
