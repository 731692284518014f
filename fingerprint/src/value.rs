//! Parsing raw fact values into canonical attribute types.
//!
//! Collectors emit whatever their source reports: numbers may arrive as strings,
//! booleans as `"yes"`, dates in half a dozen layouts. Each parser accepts the layouts seen in practice
//! and reports anything else as [`Error::Parse`].

use serde_json::Value;
use time::{macros::format_description, Date, OffsetDateTime};

use crate::Error;

fn parse_error(fact: &str, value: &Value, expected: &str) -> Error {
    Error::Parse {
        fact: fact.to_owned(),
        reason: format!("expected {expected}, found {value}"),
    }
}

/// A non-negative integer, from a number or a numeric string.
pub fn integer(fact: &str, value: &Value) -> Result<u64, Error> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| parse_error(fact, value, "an integer"))
}

/// A non-negative number, from a number or a numeric string.
pub fn float(fact: &str, value: &Value) -> Result<f64, Error> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite() && *f >= 0.0)
    .ok_or_else(|| parse_error(fact, value, "a number"))
}

/// A boolean, from a boolean, `0`/`1`, or a yes/no style string.
pub fn boolean(fact: &str, value: &Value) -> Result<bool, Error> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
    .ok_or_else(|| parse_error(fact, value, "a boolean"))
}

/// Whether a value counts as set: a true boolean, a non-zero number, or a non-empty string or collection.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            !s.is_empty() && s != "0" && s != "false" && s != "no"
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// A calendar date in UTC.
///
/// Accepts `YYYY-MM-DD` optionally followed by a time, `YYYYMMDD` optionally followed by a time,
/// and Unix timestamps in seconds.
pub fn date(fact: &str, value: &Value) -> Result<Date, Error> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .map(OffsetDateTime::date),
        Value::String(s) => {
            let s = s.trim();
            s.get(..10)
                .and_then(|day| Date::parse(day, format_description!("[year]-[month]-[day]")).ok())
                .or_else(|| {
                    s.get(..8)
                        .and_then(|day| Date::parse(day, format_description!("[year][month][day]")).ok())
                })
        }
        _ => None,
    };
    parsed.ok_or_else(|| parse_error(fact, value, "a date"))
}

/// A list of non-empty strings, from an array of strings or a comma or whitespace separated string.
pub fn strings(fact: &str, value: &Value) -> Result<Vec<String>, Error> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_owned()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(parse_error(fact, other, "a string")),
            })
            .filter(|item| item.as_ref().map(|s| !s.is_empty()).unwrap_or(true))
            .collect(),
        Value::String(s) => Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()),
        other => Err(parse_error(fact, other, "a list of strings")),
    }
}

/// A non-empty string, from a string or a number.
pub fn text(fact: &str, value: &Value) -> Result<Option<String>, Error> {
    match value {
        Value::String(s) => Ok(Some(s.trim().to_owned()).filter(|s| !s.is_empty())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(parse_error(fact, other, "a string")),
    }
}
