//! Numeric filters and tests for temperature templates
//!
//! Conversions are strict: a value that is not a number (for example an
//! `unavailable` sensor state) is an error unless the template supplies a
//! default, so a broken sensor never silently turns into 0 degrees.

use minijinja::value::{Kwargs, Value};
use minijinja::{Error, ErrorKind};
use std::convert::TryFrom;

/// Helper to convert a numeric Value to f64
pub(crate) fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

/// Interpret a value as a number, parsing numeric strings
fn parse_number(value: &Value) -> Option<f64> {
    if let Some(s) = value.as_str() {
        return s.trim().parse::<f64>().ok().filter(|f| f.is_finite());
    }
    value_to_f64(value)
}

fn not_a_number(filter: &str, value: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("{filter} got invalid input '{value}' and no default was specified"),
    )
}

/// Convert value to float, or to `default` when it is not a number
pub fn to_float(value: Value, default: Option<Value>) -> Result<Value, Error> {
    match parse_number(&value) {
        Some(f) => Ok(Value::from(f)),
        None => match default {
            Some(d) => Ok(parse_number(&d).map(Value::from).unwrap_or(d)),
            None => Err(not_a_number("float", &value)),
        },
    }
}

/// Convert value to an integer (truncating floats), or to `default`
pub fn to_int(value: Value, default: Option<Value>) -> Result<Value, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(Value::from(i));
    }
    match parse_number(&value) {
        Some(f) => Ok(Value::from(f.trunc() as i64)),
        None => match default {
            Some(d) => Ok(d),
            None => Err(not_a_number("int", &value)),
        },
    }
}

/// Round to `precision` digits using the `common`, `ceil`, `floor` or `half` method
pub fn round_filter(value: f64, precision: Option<i32>, kwargs: Kwargs) -> Result<f64, Error> {
    let precision = precision.unwrap_or(0);
    let method: String = kwargs
        .get::<Option<String>>("method")?
        .unwrap_or_else(|| "common".to_string());
    kwargs.assert_all_used()?;

    let multiplier = 10_f64.powi(precision);
    let scaled = value * multiplier;

    let rounded = match method.as_str() {
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        "half" => (scaled * 2.0).round() / 2.0,
        _ => scaled.round(),
    };

    Ok(rounded / multiplier)
}

pub fn abs_filter(value: f64) -> f64 {
    value.abs()
}

/// Check if a value is a number or a numeric string
pub fn is_number(value: Value) -> bool {
    parse_number(&value).is_some()
}

pub fn is_defined(value: Value) -> bool {
    !value.is_undefined()
}

/// Fold a sequence of numbers, ignoring non-numeric items
pub(crate) fn fold_numbers(values: Value, init: f64, f: fn(f64, f64) -> f64) -> Value {
    let Ok(iter) = values.try_iter() else {
        return Value::UNDEFINED;
    };
    let nums: Vec<f64> = iter.filter_map(|v| value_to_f64(&v)).collect();
    if nums.is_empty() {
        Value::UNDEFINED
    } else {
        Value::from(nums.into_iter().fold(init, f))
    }
}
