//! Abstract type conversions and equality
//!
//! Both tiers go through these functions on their slow paths, so results
//! and error messages never depend on the executing tier.

use std::cmp::Ordering;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Zero};

use crate::error::{VmError, VmResult};
use crate::property;
use crate::shape::PropertyKey;
use crate::value::Value;
use crate::vm::Vm;

/// Hint for [`to_primitive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No preference (`+`, `==`)
    Default,
    /// Numeric context
    Number,
    /// String context
    String,
}

/// Result of ToNumeric
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    /// Number
    Number(f64),
    /// BigInt
    BigInt(Arc<BigInt>),
}

/// ToBoolean
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null | Value::Empty => false,
        Value::Boolean(b) => *b,
        Value::Int32(n) => *n != 0,
        Value::Double(n) => !(*n == 0.0 || n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::BigInt(b) => !b.is_zero(),
        Value::Symbol(_) | Value::Object(_) => true,
    }
}

/// ToPrimitive
pub fn to_primitive(vm: &mut Vm, value: &Value, hint: PreferredType) -> VmResult<Value> {
    let Value::Object(id) = value else {
        return Ok(value.clone());
    };
    let order = match hint {
        PreferredType::String => ["toString", "valueOf"],
        PreferredType::Number | PreferredType::Default => ["valueOf", "toString"],
    };
    for name in order {
        let method = property::get(vm, *id, &PropertyKey::from_str(name), value)?;
        if vm.is_callable(&method) {
            let result = vm.call(&method, value, &[])?;
            if !matches!(result, Value::Object(_)) {
                return Ok(result);
            }
        }
    }
    Err(VmError::type_error("No default value"))
}

/// StringToNumber
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return 0.0;
    }
    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        let mut result = 0.0f64;
        for c in digits.chars() {
            match c.to_digit(radix) {
                Some(d) => result = result * radix as f64 + d as f64,
                None => return f64::NAN,
            }
        }
        return result;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}'
}

/// ToNumber
pub fn to_number(vm: &mut Vm, value: &Value) -> VmResult<f64> {
    match value {
        Value::Undefined | Value::Empty => Ok(f64::NAN),
        Value::Null => Ok(0.0),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Int32(n) => Ok(*n as f64),
        Value::Double(n) => Ok(*n),
        Value::String(s) => Ok(string_to_number(s)),
        Value::Symbol(_) => Err(VmError::type_error("Cannot convert a symbol to a number")),
        Value::BigInt(_) => Err(VmError::type_error("Conversion from 'BigInt' to 'number' is not allowed.")),
        Value::Object(_) => {
            let prim = to_primitive(vm, value, PreferredType::Number)?;
            to_number(vm, &prim)
        }
    }
}

/// ToNumeric
pub fn to_numeric(vm: &mut Vm, value: &Value) -> VmResult<Numeric> {
    let prim = to_primitive(vm, value, PreferredType::Number)?;
    match prim {
        Value::BigInt(b) => Ok(Numeric::BigInt(b)),
        other => Ok(Numeric::Number(to_number(vm, &other)?)),
    }
}

/// ToInt32
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    n.trunc().rem_euclid(TWO_32) as u32
}

/// Number::toString with radix 10
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 && n.abs() <= i64::MAX as f64 {
        let mut buffer = itoa::Buffer::new();
        return buffer.format(n as i64).to_string();
    }

    let mut buffer = ryu::Buffer::new();
    let formatted = buffer.format_finite(n.abs());
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (formatted, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut digits: String = format!("{int_part}{frac_part}");
    let mut point = int_part.len() as i32 + exponent;
    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    point -= leading as i32;
    let trimmed = digits.trim_end_matches('0').len();
    digits.truncate(trimmed);

    let k = digits.len() as i32;
    let sign = if n < 0.0 { "-" } else { "" };
    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (head, tail) = digits.split_at(point as usize);
        format!("{head}.{tail}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else {
        let e = point - 1;
        let exp_sign = if e < 0 { '-' } else { '+' };
        let (head, tail) = digits.split_at(1);
        if tail.is_empty() {
            format!("{head}e{exp_sign}{}", e.abs())
        } else {
            format!("{head}.{tail}e{exp_sign}{}", e.abs())
        }
    };
    format!("{sign}{body}")
}

/// ToString for values that need no method calls
pub fn primitive_to_string(value: &Value) -> Option<Arc<str>> {
    Some(match value {
        Value::Undefined | Value::Empty => Arc::from("undefined"),
        Value::Null => Arc::from("null"),
        Value::Boolean(true) => Arc::from("true"),
        Value::Boolean(false) => Arc::from("false"),
        Value::Int32(n) => {
            let mut buffer = itoa::Buffer::new();
            Arc::from(buffer.format(*n))
        }
        Value::Double(n) => Arc::from(number_to_string(*n)),
        Value::String(s) => s.clone(),
        Value::BigInt(b) => Arc::from(b.to_string()),
        Value::Symbol(_) | Value::Object(_) => return None,
    })
}

/// ToString
pub fn to_string(vm: &mut Vm, value: &Value) -> VmResult<Arc<str>> {
    match value {
        Value::Symbol(_) => Err(VmError::type_error("Cannot convert a symbol to a string")),
        Value::Object(_) => {
            let prim = to_primitive(vm, value, PreferredType::String)?;
            to_string(vm, &prim)
        }
        other => primitive_to_string(other).ok_or_else(|| VmError::internal("unconvertible primitive")),
    }
}

/// ToPropertyKey
pub fn to_property_key(vm: &mut Vm, value: &Value) -> VmResult<PropertyKey> {
    match value {
        Value::Int32(n) if *n >= 0 => Ok(PropertyKey::Index(*n as u32)),
        Value::Symbol(sym) => Ok(PropertyKey::Symbol(sym.clone())),
        Value::String(s) => Ok(PropertyKey::from_arc(s)),
        Value::Object(_) => {
            let prim = to_primitive(vm, value, PreferredType::String)?;
            to_property_key(vm, &prim)
        }
        other => {
            let s = to_string(vm, other)?;
            Ok(PropertyKey::from_arc(&s))
        }
    }
}

/// `typeof`
pub fn type_of(vm: &Vm, value: &Value) -> &'static str {
    match value {
        Value::Undefined | Value::Empty => "undefined",
        Value::Null => "object",
        Value::Boolean(_) => "boolean",
        Value::Int32(_) | Value::Double(_) => "number",
        Value::String(_) => "string",
        Value::Symbol(_) => "symbol",
        Value::BigInt(_) => "bigint",
        Value::Object(_) if vm.is_callable(value) => "function",
        Value::Object(_) => "object",
    }
}

/// IsStrictlyEqual
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => x == y,
        (x, y) if x.is_number() && y.is_number() => x.as_number() == y.as_number(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x.id() == y.id(),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        _ => false,
    }
}

/// SameValue
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => {
            (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative())
        }
        _ => strict_equals(a, b),
    }
}

/// Parse a string as a BigInt literal for comparisons; `None` is not a BigInt
pub(crate) fn string_to_bigint(s: &str) -> Option<BigInt> {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return Some(BigInt::zero());
    }
    BigInt::parse_bytes(s.as_bytes(), 10)
}

/// Compare a BigInt with a Number; `None` when the Number is NaN
pub(crate) fn compare_bigint_number(b: &BigInt, n: f64) -> Option<Ordering> {
    if n.is_nan() {
        return None;
    }
    if n == f64::INFINITY {
        return Some(Ordering::Less);
    }
    if n == f64::NEG_INFINITY {
        return Some(Ordering::Greater);
    }
    let floor = BigInt::from_f64(n.floor())?;
    if n.fract() == 0.0 {
        return Some(b.cmp(&floor));
    }
    if *b <= floor {
        Some(Ordering::Less)
    } else {
        Some(Ordering::Greater)
    }
}

/// IsLooselyEqual
pub fn loose_equals(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<bool> {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => Ok(false),
        (x, y) if x.is_number() && y.is_number() => Ok(strict_equals(x, y)),
        (Value::String(_), y) if y.is_number() => {
            let x = to_number(vm, a)?;
            Ok(Some(x) == y.as_number())
        }
        (x, Value::String(_)) if x.is_number() => {
            let y = to_number(vm, b)?;
            Ok(x.as_number() == Some(y))
        }
        (Value::BigInt(x), Value::String(s)) | (Value::String(s), Value::BigInt(x)) => {
            Ok(string_to_bigint(s).is_some_and(|y| **x == y))
        }
        (Value::Boolean(_), _) => {
            let x = Value::number(to_number(vm, a)?);
            loose_equals(vm, &x, b)
        }
        (_, Value::Boolean(_)) => {
            let y = Value::number(to_number(vm, b)?);
            loose_equals(vm, a, &y)
        }
        (Value::Object(_), Value::Object(_)) => Ok(strict_equals(a, b)),
        (Value::Object(_), _) => {
            let x = to_primitive(vm, a, PreferredType::Default)?;
            loose_equals(vm, &x, b)
        }
        (_, Value::Object(_)) => {
            let y = to_primitive(vm, b, PreferredType::Default)?;
            loose_equals(vm, a, &y)
        }
        (Value::BigInt(x), y) if y.is_number() => {
            Ok(y.as_number().and_then(|n| compare_bigint_number(x, n)) == Some(Ordering::Equal))
        }
        (x, Value::BigInt(y)) if x.is_number() => {
            Ok(x.as_number().and_then(|n| compare_bigint_number(y, n)) == Some(Ordering::Equal))
        }
        _ => Ok(strict_equals(a, b)),
    }
}
