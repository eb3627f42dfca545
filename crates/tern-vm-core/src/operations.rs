//! Arithmetic, bitwise and relational semantics
//!
//! The baseline tier calls these for every operation that misses its int32
//! fast path; compiled code reaches them through generic ops. Keeping one
//! implementation is what makes results and error messages identical across
//! tiers.

use std::cmp::Ordering;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::convert::{
    self, Numeric, PreferredType, compare_bigint_number, string_to_bigint, to_int32, to_uint32,
};
use crate::error::{VmError, VmResult};
use crate::value::Value;
use crate::vm::Vm;

/// Largest shift or exponent applied to a BigInt
const MAX_BIGINT_BITS: u64 = 1 << 24;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+` on numerics (string concatenation is handled by [`add`])
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

impl ArithOp {
    fn noun(self) -> &'static str {
        match self {
            Self::Add => "addition",
            Self::Sub => "subtraction",
            Self::Mul => "multiplication",
            Self::Div => "division",
            Self::Mod => "remainder",
            Self::Pow => "exponentiation",
        }
    }

    fn mix_error(self) -> VmError {
        VmError::type_error(format!("Invalid mix of BigInt and other type in {}.", self.noun()))
    }
}

/// Bitwise and shift operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
}

/// Relational operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// `a + b`
pub fn add(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(Value::number(x + y));
    }
    let lprim = convert::to_primitive(vm, a, PreferredType::Default)?;
    let rprim = convert::to_primitive(vm, b, PreferredType::Default)?;
    if matches!(lprim, Value::String(_)) || matches!(rprim, Value::String(_)) {
        let left = convert::to_string(vm, &lprim)?;
        let right = convert::to_string(vm, &rprim)?;
        let mut joined = String::with_capacity(left.len() + right.len());
        joined.push_str(&left);
        joined.push_str(&right);
        return Ok(Value::String(Arc::from(joined)));
    }
    arithmetic(vm, ArithOp::Add, &lprim, &rprim)
}

/// Numeric binary operator (everything but string concatenation)
pub fn arithmetic(vm: &mut Vm, op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
    let left = convert::to_numeric(vm, a)?;
    let right = convert::to_numeric(vm, b)?;
    match (left, right) {
        (Numeric::Number(x), Numeric::Number(y)) => Ok(Value::number(number_arith(op, x, y))),
        (Numeric::BigInt(x), Numeric::BigInt(y)) => bigint_arith(op, &x, &y).map(Value::bigint),
        _ => Err(op.mix_error()),
    }
}

/// Number semantics of an arithmetic operator
pub fn number_arith(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
        ArithOp::Pow => number_pow(x, y),
    }
}

fn number_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

fn bigint_arith(op: ArithOp, x: &BigInt, y: &BigInt) -> VmResult<BigInt> {
    Ok(match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div | ArithOp::Mod if y.is_zero() => {
            return Err(VmError::range_error("Division by zero"));
        }
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
        ArithOp::Pow => {
            if y.sign() == num_bigint::Sign::Minus {
                return Err(VmError::range_error("Negative exponent is not allowed"));
            }
            let exponent = y
                .to_u32()
                .filter(|e| (*e as u64) < MAX_BIGINT_BITS)
                .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))?;
            x.pow(exponent)
        }
    })
}

/// Bitwise or shift operator
pub fn bitwise(vm: &mut Vm, op: BitwiseOp, a: &Value, b: &Value) -> VmResult<Value> {
    let left = convert::to_numeric(vm, a)?;
    let right = convert::to_numeric(vm, b)?;
    match (left, right) {
        (Numeric::Number(x), Numeric::Number(y)) => Ok(number_bitwise(op, x, y)),
        (Numeric::BigInt(x), Numeric::BigInt(y)) => bigint_bitwise(op, &x, &y).map(Value::bigint),
        _ => Err(VmError::type_error(
            "Invalid mix of BigInt and other type in bitwise operation.",
        )),
    }
}

fn number_bitwise(op: BitwiseOp, x: f64, y: f64) -> Value {
    let shift = to_uint32(y) & 31;
    match op {
        BitwiseOp::And => Value::Int32(to_int32(x) & to_int32(y)),
        BitwiseOp::Or => Value::Int32(to_int32(x) | to_int32(y)),
        BitwiseOp::Xor => Value::Int32(to_int32(x) ^ to_int32(y)),
        BitwiseOp::Shl => Value::Int32(to_int32(x).wrapping_shl(shift)),
        BitwiseOp::Shr => Value::Int32(to_int32(x) >> shift),
        BitwiseOp::Ushr => Value::number((to_uint32(x) >> shift) as f64),
    }
}

fn bigint_bitwise(op: BitwiseOp, x: &BigInt, y: &BigInt) -> VmResult<BigInt> {
    let shift_amount = || {
        y.to_i64()
            .filter(|n| n.unsigned_abs() < MAX_BIGINT_BITS)
            .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))
    };
    Ok(match op {
        BitwiseOp::And => x & y,
        BitwiseOp::Or => x | y,
        BitwiseOp::Xor => x ^ y,
        BitwiseOp::Shl => shift_bigint(x, shift_amount()?),
        BitwiseOp::Shr => shift_bigint(x, -shift_amount()?),
        BitwiseOp::Ushr => return Err(VmError::type_error("BigInt does not support >>> operator")),
    })
}

fn shift_bigint(x: &BigInt, left: i64) -> BigInt {
    if left >= 0 {
        x << (left as u64)
    } else {
        x >> (left.unsigned_abs())
    }
}

/// Unary minus
pub fn negate(vm: &mut Vm, value: &Value) -> VmResult<Value> {
    match convert::to_numeric(vm, value)? {
        Numeric::Number(n) => Ok(Value::number(-n)),
        Numeric::BigInt(b) => Ok(Value::bigint(-(*b).clone())),
    }
}

/// `~x`
pub fn bit_not(vm: &mut Vm, value: &Value) -> VmResult<Value> {
    match convert::to_numeric(vm, value)? {
        Numeric::Number(n) => Ok(Value::Int32(!to_int32(n))),
        Numeric::BigInt(b) => Ok(Value::bigint(!(*b).clone())),
    }
}

/// `x + 1` or `x - 1` for `++`/`--`
pub fn increment(vm: &mut Vm, value: &Value, delta: i32) -> VmResult<Value> {
    match convert::to_numeric(vm, value)? {
        Numeric::Number(n) => Ok(Value::number(n + delta as f64)),
        Numeric::BigInt(b) => Ok(Value::bigint(&*b + BigInt::from(delta))),
    }
}

/// IsLessThan; `None` stands for `undefined` (a NaN was involved)
fn less_than(vm: &mut Vm, a: &Value, b: &Value, left_first: bool) -> VmResult<Option<bool>> {
    let (px, py) = if left_first {
        let px = convert::to_primitive(vm, a, PreferredType::Number)?;
        let py = convert::to_primitive(vm, b, PreferredType::Number)?;
        (px, py)
    } else {
        let py = convert::to_primitive(vm, b, PreferredType::Number)?;
        let px = convert::to_primitive(vm, a, PreferredType::Number)?;
        (px, py)
    };

    match (&px, &py) {
        (Value::String(x), Value::String(y)) => {
            return Ok(Some(x.encode_utf16().cmp(y.encode_utf16()) == Ordering::Less));
        }
        (Value::BigInt(x), Value::String(y)) => {
            return Ok(string_to_bigint(y).map(|y| **x < y));
        }
        (Value::String(x), Value::BigInt(y)) => {
            return Ok(string_to_bigint(x).map(|x| x < **y));
        }
        _ => {}
    }

    let nx = convert::to_numeric(vm, &px)?;
    let ny = convert::to_numeric(vm, &py)?;
    Ok(match (nx, ny) {
        (Numeric::Number(x), Numeric::Number(y)) => {
            if x.is_nan() || y.is_nan() {
                None
            } else {
                Some(x < y)
            }
        }
        (Numeric::BigInt(x), Numeric::BigInt(y)) => Some(x < y),
        (Numeric::BigInt(x), Numeric::Number(y)) => {
            compare_bigint_number(&x, y).map(|o| o == Ordering::Less)
        }
        (Numeric::Number(x), Numeric::BigInt(y)) => {
            compare_bigint_number(&y, x).map(|o| o == Ordering::Greater)
        }
    })
}

/// Relational comparison
pub fn compare(vm: &mut Vm, relation: Relation, a: &Value, b: &Value) -> VmResult<bool> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(number_compare(relation, x, y));
    }
    Ok(match relation {
        Relation::Lt => less_than(vm, a, b, true)? == Some(true),
        Relation::Gt => less_than(vm, b, a, false)? == Some(true),
        Relation::Le => less_than(vm, b, a, false)? == Some(false),
        Relation::Ge => less_than(vm, a, b, true)? == Some(false),
    })
}

/// Relational comparison of two Numbers
pub fn number_compare(relation: Relation, x: f64, y: f64) -> bool {
    match relation {
        Relation::Lt => x < y,
        Relation::Le => x <= y,
        Relation::Gt => x > y,
        Relation::Ge => x >= y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_quirks() {
        assert!(number_pow(1.0, f64::INFINITY).is_nan());
        assert!(number_pow(1.0, f64::NAN).is_nan());
        assert_eq!(number_pow(f64::NAN, 0.0), 1.0);
        assert_eq!(number_pow(2.0, 10.0), 1024.0);
    }

    #[test]
    fn number_bitwise_semantics() {
        assert_eq!(number_bitwise(BitwiseOp::Ushr, -1.0, 0.0), Value::Double(4294967295.0));
        assert_eq!(number_bitwise(BitwiseOp::Shl, 1.0, 33.0), Value::Int32(2));
        assert_eq!(number_bitwise(BitwiseOp::Shr, -8.0, 1.0), Value::Int32(-4));
        assert_eq!(number_bitwise(BitwiseOp::Or, 2147483648.0, 0.0), Value::Int32(i32::MIN));
    }

    #[test]
    fn bigint_errors() {
        let one = BigInt::from(1);
        let zero = BigInt::zero();
        let err = bigint_arith(ArithOp::Div, &one, &zero).unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Division by zero");
        let err = bigint_arith(ArithOp::Pow, &one, &BigInt::from(-1)).unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Negative exponent is not allowed");
        let err = bigint_bitwise(BitwiseOp::Ushr, &one, &one).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: BigInt does not support >>> operator");
    }

    #[test]
    fn bigint_shifts_round_down() {
        let minus_five = BigInt::from(-5);
        assert_eq!(bigint_bitwise(BitwiseOp::Shr, &minus_five, &BigInt::from(1)).ok(), Some(BigInt::from(-3)));
        assert_eq!(bigint_bitwise(BitwiseOp::Shl, &minus_five, &BigInt::from(-1)).ok(), Some(BigInt::from(-3)));
        assert_eq!(bigint_bitwise(BitwiseOp::Shl, &BigInt::from(3), &BigInt::from(4)).ok(), Some(BigInt::from(48)));
    }

    #[test]
    fn bigint_division_truncates() {
        let r = bigint_arith(ArithOp::Div, &BigInt::from(-7), &BigInt::from(2)).ok();
        assert_eq!(r, Some(BigInt::from(-3)));
        let r = bigint_arith(ArithOp::Mod, &BigInt::from(-7), &BigInt::from(2)).ok();
        assert_eq!(r, Some(BigInt::from(-1)));
    }

    #[test]
    fn mix_error_messages() {
        assert_eq!(
            ArithOp::Mod.mix_error().to_string(),
            "TypeError: Invalid mix of BigInt and other type in remainder."
        );
    }
}
