//! BigInt operands reaching code that was specialized for numbers

mod common;

use common::{call, engine_with, load, module};
use num_bigint::BigInt;
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Module, Register};
use tern_vm_core::{Engine, ErrorKind, ForcedTier, RealmId, Value};

fn binary(name: &str, op: fn(Register, Register, Register) -> Instruction) -> Function {
    Function::builder()
        .name(name)
        .param_count(2)
        .local_count(2)
        .register_count(3)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(op(Register(2), Register(0), Register(1)))
        .instruction(Instruction::Return { src: Register(2) })
        .build()
}

fn big(n: i64) -> Value {
    Value::bigint(BigInt::from(n))
}

fn warmed(op: fn(Register, Register, Register) -> Instruction) -> (Engine, RealmId, Value) {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let f = load(&mut engine, realm, module(&[], vec![binary("op", op)])).remove(0);
    engine.force_tier(&f, ForcedTier::Optimize);
    for i in 0..10 {
        call(&mut engine, &f, &[Value::Int32(i), Value::Int32(3)]);
    }
    (engine, realm, f)
}

#[test]
fn test_mixed_addition_after_int32_warmup() {
    let (mut engine, _, add) = warmed(|dst, lhs, rhs| Instruction::Add { dst, lhs, rhs });

    let err = engine
        .call(&add, &Value::Undefined, &[big(1), Value::Int32(2)])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Invalid mix of BigInt and other type in addition.");

    assert_eq!(call(&mut engine, &add, &[big(1), big(2)]), big(3));
    assert_eq!(
        call(&mut engine, &add, &[Value::string("n="), big(7)]),
        Value::string("n=7")
    );
    assert_eq!(call(&mut engine, &add, &[Value::Int32(4), Value::Int32(5)]), Value::Int32(9));
}

#[test]
fn test_bigint_arithmetic_is_exact() {
    let (mut engine, _, mul) = warmed(|dst, lhs, rhs| Instruction::Mul { dst, lhs, rhs });
    let huge = Value::bigint(BigInt::from(u64::MAX));
    let expected = Value::bigint(BigInt::from(u64::MAX) * BigInt::from(u64::MAX));
    assert_eq!(call(&mut engine, &mul, &[huge.clone(), huge]), expected);
}

#[test]
fn test_bigint_division_by_zero() {
    let (mut engine, _, div) = warmed(|dst, lhs, rhs| Instruction::Div { dst, lhs, rhs });
    let err = engine.call(&div, &Value::Undefined, &[big(1), big(0)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RangeError);
    assert_eq!(err.message, "Division by zero");
    assert_eq!(call(&mut engine, &div, &[big(-7), big(2)]), big(-3));
}

#[test]
fn test_unsigned_shift_rejects_bigint() {
    let (mut engine, _, ushr) = warmed(|dst, lhs, rhs| Instruction::Ushr { dst, lhs, rhs });
    let err = engine.call(&ushr, &Value::Undefined, &[big(8), big(1)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "BigInt does not support >>> operator");

    let err = engine
        .call(&ushr, &Value::Undefined, &[big(8), Value::Int32(1)])
        .unwrap_err();
    assert_eq!(err.message, "Invalid mix of BigInt and other type in bitwise operation.");
}

#[test]
fn test_bigint_compares_with_numbers() {
    let (mut engine, _, lt) = warmed(|dst, lhs, rhs| Instruction::Lt { dst, lhs, rhs });
    assert_eq!(call(&mut engine, &lt, &[big(1), Value::Int32(2)]), Value::Boolean(true));
    assert_eq!(call(&mut engine, &lt, &[Value::Double(2.5), big(2)]), Value::Boolean(false));
    assert_eq!(call(&mut engine, &lt, &[big(1), Value::Double(f64::NAN)]), Value::Boolean(false));
}

#[test]
fn test_bigint_constants_in_both_tiers() {
    let digits = "123456789012345678901234567890";
    let function = Function::builder()
        .name("constant")
        .register_count(1)
        .instruction(Instruction::LoadConst {
            dst: Register(0),
            idx: ConstantIndex(0),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build();
    let mut builder = Module::builder("bigint.js");
    builder.constants_mut().add_bigint(digits);
    builder.add_function(function);
    let module = builder.build().unwrap();

    let (mut engine, realm) = engine_with(common::eager_tier());
    let f = load(&mut engine, realm, module).remove(0);
    engine.force_tier(&f, ForcedTier::Optimize);
    let expected = Value::bigint(digits.parse::<BigInt>().unwrap());
    for _ in 0..5 {
        assert_eq!(call(&mut engine, &f, &[]), expected);
    }
    assert_eq!(engine.tier_state(&f), Some(tern_vm_core::TierState::Optimizing));
}
