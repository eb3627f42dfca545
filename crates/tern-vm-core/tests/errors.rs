//! Exceptions as seen by the embedder

mod common;

use common::{call, engine_with, load, module};
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Module, Register};
use tern_vm_core::{ErrorKind, ForcedTier, Value};

/// `function thrower(v) { throw v; }`
fn thrower() -> Function {
    Function::builder()
        .name("thrower")
        .param_count(1)
        .local_count(1)
        .register_count(1)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::Throw { src: Register(0) })
        .build()
}

/// `function guard(f, v) { try { return f(v); } catch (e) { return "caught"; } }`
fn guard() -> Function {
    let mut b = Function::builder()
        .name("guard")
        .param_count(2)
        .local_count(2)
        .register_count(3);
    let handler = b.label();
    b.try_start(handler);
    b.push(Instruction::GetLocal {
        dst: Register(0),
        idx: LocalIndex(0),
    });
    b.push(Instruction::GetLocal {
        dst: Register(1),
        idx: LocalIndex(1),
    });
    b.push(Instruction::Call {
        dst: Register(2),
        callee: Register(0),
        args: Register(1),
        argc: 1,
    });
    b.push(Instruction::TryEnd);
    b.push(Instruction::Return { src: Register(2) });
    b.bind(handler);
    b.push(Instruction::Catch { dst: Register(2) });
    b.push(Instruction::LoadConst {
        dst: Register(2),
        idx: ConstantIndex(0),
    });
    b.push(Instruction::Return { src: Register(2) });
    b.build()
}

#[test]
fn test_thrown_primitives_surface_as_values() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let thrower = load(&mut engine, realm, module(&[], vec![thrower()])).remove(0);

    let err = engine.call(&thrower, &Value::Undefined, &[Value::Int32(3)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "3");
    assert_eq!(err.value, Some(Value::Int32(3)));

    let err = engine.call(&thrower, &Value::Undefined, &[Value::string("boom")]).unwrap_err();
    assert_eq!(err.message, "boom");

    let object = Value::Object(engine.new_object(realm).unwrap());
    let err = engine.call(&thrower, &Value::Undefined, &[object.clone()]).unwrap_err();
    assert_eq!(err.message, "[object Object]");
    assert_eq!(err.value, Some(object));
}

#[test]
fn test_optimized_callee_throws_into_baseline_handler() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let mut closures = load(&mut engine, realm, module(&["caught"], vec![thrower(), guard()])).into_iter();
    let (thrower, guard) = (closures.next().unwrap(), closures.next().unwrap());
    engine.force_tier(&thrower, ForcedTier::Optimize);

    for i in 0..10 {
        assert_eq!(
            call(&mut engine, &guard, &[thrower.clone(), Value::Int32(i)]),
            Value::string("caught")
        );
    }
    assert_eq!(engine.tier_state(&thrower), Some(tern_vm_core::TierState::Optimizing));
    assert!(engine.function_info(&guard).unwrap().ineligible);
}

#[test]
fn test_calling_non_callables() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let err = engine.call(&Value::Undefined, &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "undefined is not a function");

    let object = Value::Object(engine.new_object(realm).unwrap());
    let err = engine.call(&object, &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.message, "object is not a function");
}

#[test]
fn test_malformed_bigint_constant_is_a_syntax_error() {
    let function = Function::builder()
        .name("bad")
        .register_count(1)
        .instruction(Instruction::LoadConst {
            dst: Register(0),
            idx: ConstantIndex(0),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build();
    let mut builder = Module::builder("bad.js");
    builder.constants_mut().add_bigint("12x");
    builder.add_function(function);

    let (mut engine, realm) = engine_with(common::eager_tier());
    let bad = load(&mut engine, realm, builder.build().unwrap()).remove(0);
    let err = engine.call(&bad, &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}
