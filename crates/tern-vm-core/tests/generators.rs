//! Generator suspension and resumption

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use common::{call, engine_with, load, module};
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Register};
use tern_vm_core::generator::{self, GeneratorState, ResumeMode};
use tern_vm_core::{ErrorKind, IteratorStep, TierState, Value};

fn step(value: Value, done: bool) -> IteratorStep {
    IteratorStep { value, done }
}

/// `function* echo() { const r = yield 1; yield r + 1; return 10; }`
fn echo() -> Function {
    Function::builder()
        .name("echo")
        .is_generator(true)
        .register_count(3)
        .instruction(Instruction::LoadInt32 {
            dst: Register(0),
            value: 1,
        })
        .instruction(Instruction::Yield {
            dst: Register(1),
            src: Register(0),
        })
        .instruction(Instruction::LoadInt32 {
            dst: Register(2),
            value: 1,
        })
        .instruction(Instruction::Add {
            dst: Register(2),
            lhs: Register(1),
            rhs: Register(2),
        })
        .instruction(Instruction::Yield {
            dst: Register(1),
            src: Register(2),
        })
        .instruction(Instruction::LoadInt32 {
            dst: Register(0),
            value: 10,
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

/// `function* count(n) { for (let i = 0; i < n; i++) yield i; }`
fn count() -> Function {
    let (n, i) = (LocalIndex(0), LocalIndex(1));
    let mut b = Function::builder()
        .name("count")
        .is_generator(true)
        .param_count(1)
        .local_count(2)
        .register_count(3);
    let top = b.label();
    let done = b.label();
    b.push(Instruction::LoadInt32 {
        dst: Register(0),
        value: 0,
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(0) });
    b.bind(top);
    b.push(Instruction::LoopHint);
    b.push(Instruction::GetLocal { dst: Register(0), idx: i });
    b.push(Instruction::GetLocal { dst: Register(1), idx: n });
    b.push(Instruction::Lt {
        dst: Register(2),
        lhs: Register(0),
        rhs: Register(1),
    });
    b.jump_if_false(Register(2), done);
    b.push(Instruction::Yield {
        dst: Register(2),
        src: Register(0),
    });
    b.push(Instruction::Inc {
        dst: Register(0),
        src: Register(0),
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(0) });
    b.jump(top);
    b.bind(done);
    b.push(Instruction::ReturnUndefined);
    b.build()
}

/// `function* guarded() { try { yield 1; } finally { cleanup(); } }`
fn guarded() -> Function {
    let mut b = Function::builder().name("guarded").is_generator(true).register_count(3);
    let handler = b.label();
    b.try_start(handler);
    b.push(Instruction::LoadInt32 {
        dst: Register(0),
        value: 1,
    });
    b.push(Instruction::Yield {
        dst: Register(1),
        src: Register(0),
    });
    b.push(Instruction::TryEnd);
    b.push(Instruction::GetGlobal {
        dst: Register(0),
        name: ConstantIndex(0),
    });
    b.push(Instruction::Call {
        dst: Register(1),
        callee: Register(0),
        args: Register(2),
        argc: 0,
    });
    b.push(Instruction::ReturnUndefined);
    b.bind(handler);
    b.push(Instruction::Catch { dst: Register(2) });
    b.push(Instruction::GetGlobal {
        dst: Register(0),
        name: ConstantIndex(0),
    });
    b.push(Instruction::Call {
        dst: Register(1),
        callee: Register(0),
        args: Register(2),
        argc: 0,
    });
    b.push(Instruction::Throw { src: Register(2) });
    b.build()
}

#[test]
fn test_next_passes_values_through_yield() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let echo = load(&mut engine, realm, module(&[], vec![echo()])).remove(0);
    let g = call(&mut engine, &echo, &[]);
    assert_eq!(generator::state(engine.vm(), &g), Some(GeneratorState::SuspendedStart));

    assert_eq!(engine.generator_next(&g, Value::Undefined).unwrap(), step(Value::Int32(1), false));
    assert_eq!(generator::state(engine.vm(), &g), Some(GeneratorState::SuspendedYield));
    assert_eq!(engine.generator_next(&g, Value::Int32(5)).unwrap(), step(Value::Int32(6), false));
    assert_eq!(engine.generator_next(&g, Value::Undefined).unwrap(), step(Value::Int32(10), true));
    assert_eq!(engine.generator_next(&g, Value::Undefined).unwrap(), step(Value::Undefined, true));
    assert_eq!(generator::state(engine.vm(), &g), Some(GeneratorState::Completed));
}

#[test]
fn test_return_completes_suspended_generator() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let echo = load(&mut engine, realm, module(&[], vec![echo()])).remove(0);

    let fresh = call(&mut engine, &echo, &[]);
    assert_eq!(engine.generator_return(&fresh, Value::Int32(3)).unwrap(), step(Value::Int32(3), true));
    assert_eq!(engine.generator_next(&fresh, Value::Undefined).unwrap(), step(Value::Undefined, true));

    let started = call(&mut engine, &echo, &[]);
    engine.generator_next(&started, Value::Undefined).unwrap();
    assert_eq!(engine.generator_return(&started, Value::Int32(7)).unwrap(), step(Value::Int32(7), true));
    assert_eq!(engine.generator_next(&started, Value::Undefined).unwrap(), step(Value::Undefined, true));
}

#[test]
fn test_reentrant_next_is_rejected() {
    // function* g() { return reenter(); }
    let body = Function::builder()
        .name("g")
        .is_generator(true)
        .register_count(3)
        .instruction(Instruction::GetGlobal {
            dst: Register(0),
            name: ConstantIndex(0),
        })
        .instruction(Instruction::Call {
            dst: Register(1),
            callee: Register(0),
            args: Register(2),
            argc: 0,
        })
        .instruction(Instruction::Return { src: Register(1) })
        .build();
    let (mut engine, realm) = engine_with(common::eager_tier());
    let g = load(&mut engine, realm, module(&["reenter"], vec![body])).remove(0);
    let suspended = call(&mut engine, &g, &[]);

    let target = suspended.clone();
    let reenter = engine
        .new_native_function(realm, "reenter", move |vm, _, _| {
            generator::resume(vm, &target, ResumeMode::Next, Value::Undefined).map(|step| step.value)
        })
        .unwrap();
    let global = Value::Object(engine.realm_global(realm));
    engine.set(&global, "reenter", reenter).unwrap();

    let err = engine.generator_next(&suspended, Value::Undefined).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Generator is executing");
    assert_eq!(engine.generator_next(&suspended, Value::Undefined).unwrap(), step(Value::Undefined, true));
}

#[test]
fn test_generator_loops_stay_in_baseline() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let count = load(&mut engine, realm, module(&[], vec![count()])).remove(0);
    let g = call(&mut engine, &count, &[Value::Int32(50)]);

    let mut seen = Vec::new();
    loop {
        let next = engine.generator_next(&g, Value::Undefined).unwrap();
        if next.done {
            assert_eq!(next.value, Value::Undefined);
            break;
        }
        seen.push(next.value);
    }
    assert_eq!(seen, (0..50).map(Value::Int32).collect::<Vec<_>>());
    assert_eq!(engine.stats().tier.ineligible_functions, 1);
    assert_eq!(engine.stats().tier.osr_entries, 0);
    let info = engine.function_info(&count).unwrap();
    assert!(info.ineligible);
    assert!(!info.optimized);
    assert_ne!(info.state, TierState::Optimizing);
}

#[test]
fn test_next_on_non_generator_is_a_type_error() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let plain = Value::Object(engine.new_object(realm).unwrap());
    let err = engine.generator_next(&plain, Value::Undefined).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn test_return_does_not_run_finally_blocks() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let guarded = load(&mut engine, realm, module(&["cleanup"], vec![guarded()])).remove(0);
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&cleanups);
    let cleanup = engine
        .new_native_function(realm, "cleanup", move |_, _, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(Value::Undefined)
        })
        .unwrap();
    let global = Value::Object(engine.realm_global(realm));
    engine.set(&global, "cleanup", cleanup).unwrap();

    let finished = call(&mut engine, &guarded, &[]);
    assert_eq!(engine.generator_next(&finished, Value::Undefined).unwrap(), step(Value::Int32(1), false));
    assert_eq!(engine.generator_next(&finished, Value::Undefined).unwrap(), step(Value::Undefined, true));
    assert_eq!(cleanups.load(Ordering::Relaxed), 1);

    // return() from inside the try region completes without entering cleanup
    let abandoned = call(&mut engine, &guarded, &[]);
    engine.generator_next(&abandoned, Value::Undefined).unwrap();
    assert_eq!(engine.generator_return(&abandoned, Value::Int32(5)).unwrap(), step(Value::Int32(5), true));
    assert_eq!(generator::state(engine.vm(), &abandoned), Some(GeneratorState::Completed));
    assert_eq!(cleanups.load(Ordering::Relaxed), 1);
}
