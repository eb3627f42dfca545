//! `arguments` objects, elided in optimized code and rebuilt on exit

mod common;

use common::{call, engine_with, load, module};
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Register};
use tern_vm_core::{Engine, TierConfig, Value};

const LENGTH: ConstantIndex = ConstantIndex(0);

/// ```js
/// function g() {
///   let s = 0;
///   for (let i = 0; i < arguments.length; i++) s += arguments[i];
///   // forced exit to the baseline tier
///   return s + arguments.length;
/// }
/// ```
fn sum_arguments() -> Function {
    let (s, i) = (LocalIndex(0), LocalIndex(1));
    let args = Register(0);
    let mut b = Function::builder()
        .name("g")
        .local_count(2)
        .register_count(4);
    let top = b.label();
    let done = b.label();
    b.push(Instruction::CreateArguments { dst: args });
    b.push(Instruction::LoadInt32 {
        dst: Register(1),
        value: 0,
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(1) });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.bind(top);
    b.push(Instruction::LoopHint);
    b.push(Instruction::GetLocal { dst: Register(1), idx: i });
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::Lt {
        dst: Register(3),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.jump_if_false(Register(3), done);
    b.push(Instruction::GetProp {
        dst: Register(3),
        obj: args,
        key: Register(1),
    });
    b.push(Instruction::GetLocal { dst: Register(2), idx: s });
    b.push(Instruction::Add {
        dst: Register(2),
        lhs: Register(2),
        rhs: Register(3),
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(2) });
    b.push(Instruction::Inc {
        dst: Register(1),
        src: Register(1),
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.jump(top);
    b.bind(done);
    b.push(Instruction::ForceOsrExit);
    b.push(Instruction::GetLocal { dst: Register(1), idx: s });
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::Add {
        dst: Register(1),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.push(Instruction::Return { src: Register(1) });
    b.build()
}

/// ```js
/// function snapshot() {
///   const out = [];
///   for (let i = 0; i < arguments.length; i++) {
///     out.push(arguments[i]);
///     // forced exit to the baseline tier on the third element
///   }
///   out.push(arguments.length);
///   return out;
/// }
/// ```
fn snapshot() -> Function {
    let i = LocalIndex(0);
    let (args, out) = (Register(0), Register(4));
    let mut b = Function::builder()
        .name("snapshot")
        .local_count(1)
        .register_count(5);
    let top = b.label();
    let next = b.label();
    let done = b.label();
    b.push(Instruction::CreateArguments { dst: args });
    b.push(Instruction::NewArray { dst: out });
    b.push(Instruction::LoadInt32 {
        dst: Register(1),
        value: 0,
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.bind(top);
    b.push(Instruction::LoopHint);
    b.push(Instruction::GetLocal { dst: Register(1), idx: i });
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::Lt {
        dst: Register(3),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.jump_if_false(Register(3), done);
    b.push(Instruction::GetProp {
        dst: Register(3),
        obj: args,
        key: Register(1),
    });
    b.push(Instruction::ArrayPush { arr: out, src: Register(3) });
    b.push(Instruction::LoadInt32 {
        dst: Register(2),
        value: 2,
    });
    b.push(Instruction::StrictEq {
        dst: Register(2),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.jump_if_false(Register(2), next);
    b.push(Instruction::ForceOsrExit);
    b.bind(next);
    b.push(Instruction::Inc {
        dst: Register(1),
        src: Register(1),
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.jump(top);
    b.bind(done);
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::ArrayPush { arr: out, src: Register(2) });
    b.push(Instruction::Return { src: out });
    b.build()
}

/// Elements of an array returned to the host
fn elements(engine: &mut Engine, array: &Value) -> Vec<Value> {
    let Value::Int32(length) = engine.get(array, "length").unwrap() else {
        panic!("array length is not an int32");
    };
    (0..length)
        .map(|k| engine.get(array, &k.to_string()).unwrap())
        .collect()
}

/// `function at(i) { return arguments[i]; }`
fn at() -> Function {
    Function::builder()
        .name("at")
        .param_count(1)
        .local_count(1)
        .register_count(2)
        .instruction(Instruction::CreateArguments { dst: Register(0) })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetProp {
            dst: Register(1),
            obj: Register(0),
            key: Register(1),
        })
        .instruction(Instruction::Return { src: Register(1) })
        .build()
}

/// `function escape() { return arguments; }`
fn escape() -> Function {
    Function::builder()
        .name("escape")
        .register_count(1)
        .instruction(Instruction::CreateArguments { dst: Register(0) })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

#[test]
fn test_elided_arguments_are_rebuilt_on_exit() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let g = load(&mut engine, realm, module(&["length"], vec![sum_arguments()])).remove(0);
    let args: Vec<Value> = (1..=10).map(Value::Int32).collect();

    for _ in 0..20 {
        assert_eq!(call(&mut engine, &g, &args), Value::Int32(65));
    }
    let info = engine.function_info(&g).unwrap();
    assert!(info.deopts >= 1);
    assert!(engine.stats().tier.osr_entries >= 1);

    assert_eq!(call(&mut engine, &g, &[]), Value::Int32(0));
    assert_eq!(
        call(&mut engine, &g, &[Value::Double(0.5), Value::Int32(1)]),
        Value::Double(3.5)
    );
}

#[test]
fn test_arguments_match_baseline_across_arities_and_exits() {
    const MAX_ARITY: i32 = 8;
    // Exits keep recurring: no site or function ever gives up on optimizing
    let recompiling = common::eager_tier()
        .with_site_deopt_limit(u32::MAX)
        .with_deopt_threshold(u32::MAX)
        .with_backoff(1, 0);
    let (mut tiered, tiered_realm) = engine_with(recompiling);
    let (mut baseline, baseline_realm) = engine_with(TierConfig::disabled());
    let fast = load(&mut tiered, tiered_realm, module(&["length"], vec![snapshot()])).remove(0);
    let slow = load(&mut baseline, baseline_realm, module(&["length"], vec![snapshot()])).remove(0);

    for i in 0..12_000 {
        let argc = i % MAX_ARITY;
        let args: Vec<Value> = (0..argc)
            .map(|k| {
                if (i + k) % 7 == 0 {
                    Value::Double(f64::from(i + k) + 0.5)
                } else {
                    Value::Int32(i * 10 + k)
                }
            })
            .collect();
        let expected = call(&mut baseline, &slow, &args);
        let expected = elements(&mut baseline, &expected);
        let actual = call(&mut tiered, &fast, &args);
        let actual = elements(&mut tiered, &actual);

        assert_eq!(expected.len(), argc as usize + 1);
        assert_eq!(expected.last(), Some(&Value::Int32(argc)));
        assert_eq!(actual, expected, "call {i} with {argc} arguments");
    }

    let info = tiered.function_info(&fast).unwrap();
    assert!(info.deopts >= 100);
    assert!(!info.pinned);
    assert!(tiered.stats().tier.deopts >= 100);
    assert!(baseline.function_info(&slow).map_or(true, |info| !info.optimized && info.deopts == 0));
}

#[test]
fn test_out_of_range_argument_is_undefined() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let at = load(&mut engine, realm, module(&["length"], vec![at()])).remove(0);
    for i in 0..20 {
        assert_eq!(call(&mut engine, &at, &[Value::Int32(0), Value::Int32(i)]), Value::Int32(0));
    }
    assert_eq!(call(&mut engine, &at, &[Value::Int32(5)]), Value::Undefined);
    assert_eq!(call(&mut engine, &at, &[Value::Int32(-1)]), Value::Undefined);
    assert_eq!(call(&mut engine, &at, &[Value::Int32(1), Value::string("b")]), Value::string("b"));
}

#[test]
fn test_pessimized_element_read_stops_deopting() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let at = load(&mut engine, realm, module(&["length"], vec![at()])).remove(0);

    for _ in 0..100 {
        assert_eq!(call(&mut engine, &at, &[Value::Int32(5)]), Value::Undefined);
    }
    let settled = engine.function_info(&at).unwrap();
    assert!(settled.pessimized_sites.contains(&2));
    assert!(!settled.pinned);

    for _ in 0..100 {
        assert_eq!(call(&mut engine, &at, &[Value::Int32(5)]), Value::Undefined);
    }
    let info = engine.function_info(&at).unwrap();
    assert_eq!(info.deopts, settled.deopts);
    assert!(info.optimized);
}

#[test]
fn test_escaping_arguments_object() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let escape = load(&mut engine, realm, module(&["length"], vec![escape()])).remove(0);
    for _ in 0..10 {
        let object = call(&mut engine, &escape, &[Value::Null, Value::Boolean(true)]);
        assert_eq!(engine.get(&object, "length").unwrap(), Value::Int32(2));
        assert_eq!(engine.get(&object, "1").unwrap(), Value::Boolean(true));
    }
}
