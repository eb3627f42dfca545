//! Proxies are never served from inline caches

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{call, engine_with, load, module};
use tern_vm_bytecode::instruction::field_attrs;
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Register};
use tern_vm_core::{Engine, ErrorKind, RealmId, Value};

/// `function read(o) { return o.x; }`
fn read_x() -> Function {
    Function::builder()
        .name("read")
        .param_count(1)
        .local_count(1)
        .register_count(2)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetPropConst {
            dst: Register(1),
            obj: Register(0),
            name: ConstantIndex(0),
        })
        .instruction(Instruction::Return { src: Register(1) })
        .build()
}

/// `function stamp(o) { o.#secret = 99; return o.#secret; }`
fn stamp() -> Function {
    Function::builder()
        .name("stamp")
        .param_count(1)
        .local_count(1)
        .register_count(4)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::NewPrivateName {
            dst: Register(1),
            description: ConstantIndex(1),
        })
        .instruction(Instruction::LoadInt32 {
            dst: Register(2),
            value: 99,
        })
        .instruction(Instruction::DefineField {
            obj: Register(0),
            key: Register(1),
            val: Register(2),
            attrs: field_attrs::DEFAULT,
        })
        .instruction(Instruction::GetProp {
            dst: Register(3),
            obj: Register(0),
            key: Register(1),
        })
        .instruction(Instruction::Return { src: Register(3) })
        .build()
}

/// Proxy over `{ x: 1 }` whose `get` trap counts calls and answers `x * 10`
fn counting_proxy(engine: &mut Engine, realm: RealmId) -> (Value, Arc<AtomicUsize>) {
    let target = Value::Object(engine.new_object(realm).unwrap());
    engine.set(&target, "x", Value::Int32(1)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let trap = engine
        .new_native_function(realm, "get", move |_, _, args| {
            seen.fetch_add(1, Ordering::Relaxed);
            let n = seen.load(Ordering::Relaxed) as i32;
            match args.get(1) {
                Some(key) if key.as_str() == Some("x") => Ok(Value::Int32(n * 10)),
                _ => Ok(Value::Undefined),
            }
        })
        .unwrap();
    let handler = Value::Object(engine.new_object(realm).unwrap());
    engine.set(&handler, "get", trap).unwrap();

    let proxy = Value::Object(engine.new_proxy(&target, &handler).unwrap());
    (proxy, calls)
}

#[test]
fn test_get_trap_runs_on_every_load() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let read = load(&mut engine, realm, module(&["x", "#secret"], vec![read_x()])).remove(0);
    let (proxy, calls) = counting_proxy(&mut engine, realm);

    for i in 1..=30 {
        assert_eq!(call(&mut engine, &read, &[proxy.clone()]), Value::Int32(i * 10));
    }
    assert_eq!(calls.load(Ordering::Relaxed), 30);
}

#[test]
fn test_revoked_proxy_throws() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let read = load(&mut engine, realm, module(&["x", "#secret"], vec![read_x()])).remove(0);
    let (proxy, _) = counting_proxy(&mut engine, realm);
    for _ in 0..10 {
        call(&mut engine, &read, &[proxy.clone()]);
    }

    engine.revoke_proxy(proxy.as_object().unwrap()).unwrap();
    let err = engine.call(&read, &Value::Undefined, &[proxy]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(
        err.message,
        "Proxy has already been revoked. No more operations are allowed to be performed on it"
    );
}

#[test]
fn test_missing_trap_forwards_to_target() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let read = load(&mut engine, realm, module(&["x", "#secret"], vec![read_x()])).remove(0);
    let target = Value::Object(engine.new_object(realm).unwrap());
    engine.set(&target, "x", Value::string("through")).unwrap();
    let handler = Value::Object(engine.new_object(realm).unwrap());
    let proxy = Value::Object(engine.new_proxy(&target, &handler).unwrap());

    for _ in 0..20 {
        assert_eq!(call(&mut engine, &read, &[proxy.clone()]), Value::string("through"));
    }
    engine.set(&target, "x", Value::string("updated")).unwrap();
    assert_eq!(call(&mut engine, &read, &[proxy]), Value::string("updated"));
}

#[test]
fn test_private_fields_live_on_the_proxy() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let stamp = load(&mut engine, realm, module(&["x", "#secret"], vec![stamp()])).remove(0);
    let (proxy, calls) = counting_proxy(&mut engine, realm);

    assert_eq!(call(&mut engine, &stamp, &[proxy]), Value::Int32(99));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn test_proxy_requires_object_operands() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let object = Value::Object(engine.new_object(realm).unwrap());
    let err = engine.new_proxy(&Value::Int32(1), &object).unwrap_err();
    assert_eq!(err.message, "A Proxy's 'target' should be an Object");
    let err = engine.new_proxy(&object, &Value::Null).unwrap_err();
    assert_eq!(err.message, "A Proxy's 'handler' should be an Object");
}
