//! Inline caches stay correct across shape, attribute and prototype changes

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use common::{call, engine_with, load, module};
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Register};
use tern_vm_core::{Engine, ErrorKind, PropertyAttributes, PropertyDescriptor, RealmId, Value};

const X: ConstantIndex = ConstantIndex(0);
const PRIVATE_X: ConstantIndex = ConstantIndex(1);

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
            name: X,
        })
        .instruction(Instruction::Return { src: Register(1) })
        .build()
}

/// `function write(o, v) { o.x = v; }`
fn write_x(strict: bool) -> Function {
    Function::builder()
        .name("write")
        .param_count(2)
        .local_count(2)
        .register_count(2)
        .is_strict(strict)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::SetPropConst {
            obj: Register(0),
            name: X,
            val: Register(1),
        })
        .instruction(Instruction::ReturnUndefined)
        .build()
}

/// `function lookup() { return x; }`
fn read_global() -> Function {
    Function::builder()
        .name("lookup")
        .register_count(1)
        .instruction(Instruction::GetGlobal {
            dst: Register(0),
            name: X,
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

/// `function pair(k, g, s) { return { get [k]() {...}, set [k](v) {...} }; }`
fn accessor_pair() -> Function {
    Function::builder()
        .name("pair")
        .param_count(3)
        .local_count(3)
        .register_count(3)
        .instruction(Instruction::NewObject { dst: Register(0) })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(2),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::DefineGetter {
            obj: Register(0),
            key: Register(1),
            func: Register(2),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(2),
            idx: LocalIndex(2),
        })
        .instruction(Instruction::DefineSetter {
            obj: Register(0),
            key: Register(1),
            func: Register(2),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

/// Getter definition on an existing object: `o[k]` gets a new `get`
fn define_getter() -> Function {
    Function::builder()
        .name("defineGetter")
        .param_count(3)
        .local_count(3)
        .register_count(3)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(2),
            idx: LocalIndex(2),
        })
        .instruction(Instruction::DefineGetter {
            obj: Register(0),
            key: Register(1),
            func: Register(2),
        })
        .instruction(Instruction::ReturnUndefined)
        .build()
}

/// A fresh `#x` private name
fn private_name() -> Function {
    Function::builder()
        .name("privateName")
        .register_count(1)
        .instruction(Instruction::NewPrivateName {
            dst: Register(0),
            description: PRIVATE_X,
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

/// Keyed read at pc 2; `o.#x` when `k` is a private name
const KEYED_READ_PC: usize = 2;
fn read_keyed() -> Function {
    Function::builder()
        .name("readKeyed")
        .param_count(2)
        .local_count(2)
        .register_count(2)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::GetProp {
            dst: Register(1),
            obj: Register(0),
            key: Register(1),
        })
        .instruction(Instruction::Return { src: Register(1) })
        .build()
}

/// `o[k] = v`; `o.#x = v` when `k` is a private name
fn write_keyed() -> Function {
    Function::builder()
        .name("writeKeyed")
        .param_count(3)
        .local_count(3)
        .register_count(3)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(2),
            idx: LocalIndex(2),
        })
        .instruction(Instruction::SetProp {
            obj: Register(0),
            key: Register(1),
            val: Register(2),
        })
        .instruction(Instruction::ReturnUndefined)
        .build()
}

/// Native getter returning `cell` and setter storing into it
fn cell_accessors(engine: &mut Engine, realm: RealmId, cell: &Arc<AtomicI32>) -> (Value, Value) {
    let read = Arc::clone(cell);
    let getter = engine
        .new_native_function(realm, "get", move |_, _, _| Ok(Value::Int32(read.load(Ordering::Relaxed))))
        .unwrap();
    let write = Arc::clone(cell);
    let setter = engine
        .new_native_function(realm, "set", move |_, _, args| {
            if let Some(Value::Int32(v)) = args.first() {
                write.store(*v, Ordering::Relaxed);
            }
            Ok(Value::Undefined)
        })
        .unwrap();
    (getter, setter)
}

fn constant(engine: &mut Engine, realm: RealmId, value: i32) -> Value {
    engine
        .new_native_function(realm, "constant", move |_, _, _| Ok(Value::Int32(value)))
        .unwrap()
}

struct Fixture {
    engine: Engine,
    realm: RealmId,
    read: Value,
    write_strict: Value,
    write_sloppy: Value,
    lookup: Value,
}

fn fixture() -> Fixture {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let functions = vec![read_x(), write_x(true), write_x(false), read_global()];
    let mut closures = load(&mut engine, realm, module(&["x"], functions)).into_iter();
    let mut next = || closures.next().unwrap();
    Fixture {
        read: next(),
        write_strict: next(),
        write_sloppy: next(),
        lookup: next(),
        engine,
        realm,
    }
}

fn object_with(engine: &mut Engine, realm: RealmId, props: &[(&str, Value)]) -> Value {
    let object = Value::Object(engine.new_object(realm).unwrap());
    for (key, value) in props {
        engine.set(&object, key, value.clone()).unwrap();
    }
    object
}

fn object_create(engine: &mut Engine, realm: RealmId, proto: &Value) -> Value {
    let global = Value::Object(engine.realm_global(realm));
    let object_ctor = engine.get(&global, "Object").unwrap();
    let create = engine.get(&object_ctor, "create").unwrap();
    engine.call(&create, &object_ctor, &[proto.clone()]).unwrap()
}

#[test]
fn test_shapes_converge_on_insertion_order() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let a = object_with(&mut engine, realm, &[("x", Value::Int32(1)), ("y", Value::Int32(2))]);
    let b = object_with(&mut engine, realm, &[("x", Value::Int32(3)), ("y", Value::Int32(4))]);
    let c = object_with(&mut engine, realm, &[("y", Value::Int32(5)), ("x", Value::Int32(6))]);

    let shape = |engine: &Engine, v: &Value| engine.shape_of(v.as_object().unwrap());
    assert_eq!(shape(&engine, &a), shape(&engine, &b));
    assert_ne!(shape(&engine, &a), shape(&engine, &c));
}

#[test]
fn test_load_sees_property_turned_into_accessor() {
    let mut f = fixture();
    let o = object_with(&mut f.engine, f.realm, &[("x", Value::Int32(1))]);
    for _ in 0..30 {
        assert_eq!(call(&mut f.engine, &f.read, &[o.clone()]), Value::Int32(1));
    }

    let getter = f
        .engine
        .new_native_function(f.realm, "getX", |_, _, _| Ok(Value::Int32(42)))
        .unwrap();
    let desc = PropertyDescriptor::accessor(getter, Value::Undefined, PropertyAttributes::CONFIGURABLE);
    f.engine.define_property(o.as_object().unwrap(), "x", desc).unwrap();

    for _ in 0..5 {
        assert_eq!(call(&mut f.engine, &f.read, &[o.clone()]), Value::Int32(42));
    }
}

#[test]
fn test_store_respects_readonly_after_warmup() {
    let mut f = fixture();
    let o = object_with(&mut f.engine, f.realm, &[("x", Value::Int32(0))]);
    for i in 0..30 {
        call(&mut f.engine, &f.write_strict, &[o.clone(), Value::Int32(i)]);
        call(&mut f.engine, &f.write_sloppy, &[o.clone(), Value::Int32(i)]);
    }
    assert_eq!(f.engine.get(&o, "x").unwrap(), Value::Int32(29));

    let readonly = PropertyDescriptor {
        writable: Some(false),
        ..PropertyDescriptor::default()
    };
    f.engine.define_property(o.as_object().unwrap(), "x", readonly).unwrap();

    let err = f
        .engine
        .call(&f.write_strict, &Value::Undefined, &[o.clone(), Value::Int32(100)])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Attempted to assign to readonly property.");

    call(&mut f.engine, &f.write_sloppy, &[o.clone(), Value::Int32(100)]);
    assert_eq!(f.engine.get(&o, "x").unwrap(), Value::Int32(29));
}

#[test]
fn test_store_adds_property_through_cached_transition() {
    let mut f = fixture();
    let mut objects = Vec::new();
    for i in 0..30 {
        let o = object_with(&mut f.engine, f.realm, &[("a", Value::Int32(i))]);
        call(&mut f.engine, &f.write_strict, &[o.clone(), Value::Int32(i * 2)]);
        objects.push(o);
    }
    let shape = f.engine.shape_of(objects[0].as_object().unwrap());
    for (i, o) in objects.iter().enumerate() {
        assert_eq!(f.engine.shape_of(o.as_object().unwrap()), shape);
        assert_eq!(f.engine.get(o, "x").unwrap(), Value::Int32(i as i32 * 2));
    }
}

#[test]
fn test_load_follows_prototype_mutation() {
    let mut f = fixture();
    let (engine, realm) = (&mut f.engine, f.realm);
    let first = object_with(engine, realm, &[("x", Value::Int32(1))]);
    let second = object_with(engine, realm, &[("x", Value::Int32(7))]);
    let o = object_create(engine, realm, &first);

    for _ in 0..30 {
        assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Int32(1));
    }

    engine.set(&first, "x", Value::Int32(2)).unwrap();
    assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Int32(2));

    let global = Value::Object(engine.realm_global(realm));
    let object_ctor = engine.get(&global, "Object").unwrap();
    let set_prototype_of = engine.get(&object_ctor, "setPrototypeOf").unwrap();
    engine
        .call(&set_prototype_of, &object_ctor, &[o.clone(), second.clone()])
        .unwrap();
    assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Int32(7));

    engine.set(&o, "x", Value::Int32(3)).unwrap();
    assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Int32(3));
}

#[test]
fn test_missing_property_becomes_visible_on_prototype() {
    let mut f = fixture();
    let (engine, realm) = (&mut f.engine, f.realm);
    let proto = object_with(engine, realm, &[("y", Value::Int32(1))]);
    let o = object_create(engine, realm, &proto);
    for _ in 0..30 {
        assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Undefined);
    }
    engine.set(&proto, "x", Value::Int32(5)).unwrap();
    assert_eq!(call(engine, &f.read, &[o.clone()]), Value::Int32(5));
}

#[test]
fn test_megamorphic_site_stays_correct() {
    let mut f = fixture();
    let objects: Vec<Value> = (0..12)
        .map(|i| {
            let first = format!("k{i}");
            object_with(
                &mut f.engine,
                f.realm,
                &[(first.as_str(), Value::Int32(0)), ("x", Value::Int32(i))],
            )
        })
        .collect();

    for _ in 0..5 {
        for (i, o) in objects.iter().enumerate() {
            assert_eq!(call(&mut f.engine, &f.read, &[o.clone()]), Value::Int32(i as i32));
        }
    }
    assert!(f.engine.stats().megamorphic.hits > 0);
}

#[test]
fn test_array_length_load() {
    let mut f = fixture();
    let module_len = module(
        &["length"],
        vec![
            Function::builder()
                .name("len")
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
                .build(),
        ],
    );
    let len = load(&mut f.engine, f.realm, module_len).remove(0);
    let short = Value::Object(f.engine.new_array(f.realm, vec![Value::Int32(1); 3]).unwrap());
    for _ in 0..30 {
        assert_eq!(call(&mut f.engine, &len, &[short.clone()]), Value::Int32(3));
    }
    let long = Value::Object(f.engine.new_array(f.realm, vec![Value::Null; 9]).unwrap());
    assert_eq!(call(&mut f.engine, &len, &[long]), Value::Int32(9));
}

#[test]
fn test_global_load_tracks_redefinition() {
    let mut f = fixture();
    let err = f.engine.call(&f.lookup, &Value::Undefined, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert_eq!(err.message, "x is not defined");

    let global = Value::Object(f.engine.realm_global(f.realm));
    f.engine.set(&global, "x", Value::Int32(1)).unwrap();
    for _ in 0..30 {
        assert_eq!(call(&mut f.engine, &f.lookup, &[]), Value::Int32(1));
    }

    let getter = f
        .engine
        .new_native_function(f.realm, "x", |_, _, _| Ok(Value::string("from getter")))
        .unwrap();
    let desc = PropertyDescriptor::accessor(getter, Value::Undefined, PropertyAttributes::CONFIGURABLE);
    let global_id = f.engine.realm_global(f.realm);
    f.engine.define_property(global_id, "x", desc).unwrap();
    assert_eq!(call(&mut f.engine, &f.lookup, &[]), Value::string("from getter"));
}

#[test]
fn test_computed_accessor_pair_survives_redefinition() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let functions = vec![read_x(), write_x(true), accessor_pair(), define_getter()];
    let closures = load(&mut engine, realm, module(&["x", "#x"], functions));
    let [read, write, pair, redefine] = <[Value; 4]>::try_from(closures).unwrap();

    let cell = Arc::new(AtomicI32::new(0));
    let (getter, setter) = cell_accessors(&mut engine, realm, &cell);
    let o = call(&mut engine, &pair, &[Value::string("x"), getter.clone(), setter.clone()]);
    let id = o.as_object().unwrap();

    for i in 0..10_000 {
        call(&mut engine, &write, &[o.clone(), Value::Int32(i)]);
        assert_eq!(call(&mut engine, &read, &[o.clone()]), Value::Int32(i));
    }
    let desc = engine.get_own_property_descriptor(id, "x").unwrap().unwrap();
    assert_eq!(desc.get, Some(getter));
    assert_eq!(desc.set, Some(setter.clone()));
    assert_eq!(desc.enumerable, Some(true));
    assert_eq!(desc.configurable, Some(true));
    assert_eq!(desc.value, None);

    // Same attributes, so the shape stays and only the slot changes
    let replacement = constant(&mut engine, realm, -1);
    call(&mut engine, &redefine, &[o.clone(), Value::string("x"), replacement.clone()]);
    let desc = engine.get_own_property_descriptor(id, "x").unwrap().unwrap();
    assert_eq!(desc.get, Some(replacement.clone()));
    assert_eq!(desc.set, Some(setter.clone()));
    for _ in 0..100 {
        assert_eq!(call(&mut engine, &read, &[o.clone()]), Value::Int32(-1));
    }
    call(&mut engine, &write, &[o.clone(), Value::Int32(5)]);
    assert_eq!(cell.load(Ordering::Relaxed), 5);
    assert_eq!(call(&mut engine, &read, &[o.clone()]), Value::Int32(-1));

    // Attribute change moves the object to a new shape
    let hidden = PropertyDescriptor {
        enumerable: Some(false),
        get: Some(constant(&mut engine, realm, 9)),
        ..PropertyDescriptor::default()
    };
    engine.define_property(id, "x", hidden).unwrap();
    let desc = engine.get_own_property_descriptor(id, "x").unwrap().unwrap();
    assert_eq!(desc.enumerable, Some(false));
    assert_eq!(desc.configurable, Some(true));
    assert_eq!(desc.set, Some(setter));
    for _ in 0..100 {
        assert_eq!(call(&mut engine, &read, &[o.clone()]), Value::Int32(9));
    }
}

#[test]
fn test_private_accessor_is_cached_and_sees_redefinition() {
    let (mut engine, realm) = engine_with(common::eager_tier());
    let functions = vec![private_name(), read_keyed(), write_keyed(), accessor_pair(), define_getter()];
    let module = engine.load_module(module(&["x", "#x"], functions));
    let closures: Vec<Value> = (0..5)
        .map(|index| engine.create_closure(realm, &module, index).unwrap())
        .collect();
    let [name, read, write, pair, redefine] = <[Value; 5]>::try_from(closures).unwrap();

    let private_x = call(&mut engine, &name, &[]);
    let cell = Arc::new(AtomicI32::new(0));
    let (getter, setter) = cell_accessors(&mut engine, realm, &cell);
    let o = call(&mut engine, &pair, &[private_x.clone(), getter, setter]);

    for i in 0..1_000 {
        call(&mut engine, &write, &[o.clone(), private_x.clone(), Value::Int32(i)]);
        assert_eq!(call(&mut engine, &read, &[o.clone(), private_x.clone()]), Value::Int32(i));
    }
    let cached = module.functions[1].with_site(KEYED_READ_PC, |site| site.map(|s| s.ic.entries().len()));
    assert_eq!(cached, Some(1));

    let replacement = constant(&mut engine, realm, 77);
    call(&mut engine, &redefine, &[o.clone(), private_x.clone(), replacement]);
    assert_eq!(call(&mut engine, &read, &[o.clone(), private_x.clone()]), Value::Int32(77));

    // A second private name at the same site must not reuse the first one's slot
    let other_x = call(&mut engine, &name, &[]);
    let three = constant(&mut engine, realm, 3);
    let ignore = constant(&mut engine, realm, 0);
    let other = call(&mut engine, &pair, &[other_x.clone(), three, ignore]);
    assert_eq!(call(&mut engine, &read, &[other.clone(), other_x.clone()]), Value::Int32(3));
    assert_eq!(call(&mut engine, &read, &[o.clone(), private_x.clone()]), Value::Int32(77));

    let err = engine
        .call(&read, &Value::Undefined, &[other, private_x])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Cannot access invalid private field");
}
