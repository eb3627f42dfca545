//! Realms
//!
//! A realm is a global object plus the intrinsic prototypes its objects are
//! created with. Realms are created explicitly by the embedder and never
//! share intrinsics. Every function remembers its realm; calling it makes
//! that realm current for the duration of the call.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::convert;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::generator::{self, IteratorStep, ResumeMode};
use crate::object::{FunctionKind, ObjectKind, TypedArrayKind};
use crate::property::{self, PropertyDescriptor};
use crate::proxy;
use crate::shape::{PropertyAttributes, PropertyKey};
use crate::typed_array;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Handle of a realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RealmId(pub(crate) u32);

impl RealmId {
    /// Index in the engine's realm table
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Intrinsic prototypes of a realm
#[derive(Debug, Clone)]
pub struct Intrinsics {
    /// `%Object.prototype%`
    pub object_prototype: ObjectId,
    /// `%Function.prototype%`
    pub function_prototype: ObjectId,
    /// `%Array.prototype%`
    pub array_prototype: ObjectId,
    /// Error prototypes indexed by [`ErrorKind::table_index`]
    pub error_prototypes: [ObjectId; 6],
    /// `%ArrayBuffer.prototype%`
    pub array_buffer_prototype: ObjectId,
    /// `%TypedArray.prototype%`
    pub typed_array_prototype: ObjectId,
    /// Per-kind typed array prototypes indexed by [`TypedArrayKind::table_index`]
    pub typed_array_prototypes: [ObjectId; 9],
    /// `%GeneratorPrototype%`
    pub generator_prototype: ObjectId,
}

/// A realm
#[derive(Debug, Clone)]
pub struct Realm {
    pub(crate) id: RealmId,
    pub(crate) global: ObjectId,
    pub(crate) intrinsics: Intrinsics,
}

impl Realm {
    /// Handle
    pub fn id(&self) -> RealmId {
        self.id
    }

    /// Global object
    pub fn global(&self) -> ObjectId {
        self.global
    }

    /// Intrinsic prototypes
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }
}

const HIDDEN: PropertyAttributes = PropertyAttributes::WRITABLE.union(PropertyAttributes::CONFIGURABLE);
const FROZEN: PropertyAttributes = PropertyAttributes::empty();

const SELF_GETTER_MISUSE: &str = "The global self getter can only be used on its own realm's global object";
const NOT_A_VIEW: &str = "Receiver should be a typed array view";

struct RealmBuilder<'a> {
    vm: &'a mut Vm,
    realm: RealmId,
    function_prototype: ObjectId,
}

impl RealmBuilder<'_> {
    fn object(&mut self, proto: Option<ObjectId>) -> ObjectId {
        self.vm.alloc(ObjectKind::Ordinary, proto)
    }

    fn native<F>(&mut self, name: &str, func: F) -> ObjectId
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let kind = FunctionKind::Native {
            name: Arc::from(name),
            func: Arc::new(func),
            realm: self.realm,
        };
        self.vm.alloc(ObjectKind::Function(kind), Some(self.function_prototype))
    }

    fn value(&mut self, target: ObjectId, name: &str, value: Value, attributes: PropertyAttributes) {
        let desc = PropertyDescriptor::data(value, attributes);
        property::add_property(self.vm, target, PropertyKey::from_str(name), desc);
    }

    fn method<F>(&mut self, target: ObjectId, name: &str, func: F) -> ObjectId
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let function = self.native(name, func);
        self.value(target, name, Value::Object(function), HIDDEN);
        function
    }

    fn getter<F>(&mut self, target: ObjectId, name: &str, func: F)
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let function = self.native(&format!("get {name}"), func);
        let desc = PropertyDescriptor::accessor(Value::Object(function), Value::Undefined, PropertyAttributes::CONFIGURABLE);
        property::add_property(self.vm, target, PropertyKey::from_str(name), desc);
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn object_arg(value: &Value, what: &str) -> VmResult<ObjectId> {
    value
        .as_object()
        .ok_or_else(|| VmError::type_error(format!("{what} called on non-object")))
}

fn proto_arg(value: &Value) -> VmResult<Option<ObjectId>> {
    match value {
        Value::Object(id) => Ok(Some(*id)),
        Value::Null => Ok(None),
        _ => Err(VmError::type_error("Object prototype may only be an Object or null")),
    }
}

/// ToIndex, for buffer and view sizes
fn to_index(vm: &mut Vm, value: &Value, what: &str) -> VmResult<usize> {
    if value.is_undefined() {
        return Ok(0);
    }
    let n = convert::to_number(vm, value)?;
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if !(0.0..=typed_array::MAX_BYTE_LENGTH as f64).contains(&n) {
        return Err(VmError::range_error(format!("Invalid {what}")));
    }
    Ok(n as usize)
}

/// Iterator result object `{ value, done }`
pub(crate) fn iter_result(vm: &mut Vm, step: IteratorStep) -> Value {
    let object = vm.new_plain_object();
    for (name, value) in [("value", step.value), ("done", Value::Boolean(step.done))] {
        let desc = PropertyDescriptor::data(value, PropertyAttributes::DEFAULT);
        property::add_property(vm, object, PropertyKey::from_str(name), desc);
    }
    Value::Object(object)
}

fn typed_array_view(vm: &Vm, this: &Value) -> VmResult<crate::object::TypedArrayData> {
    match this.as_object().map(|id| &vm.heap.get(id).kind) {
        Some(ObjectKind::TypedArray(view)) => Ok(*view),
        _ => Err(VmError::type_error(NOT_A_VIEW)),
    }
}

fn class_name(vm: &Vm, value: &Value) -> &'static str {
    match value {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Boolean(_) => "Boolean",
        Value::Int32(_) | Value::Double(_) => "Number",
        Value::String(_) => "String",
        Value::Symbol(_) => "Symbol",
        Value::BigInt(_) => "BigInt",
        Value::Empty => "Undefined",
        Value::Object(id) => match &vm.heap.get(*id).kind {
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Arguments(_) => "Arguments",
            ObjectKind::Error(_) => "Error",
            ObjectKind::ArrayBuffer(_) => "ArrayBuffer",
            ObjectKind::TypedArray(view) => view.kind.name(),
            ObjectKind::Generator(_) => "Generator",
            ObjectKind::Ordinary | ObjectKind::Proxy(_) => "Object",
        },
    }
}

/// Build a fresh realm and register it with the VM
pub(crate) fn create(vm: &mut Vm) -> VmResult<RealmId> {
    let realm = RealmId(vm.realms.len() as u32);
    let object_prototype = vm.alloc(ObjectKind::Ordinary, None);
    let function_prototype = {
        let kind = FunctionKind::Native {
            name: Arc::from(""),
            func: Arc::new(|_: &mut Vm, _: &Value, _: &[Value]| Ok(Value::Undefined)),
            realm,
        };
        vm.alloc(ObjectKind::Function(kind), Some(object_prototype))
    };
    let mut b = RealmBuilder {
        vm,
        realm,
        function_prototype,
    };

    let array_prototype = b.object(Some(object_prototype));
    let error_prototype = b.object(Some(object_prototype));
    let mut error_prototypes = [error_prototype; 6];
    for kind in ErrorKind::ALL {
        if kind != ErrorKind::Error {
            error_prototypes[kind.table_index()] = b.object(Some(error_prototype));
        }
    }
    let array_buffer_prototype = b.object(Some(object_prototype));
    let typed_array_prototype = b.object(Some(object_prototype));
    let mut typed_array_prototypes = [typed_array_prototype; 9];
    for kind in TypedArrayKind::ALL {
        typed_array_prototypes[kind.table_index()] = b.object(Some(typed_array_prototype));
    }
    let generator_prototype = b.object(Some(object_prototype));
    let global = b.object(Some(object_prototype));

    install_object_prototype(&mut b, object_prototype);
    install_function_prototype(&mut b);
    install_array_prototype(&mut b, array_prototype);
    install_errors(&mut b, global, &error_prototypes);
    install_array_buffer(&mut b, global, array_buffer_prototype);
    install_typed_arrays(&mut b, global, typed_array_prototype, &typed_array_prototypes);
    install_generator_prototype(&mut b, generator_prototype);
    install_globals(&mut b, global);

    vm.realms.push(Realm {
        id: realm,
        global,
        intrinsics: Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            error_prototypes,
            array_buffer_prototype,
            typed_array_prototype,
            typed_array_prototypes,
            generator_prototype,
        },
    });
    debug!(realm = realm.0, global = global.index(), "realm created");
    Ok(realm)
}

fn install_object_prototype(b: &mut RealmBuilder<'_>, proto: ObjectId) {
    b.method(proto, "toString", |vm, this, _| {
        Ok(Value::string(&format!("[object {}]", class_name(vm, this))))
    });
    b.method(proto, "valueOf", |_, this, _| Ok(this.clone()));
    b.method(proto, "hasOwnProperty", |vm, this, args| {
        let key = convert::to_property_key(vm, &arg(args, 0))?;
        let Value::Object(id) = this else {
            return Ok(Value::Boolean(false));
        };
        Ok(Value::Boolean(property::get_own_property(vm, *id, &key)?.is_some()))
    });
}

fn install_function_prototype(b: &mut RealmBuilder<'_>) {
    let proto = b.function_prototype;
    b.method(proto, "call", |vm, this, args| {
        let receiver = arg(args, 0);
        let rest = args.get(1..).unwrap_or_default();
        vm.call(this, &receiver, rest)
    });
}

fn install_array_prototype(b: &mut RealmBuilder<'_>, proto: ObjectId) {
    b.method(proto, "push", |vm, this, args| {
        let id = object_arg(this, "Array.prototype.push")?;
        if let ObjectKind::Array(elements) = &mut vm.heap.get_mut(id).kind {
            elements.extend(args.iter().cloned());
            return Ok(Value::number(elements.len() as f64));
        }
        let length_key = PropertyKey::from_str("length");
        let length = property::get(vm, id, &length_key, this)?;
        let mut length = convert::to_number(vm, &length)?;
        for value in args {
            let key = convert::to_property_key(vm, &Value::number(length))?;
            property::set_value(vm, this, &key, value.clone(), true)?;
            length += 1.0;
        }
        property::set_value(vm, this, &length_key, Value::number(length), true)?;
        Ok(Value::number(length))
    });
}

fn install_errors(b: &mut RealmBuilder<'_>, global: ObjectId, prototypes: &[ObjectId; 6]) {
    let base = prototypes[ErrorKind::Error.table_index()];
    b.value(base, "message", Value::string(""), HIDDEN);
    b.method(base, "toString", |vm, this, _| {
        let id = object_arg(this, "Error.prototype.toString")?;
        let name = property::get(vm, id, &PropertyKey::from_str("name"), this)?;
        let name = if name.is_undefined() {
            Arc::from("Error")
        } else {
            convert::to_string(vm, &name)?
        };
        let message = property::get(vm, id, &PropertyKey::from_str("message"), this)?;
        let message = if message.is_undefined() {
            Arc::from("")
        } else {
            convert::to_string(vm, &message)?
        };
        Ok(match (name.is_empty(), message.is_empty()) {
            (_, true) => Value::String(name),
            (true, false) => Value::String(message),
            (false, false) => Value::string(&format!("{name}: {message}")),
        })
    });

    for kind in ErrorKind::ALL {
        let proto = prototypes[kind.table_index()];
        b.value(proto, "name", Value::string(kind.name()), HIDDEN);
        let constructor = b.native(kind.name(), move |vm, _, args| {
            let message = arg(args, 0);
            let message = if message.is_undefined() {
                None
            } else {
                Some(convert::to_string(vm, &message)?)
            };
            let realm = vm.current_realm;
            Ok(Value::Object(vm.make_error(realm, kind, message.as_deref())))
        });
        b.value(constructor, "prototype", Value::Object(proto), FROZEN);
        b.value(proto, "constructor", Value::Object(constructor), HIDDEN);
        b.value(global, kind.name(), Value::Object(constructor), HIDDEN);
    }
}

fn install_array_buffer(b: &mut RealmBuilder<'_>, global: ObjectId, proto: ObjectId) {
    let constructor = b.native("ArrayBuffer", |vm, _, args| {
        let length = to_index(vm, &arg(args, 0), "array buffer length")?;
        let max = match arg(args, 1) {
            Value::Object(options) => {
                let max = property::get(vm, options, &PropertyKey::from_str("maxByteLength"), &Value::Object(options))?;
                if max.is_undefined() {
                    None
                } else {
                    Some(to_index(vm, &max, "array buffer max length")?)
                }
            }
            _ => None,
        };
        typed_array::create_buffer(vm, length, max).map(Value::Object)
    });
    b.value(constructor, "prototype", Value::Object(proto), FROZEN);
    b.value(global, "ArrayBuffer", Value::Object(constructor), HIDDEN);

    b.getter(proto, "byteLength", |vm, this, _| {
        let id = object_arg(this, "ArrayBuffer.prototype.byteLength")?;
        typed_array::byte_length(&vm.heap, id).map(|len| Value::number(len as f64))
    });
    b.method(proto, "resize", |vm, this, args| {
        let id = object_arg(this, "ArrayBuffer.prototype.resize")?;
        let length = to_index(vm, &arg(args, 0), "length")?;
        typed_array::resize_buffer(vm, id, length)?;
        Ok(Value::Undefined)
    });
}

fn install_typed_arrays(b: &mut RealmBuilder<'_>, global: ObjectId, base: ObjectId, prototypes: &[ObjectId; 9]) {
    b.getter(base, "length", |vm, this, _| {
        let view = typed_array_view(vm, this)?;
        let length = typed_array::view_length(&vm.heap, &view).unwrap_or(0);
        Ok(Value::number(length as f64))
    });
    b.getter(base, "byteOffset", |vm, this, _| {
        let view = typed_array_view(vm, this)?;
        let offset = match typed_array::view_length(&vm.heap, &view) {
            Some(_) => view.byte_offset,
            None => 0,
        };
        Ok(Value::number(offset as f64))
    });
    b.getter(base, "byteLength", |vm, this, _| {
        let view = typed_array_view(vm, this)?;
        let length = typed_array::view_length(&vm.heap, &view).unwrap_or(0);
        Ok(Value::number((length * view.kind.element_size()) as f64))
    });

    for kind in TypedArrayKind::ALL {
        let proto = prototypes[kind.table_index()];
        let constructor = b.native(kind.name(), move |vm, _, args| {
            let first = arg(args, 0);
            let buffer = match &first {
                Value::Object(id) if matches!(vm.heap.get(*id).kind, ObjectKind::ArrayBuffer(_)) => Some(*id),
                _ => None,
            };
            let view = match buffer {
                Some(buffer) => {
                    let offset = to_index(vm, &arg(args, 1), "typed array offset")?;
                    let length = match arg(args, 2) {
                        Value::Undefined => None,
                        length => Some(to_index(vm, &length, "typed array length")?),
                    };
                    typed_array::create_view(vm, kind, buffer, offset, length)?
                }
                None => {
                    let length = to_index(vm, &first, "typed array length")?;
                    let bytes = length
                        .checked_mul(kind.element_size())
                        .ok_or_else(|| VmError::range_error("Invalid typed array length"))?;
                    let buffer = typed_array::create_buffer(vm, bytes, None)?;
                    typed_array::create_view(vm, kind, buffer, 0, Some(length))?
                }
            };
            Ok(Value::Object(view))
        });
        b.value(constructor, "prototype", Value::Object(proto), FROZEN);
        b.value(
            constructor,
            "BYTES_PER_ELEMENT",
            Value::number(kind.element_size() as f64),
            FROZEN,
        );
        b.value(global, kind.name(), Value::Object(constructor), HIDDEN);
    }
}

fn install_generator_prototype(b: &mut RealmBuilder<'_>, proto: ObjectId) {
    b.method(proto, "next", |vm, this, args| {
        let step = generator::resume(vm, this, ResumeMode::Next, arg(args, 0))?;
        Ok(iter_result(vm, step))
    });
    b.method(proto, "return", |vm, this, args| {
        let step = generator::resume(vm, this, ResumeMode::Return, arg(args, 0))?;
        Ok(iter_result(vm, step))
    });
}

fn install_globals(b: &mut RealmBuilder<'_>, global: ObjectId) {
    b.value(global, "globalThis", Value::Object(global), HIDDEN);
    b.value(global, "undefined", Value::Undefined, FROZEN);
    b.value(global, "NaN", Value::Double(f64::NAN), FROZEN);
    b.value(global, "Infinity", Value::Double(f64::INFINITY), FROZEN);

    let self_getter = b.native("get self", move |_, this, _| match this {
        Value::Object(id) if *id == global => Ok(this.clone()),
        _ => Err(VmError::type_error(SELF_GETTER_MISUSE)),
    });
    let desc = PropertyDescriptor::accessor(
        Value::Object(self_getter),
        Value::Undefined,
        PropertyAttributes::ENUMERABLE | PropertyAttributes::CONFIGURABLE,
    );
    property::add_property(b.vm, global, PropertyKey::from_str("self"), desc);

    let string = b.native("String", |vm, _, args| match args.first() {
        None => Ok(Value::string("")),
        Some(value) => convert::to_string(vm, value).map(Value::String),
    });
    b.value(global, "String", Value::Object(string), HIDDEN);

    let proxy_constructor = b.native("Proxy", |vm, _, args| {
        proxy::create(vm, &arg(args, 0), &arg(args, 1)).map(Value::Object)
    });
    b.value(global, "Proxy", Value::Object(proxy_constructor), HIDDEN);

    let object = b.native("Object", |vm, _, args| match args.first() {
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        _ => Ok(Value::Object(vm.new_plain_object())),
    });
    b.value(global, "Object", Value::Object(object), HIDDEN);
    b.method(object, "defineProperty", |vm, _, args| {
        let target = arg(args, 0);
        let id = object_arg(&target, "Object.defineProperty")?;
        let key = convert::to_property_key(vm, &arg(args, 1))?;
        let desc = property::to_property_descriptor(vm, &arg(args, 2))?;
        property::define_own_property(vm, id, &key, desc, true)?;
        Ok(target)
    });
    b.method(object, "getOwnPropertyDescriptor", |vm, _, args| {
        let id = object_arg(&arg(args, 0), "Object.getOwnPropertyDescriptor")?;
        let key = convert::to_property_key(vm, &arg(args, 1))?;
        match property::get_own_property(vm, id, &key)? {
            Some(desc) => property::from_property_descriptor(vm, &desc),
            None => Ok(Value::Undefined),
        }
    });
    b.method(object, "getPrototypeOf", |vm, _, args| {
        let id = object_arg(&arg(args, 0), "Object.getPrototypeOf")?;
        Ok(property::get_prototype_of(vm, id)?.map_or(Value::Null, Value::Object))
    });
    b.method(object, "setPrototypeOf", |vm, _, args| {
        let target = arg(args, 0);
        let id = object_arg(&target, "Object.setPrototypeOf")?;
        let proto = proto_arg(&arg(args, 1))?;
        if !property::set_prototype_of(vm, id, proto)? {
            return Err(VmError::type_error("Object.setPrototypeOf failed"));
        }
        Ok(target)
    });
    b.method(object, "preventExtensions", |vm, _, args| {
        let target = arg(args, 0);
        if let Value::Object(id) = target {
            property::prevent_extensions(vm, id)?;
        }
        Ok(target)
    });
    b.method(object, "create", |vm, _, args| {
        let proto = proto_arg(&arg(args, 0))?;
        Ok(Value::Object(vm.alloc(ObjectKind::Ordinary, proto)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};

    #[test]
    fn realms_do_not_share_intrinsics() {
        let mut engine = Engine::new(EngineConfig::default());
        let a = engine.create_realm().unwrap();
        let b = engine.create_realm().unwrap();
        let vm = engine.vm();
        assert_ne!(
            vm.realm(a).intrinsics.object_prototype,
            vm.realm(b).intrinsics.object_prototype
        );
        assert_ne!(vm.realm(a).global, vm.realm(b).global);
    }

    #[test]
    fn self_getter_rejects_foreign_globals() {
        let mut engine = Engine::new(EngineConfig::default());
        let a = engine.create_realm().unwrap();
        let b = engine.create_realm().unwrap();
        let global_a = engine.realm_global(a);
        let global_b = engine.realm_global(b);

        let desc = engine
            .get_own_property_descriptor(global_a, "self")
            .unwrap()
            .unwrap();
        let getter = desc.get.unwrap();
        assert_eq!(
            engine.call(&getter, &Value::Object(global_a), &[]).unwrap(),
            Value::Object(global_a)
        );
        let err = engine.call(&getter, &Value::Object(global_b), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, SELF_GETTER_MISUSE);
    }
}
