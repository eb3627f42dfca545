//! Proxy exotic objects
//!
//! Traps are looked up on the handler for every operation. A missing trap
//! forwards the operation to the target. Private names never get here; the
//! property layer resolves them on the proxy object itself.

use tracing::trace;

use crate::convert;
use crate::error::{VmError, VmResult};
use crate::object::{ObjectKind, ProxyData};
use crate::property::{self, PropertyDescriptor, key_to_value};
use crate::shape::PropertyKey;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

const REVOKED: &str = "Proxy has already been revoked. No more operations are allowed to be performed on it";

/// Create a proxy for `target` with `handler`
pub fn create(vm: &mut Vm, target: &Value, handler: &Value) -> VmResult<ObjectId> {
    let Value::Object(target) = target else {
        return Err(VmError::type_error("A Proxy's 'target' should be an Object"));
    };
    let Value::Object(handler) = handler else {
        return Err(VmError::type_error("A Proxy's 'handler' should be an Object"));
    };
    let data = ProxyData {
        target: Some(*target),
        handler: Some(*handler),
    };
    Ok(vm.alloc(ObjectKind::Proxy(data), None))
}

/// Revoke a proxy; later operations throw
pub fn revoke(vm: &mut Vm, id: ObjectId) -> VmResult<()> {
    match &mut vm.heap.get_mut(id).kind {
        ObjectKind::Proxy(data) => {
            data.target = None;
            data.handler = None;
            Ok(())
        }
        _ => Err(VmError::type_error("Not a Proxy object")),
    }
}

fn parts(vm: &Vm, id: ObjectId) -> VmResult<(ObjectId, ObjectId)> {
    match &vm.heap.get(id).kind {
        ObjectKind::Proxy(ProxyData {
            target: Some(target),
            handler: Some(handler),
        }) => Ok((*target, *handler)),
        ObjectKind::Proxy(_) => Err(VmError::type_error(REVOKED)),
        _ => Err(VmError::internal("proxy operation on a non-proxy object")),
    }
}

/// `[[ProxyTarget]]`, failing once revoked
pub(crate) fn target(vm: &Vm, id: ObjectId) -> VmResult<ObjectId> {
    parts(vm, id).map(|(target, _)| target)
}

fn trap(vm: &mut Vm, handler: ObjectId, name: &str) -> VmResult<Option<Value>> {
    let method = property::get(vm, handler, &PropertyKey::from_str(name), &Value::Object(handler))?;
    if method.is_nullish() {
        return Ok(None);
    }
    if !vm.is_callable(&method) {
        return Err(VmError::type_error(format!("'{name}' property of a Proxy's handler should be callable")));
    }
    trace!(trap = name, "proxy trap");
    Ok(Some(method))
}

/// `[[Get]]`
pub fn get(vm: &mut Vm, id: ObjectId, key: &PropertyKey, receiver: &Value) -> VmResult<Value> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "get")? {
        None => property::get(vm, target, key, receiver),
        Some(method) => vm.call(
            &method,
            &Value::Object(handler),
            &[Value::Object(target), key_to_value(key), receiver.clone()],
        ),
    }
}

/// `[[Set]]`
pub fn set(vm: &mut Vm, id: ObjectId, key: &PropertyKey, value: Value, receiver: &Value) -> VmResult<bool> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "set")? {
        None => property::set(vm, target, key, value, receiver),
        Some(method) => {
            let result = vm.call(
                &method,
                &Value::Object(handler),
                &[Value::Object(target), key_to_value(key), value, receiver.clone()],
            )?;
            Ok(convert::to_boolean(&result))
        }
    }
}

/// `[[HasProperty]]`
pub fn has(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<bool> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "has")? {
        None => property::has_property(vm, target, key),
        Some(method) => {
            let result = vm.call(&method, &Value::Object(handler), &[Value::Object(target), key_to_value(key)])?;
            Ok(convert::to_boolean(&result))
        }
    }
}

/// `[[Delete]]`
pub fn delete(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<bool> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "deleteProperty")? {
        None => property::delete(vm, target, key),
        Some(method) => {
            let result = vm.call(&method, &Value::Object(handler), &[Value::Object(target), key_to_value(key)])?;
            Ok(convert::to_boolean(&result))
        }
    }
}

/// `[[DefineOwnProperty]]`
pub fn define_own_property(vm: &mut Vm, id: ObjectId, key: &PropertyKey, desc: PropertyDescriptor) -> VmResult<bool> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "defineProperty")? {
        None => property::define_own_property(vm, target, key, desc, false),
        Some(method) => {
            let desc_object = property::from_property_descriptor(vm, &desc)?;
            let result = vm.call(
                &method,
                &Value::Object(handler),
                &[Value::Object(target), key_to_value(key), desc_object],
            )?;
            Ok(convert::to_boolean(&result))
        }
    }
}

/// `[[GetOwnProperty]]`
pub fn get_own_property(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<Option<PropertyDescriptor>> {
    let (target, handler) = parts(vm, id)?;
    match trap(vm, handler, "getOwnPropertyDescriptor")? {
        None => property::get_own_property(vm, target, key),
        Some(method) => {
            let result = vm.call(&method, &Value::Object(handler), &[Value::Object(target), key_to_value(key)])?;
            match result {
                Value::Undefined => Ok(None),
                Value::Object(_) => {
                    let mut desc = property::to_property_descriptor(vm, &result)?;
                    if !desc.is_accessor() {
                        desc.value.get_or_insert(Value::Undefined);
                        desc.writable.get_or_insert(false);
                    }
                    desc.enumerable.get_or_insert(false);
                    desc.configurable.get_or_insert(false);
                    Ok(Some(desc))
                }
                _ => Err(VmError::type_error(
                    "result of 'getOwnPropertyDescriptor' call should either be an Object or undefined",
                )),
            }
        }
    }
}
