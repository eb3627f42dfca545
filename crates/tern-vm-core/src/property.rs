//! Generic property operations
//!
//! `[[GetOwnProperty]]`, `[[DefineOwnProperty]]`, `[[Get]]`, `[[Set]]`,
//! `[[Delete]]` and `[[HasProperty]]` for every object kind. Inline caches
//! fall back here on a miss, and so does compiled code through generic ops.
//!
//! Array and arguments elements live in a vector next to the shape; a hole
//! is stored as [`Value::Empty`]. Private names are looked up on the object
//! itself only and never reach a Proxy trap.

use crate::convert::{self, same_value};
use crate::error::{VmError, VmResult};
use crate::object::{ObjectKind, PropertySlot};
use crate::proxy;
use crate::shape::{PropertyAttributes, PropertyKey};
use crate::typed_array;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Elements past the current length an array may grow by in one store
const MAX_ARRAY_GROWTH: u32 = 1 << 20;

/// Property descriptor with optional fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDescriptor {
    /// `[[Value]]`
    pub value: Option<Value>,
    /// `[[Writable]]`
    pub writable: Option<bool>,
    /// `[[Get]]`
    pub get: Option<Value>,
    /// `[[Set]]`
    pub set: Option<Value>,
    /// `[[Enumerable]]`
    pub enumerable: Option<bool>,
    /// `[[Configurable]]`
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// Complete data descriptor
    pub fn data(value: Value, attributes: PropertyAttributes) -> Self {
        Self {
            value: Some(value),
            writable: Some(attributes.contains(PropertyAttributes::WRITABLE)),
            get: None,
            set: None,
            enumerable: Some(attributes.contains(PropertyAttributes::ENUMERABLE)),
            configurable: Some(attributes.contains(PropertyAttributes::CONFIGURABLE)),
        }
    }

    /// Complete accessor descriptor
    pub fn accessor(get: Value, set: Value, attributes: PropertyAttributes) -> Self {
        Self {
            value: None,
            writable: None,
            get: Some(get),
            set: Some(set),
            enumerable: Some(attributes.contains(PropertyAttributes::ENUMERABLE)),
            configurable: Some(attributes.contains(PropertyAttributes::CONFIGURABLE)),
        }
    }

    /// Descriptor that only sets `[[Value]]`
    pub fn value_only(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// IsAccessorDescriptor
    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    /// IsDataDescriptor
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    /// IsGenericDescriptor
    pub fn is_generic(&self) -> bool {
        !self.is_accessor() && !self.is_data()
    }

    fn from_slot(slot: PropertySlot, attributes: PropertyAttributes) -> Self {
        match slot {
            PropertySlot::Data(value) => Self::data(value, attributes),
            PropertySlot::Accessor { get, set } => Self::accessor(get, set, attributes),
        }
    }

    /// Whether every attribute present is `true`
    fn has_default_attributes(&self) -> bool {
        !self.is_accessor()
            && self.writable != Some(false)
            && self.enumerable != Some(false)
            && self.configurable != Some(false)
    }
}

fn reject(throw: bool, message: &str) -> VmResult<bool> {
    if throw {
        Err(VmError::type_error(message))
    } else {
        Ok(false)
    }
}

/// Own property without Proxy dispatch, as `(slot, attributes)`
pub(crate) fn ordinary_own(vm: &Vm, id: ObjectId, key: &PropertyKey) -> Option<(PropertySlot, PropertyAttributes)> {
    let object = vm.heap.get(id);
    match (&object.kind, key) {
        (ObjectKind::Array(elements), PropertyKey::Index(i)) => {
            return match elements.get(*i as usize) {
                Some(Value::Empty) | None => None,
                Some(value) => Some((PropertySlot::Data(value.clone()), PropertyAttributes::DEFAULT)),
            };
        }
        (ObjectKind::Array(elements), PropertyKey::String(s)) if &**s == "length" => {
            return Some((
                PropertySlot::Data(Value::number(elements.len() as f64)),
                PropertyAttributes::WRITABLE,
            ));
        }
        (ObjectKind::Arguments(elements), PropertyKey::Index(i)) => {
            if let Some(value) = elements.get(*i as usize).filter(|v| !matches!(v, Value::Empty)) {
                return Some((PropertySlot::Data(value.clone()), PropertyAttributes::DEFAULT));
            }
        }
        (ObjectKind::TypedArray(view), PropertyKey::Index(i)) => {
            return typed_array::get_element(&vm.heap, view, *i as usize)
                .map(|value| (PropertySlot::Data(value), PropertyAttributes::DEFAULT));
        }
        _ => {}
    }
    let info = vm.shapes.lookup(object.shape, key)?;
    Some((object.slot(info.slot), info.attributes))
}

/// `[[GetOwnProperty]]`
pub fn get_own_property(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<Option<PropertyDescriptor>> {
    if vm.heap.get(id).is_proxy() && !key.is_private() {
        return proxy::get_own_property(vm, id, key);
    }
    Ok(ordinary_own(vm, id, key).map(|(slot, attrs)| PropertyDescriptor::from_slot(slot, attrs)))
}

/// `[[GetPrototypeOf]]`
pub fn get_prototype_of(vm: &mut Vm, id: ObjectId) -> VmResult<Option<ObjectId>> {
    if vm.heap.get(id).is_proxy() {
        let target = proxy::target(vm, id)?;
        return get_prototype_of(vm, target);
    }
    Ok(vm.heap.get(id).proto)
}

/// `[[SetPrototypeOf]]`; `Ok(false)` when the change is rejected
pub fn set_prototype_of(vm: &mut Vm, id: ObjectId, proto: Option<ObjectId>) -> VmResult<bool> {
    if vm.heap.get(id).is_proxy() {
        let target = proxy::target(vm, id)?;
        return set_prototype_of(vm, target, proto);
    }
    let object = vm.heap.get(id);
    if object.proto == proto {
        return Ok(true);
    }
    if !object.extensible {
        return Ok(false);
    }
    let mut current = proto;
    while let Some(p) = current {
        if p == id {
            return Ok(false);
        }
        let link = vm.heap.get(p);
        if link.is_proxy() {
            break;
        }
        current = link.proto;
    }

    let shape = vm.shapes.set_prototype(vm.heap.get(id).shape, proto);
    let object = vm.heap.get_mut(id);
    object.proto = proto;
    object.shape = shape;
    if let Some(p) = proto {
        vm.heap.mark_prototype(p);
    }
    vm.heap.note_layout_change(id);
    Ok(true)
}

/// `[[PreventExtensions]]`
pub fn prevent_extensions(vm: &mut Vm, id: ObjectId) -> VmResult<bool> {
    if vm.heap.get(id).is_proxy() {
        let target = proxy::target(vm, id)?;
        return prevent_extensions(vm, target);
    }
    if vm.heap.get(id).extensible {
        let shape = vm.shapes.to_unique(vm.heap.get(id).shape);
        let object = vm.heap.get_mut(id);
        object.extensible = false;
        object.shape = shape;
        vm.heap.note_layout_change(id);
    }
    Ok(true)
}

fn missing_private(key: &PropertyKey) -> VmError {
    debug_assert!(key.is_private());
    VmError::type_error("Cannot access invalid private field")
}

/// `[[Get]]`
pub fn get(vm: &mut Vm, id: ObjectId, key: &PropertyKey, receiver: &Value) -> VmResult<Value> {
    if key.is_private() {
        return match ordinary_own(vm, id, key) {
            Some((PropertySlot::Data(value), _)) => Ok(value),
            Some((PropertySlot::Accessor { get, .. }, _)) => call_getter(vm, &get, receiver),
            None => Err(missing_private(key)),
        };
    }

    let mut current = id;
    loop {
        if vm.heap.get(current).is_proxy() {
            return proxy::get(vm, current, key, receiver);
        }
        match ordinary_own(vm, current, key) {
            Some((PropertySlot::Data(value), _)) => return Ok(value),
            Some((PropertySlot::Accessor { get, .. }, _)) => return call_getter(vm, &get, receiver),
            None => {}
        }
        let object = vm.heap.get(current);
        if matches!(object.kind, ObjectKind::TypedArray(_)) && matches!(key, PropertyKey::Index(_)) {
            return Ok(Value::Undefined);
        }
        match object.proto {
            Some(proto) => current = proto,
            None => return Ok(Value::Undefined),
        }
    }
}

pub(crate) fn call_getter(vm: &mut Vm, getter: &Value, receiver: &Value) -> VmResult<Value> {
    if getter.is_undefined() {
        return Ok(Value::Undefined);
    }
    vm.call(getter, receiver, &[])
}

/// `[[Set]]`; `Ok(false)` when the assignment was rejected
pub fn set(vm: &mut Vm, id: ObjectId, key: &PropertyKey, value: Value, receiver: &Value) -> VmResult<bool> {
    if key.is_private() {
        return match ordinary_own(vm, id, key) {
            Some((PropertySlot::Data(_), attrs)) if attrs.contains(PropertyAttributes::WRITABLE) => {
                write_own_value(vm, id, key, value);
                Ok(true)
            }
            Some((PropertySlot::Data(_), _)) => Ok(false),
            Some((PropertySlot::Accessor { set, .. }, _)) => call_setter(vm, &set, receiver, value),
            None => Err(missing_private(key)),
        };
    }

    if vm.heap.get(id).is_proxy() {
        return proxy::set(vm, id, key, value, receiver);
    }

    if let ObjectKind::TypedArray(view) = &vm.heap.get(id).kind
        && let PropertyKey::Index(i) = key
    {
        let view = *view;
        let i = *i as usize;
        if receiver.as_object() == Some(id) {
            let n = convert::to_number(vm, &value)?;
            typed_array::set_element(&mut vm.heap, &view, i, n);
            return Ok(true);
        }
        if typed_array::get_element(&vm.heap, &view, i).is_none() {
            return Ok(true);
        }
    }

    let (own, found_own) = match ordinary_own(vm, id, key) {
        Some(own) => (own, true),
        None => match vm.heap.get(id).proto {
            Some(parent) => return set(vm, parent, key, value, receiver),
            None => ((PropertySlot::Data(Value::Undefined), PropertyAttributes::DEFAULT), false),
        },
    };

    match own {
        (PropertySlot::Data(_), attrs) => {
            if !attrs.contains(PropertyAttributes::WRITABLE) {
                return Ok(false);
            }
            let Some(target) = receiver.as_object() else {
                return Ok(false);
            };
            if target == id && found_own && !matches!(vm.heap.get(id).kind, ObjectKind::Array(_)) {
                write_own_value(vm, id, key, value);
                return Ok(true);
            }
            match get_own_property(vm, target, key)? {
                Some(existing) if existing.is_accessor() => Ok(false),
                Some(existing) if existing.writable == Some(false) => Ok(false),
                Some(_) => define_own_property(vm, target, key, PropertyDescriptor::value_only(value), false),
                None => define_own_property(
                    vm,
                    target,
                    key,
                    PropertyDescriptor::data(value, PropertyAttributes::DEFAULT),
                    false,
                ),
            }
        }
        (PropertySlot::Accessor { set, .. }, _) => call_setter(vm, &set, receiver, value),
    }
}

fn call_setter(vm: &mut Vm, setter: &Value, receiver: &Value, value: Value) -> VmResult<bool> {
    if setter.is_undefined() {
        return Ok(false);
    }
    vm.call(setter, receiver, &[value])?;
    Ok(true)
}

/// Overwrite the value of an existing own data property
///
/// Array elements and `length` go through [`define_own_property`] instead.
fn write_own_value(vm: &mut Vm, id: ObjectId, key: &PropertyKey, value: Value) {
    let shape = vm.heap.get(id).shape;
    let slot = vm.shapes.lookup(shape, key).map(|info| info.slot);
    let object = vm.heap.get_mut(id);
    if let PropertyKey::Index(i) = key
        && let ObjectKind::Arguments(elements) = &mut object.kind
        && let Some(element) = elements.get_mut(*i as usize)
        && !matches!(element, Value::Empty)
    {
        *element = value;
        return;
    }
    if let Some(slot) = slot {
        object.set_slot(slot, PropertySlot::Data(value));
    }
}

/// `[[DefineOwnProperty]]`
///
/// With `throw`, a rejected definition is a TypeError instead of `Ok(false)`.
pub fn define_own_property(
    vm: &mut Vm,
    id: ObjectId,
    key: &PropertyKey,
    desc: PropertyDescriptor,
    throw: bool,
) -> VmResult<bool> {
    if vm.heap.get(id).is_proxy() && !key.is_private() {
        let ok = proxy::define_own_property(vm, id, key, desc)?;
        if !ok && throw {
            return Err(VmError::type_error("Proxy object's 'defineProperty' trap returned falsy"));
        }
        return Ok(ok);
    }

    match (&vm.heap.get(id).kind, key) {
        (ObjectKind::Array(_), PropertyKey::Index(i)) => return define_element(vm, id, *i, desc, throw),
        (ObjectKind::Array(_), PropertyKey::String(s)) if &**s == "length" => {
            return define_array_length(vm, id, desc, throw);
        }
        (ObjectKind::Arguments(elements), PropertyKey::Index(i)) if (*i as usize) < elements.len() => {
            if !matches!(elements[*i as usize], Value::Empty) {
                return define_element(vm, id, *i, desc, throw);
            }
        }
        (ObjectKind::TypedArray(view), PropertyKey::Index(i)) => {
            let view = *view;
            let i = *i as usize;
            if typed_array::get_element(&vm.heap, &view, i).is_none() {
                return reject(throw, "Attempting to store out-of-bounds property on a typed array");
            }
            if !desc.has_default_attributes() {
                return reject(throw, "Attempting to configure a typed array element with non-default attributes");
            }
            if let Some(value) = desc.value {
                let n = convert::to_number(vm, &value)?;
                typed_array::set_element(&mut vm.heap, &view, i, n);
            }
            return Ok(true);
        }
        _ => {}
    }

    let shape = vm.heap.get(id).shape;
    let current = vm.shapes.lookup(shape, key).cloned();
    let Some(current) = current else {
        if !vm.heap.get(id).extensible {
            return reject(throw, "Attempting to define property on object that is not extensible.");
        }
        add_property(vm, id, key.clone(), desc);
        return Ok(true);
    };

    let attrs = current.attributes;
    let slot = vm.heap.get(id).slot(current.slot);
    let configurable = attrs.contains(PropertyAttributes::CONFIGURABLE);
    let current_is_accessor = attrs.is_accessor();

    if !configurable {
        if desc.configurable == Some(true) {
            return reject(throw, "Attempting to change configurable attribute of unconfigurable property.");
        }
        if desc
            .enumerable
            .is_some_and(|e| e != attrs.contains(PropertyAttributes::ENUMERABLE))
        {
            return reject(throw, "Attempting to change enumerable attribute of unconfigurable property.");
        }
        if !desc.is_generic() && desc.is_accessor() != current_is_accessor {
            return reject(throw, "Attempting to change access mechanism for an unconfigurable property.");
        }
        match &slot {
            PropertySlot::Accessor { get, set } => {
                if desc.get.as_ref().is_some_and(|g| !same_value(g, get)) {
                    return reject(throw, "Attempting to change the getter of an unconfigurable property.");
                }
                if desc.set.as_ref().is_some_and(|s| !same_value(s, set)) {
                    return reject(throw, "Attempting to change the setter of an unconfigurable property.");
                }
            }
            PropertySlot::Data(value) if !attrs.contains(PropertyAttributes::WRITABLE) => {
                if desc.writable == Some(true) {
                    return reject(throw, "Attempting to change writable attribute of unconfigurable property.");
                }
                if desc.value.as_ref().is_some_and(|v| !same_value(v, value)) {
                    return reject(throw, "Attempting to change value of a readonly property.");
                }
            }
            PropertySlot::Data(_) => {}
        }
    }

    let converting = !desc.is_generic() && desc.is_accessor() != current_is_accessor;
    let mut new_attrs = PropertyAttributes::empty();
    new_attrs.set(
        PropertyAttributes::ENUMERABLE,
        desc.enumerable
            .unwrap_or(attrs.contains(PropertyAttributes::ENUMERABLE)),
    );
    new_attrs.set(
        PropertyAttributes::CONFIGURABLE,
        desc.configurable.unwrap_or(configurable),
    );

    let new_slot = if desc.is_accessor() || (current_is_accessor && !converting) {
        new_attrs |= PropertyAttributes::ACCESSOR;
        let (old_get, old_set) = match (&slot, converting) {
            (PropertySlot::Accessor { get, set }, false) => (get.clone(), set.clone()),
            _ => (Value::Undefined, Value::Undefined),
        };
        PropertySlot::Accessor {
            get: desc.get.unwrap_or(old_get),
            set: desc.set.unwrap_or(old_set),
        }
    } else {
        let (old_value, old_writable) = match (&slot, converting) {
            (PropertySlot::Data(value), false) => (value.clone(), attrs.contains(PropertyAttributes::WRITABLE)),
            _ => (Value::Undefined, false),
        };
        new_attrs.set(PropertyAttributes::WRITABLE, desc.writable.unwrap_or(old_writable));
        PropertySlot::Data(desc.value.unwrap_or(old_value))
    };

    if new_attrs != attrs {
        let new_shape = vm.shapes.reconfigure_property(shape, key, new_attrs);
        vm.heap.get_mut(id).shape = new_shape;
        vm.heap.note_layout_change(id);
    }
    vm.heap.get_mut(id).set_slot(current.slot, new_slot);
    Ok(true)
}

/// Append a new own property through a shape transition
pub(crate) fn add_property(vm: &mut Vm, id: ObjectId, key: PropertyKey, desc: PropertyDescriptor) {
    let mut attrs = PropertyAttributes::empty();
    attrs.set(PropertyAttributes::ENUMERABLE, desc.enumerable.unwrap_or(false));
    attrs.set(PropertyAttributes::CONFIGURABLE, desc.configurable.unwrap_or(false));
    let slot_value = if desc.is_accessor() {
        attrs |= PropertyAttributes::ACCESSOR;
        PropertySlot::Accessor {
            get: desc.get.unwrap_or_default(),
            set: desc.set.unwrap_or_default(),
        }
    } else {
        attrs.set(PropertyAttributes::WRITABLE, desc.writable.unwrap_or(false));
        PropertySlot::Data(desc.value.unwrap_or_default())
    };

    let shape = vm.heap.get(id).shape;
    let new_shape = vm.shapes.add_property(shape, key.clone(), attrs);
    let slot = vm.shapes.lookup(new_shape, &key).map(|info| info.slot);
    let object = vm.heap.get_mut(id);
    object.shape = new_shape;
    if let Some(slot) = slot {
        object.set_slot(slot, slot_value);
    }
    vm.heap.note_layout_change(id);
}

fn define_element(vm: &mut Vm, id: ObjectId, index: u32, desc: PropertyDescriptor, throw: bool) -> VmResult<bool> {
    if !desc.has_default_attributes() {
        return reject(throw, "Array elements only support default attributes");
    }
    let extensible = vm.heap.get(id).extensible;
    let object = vm.heap.get_mut(id);
    let (ObjectKind::Array(elements) | ObjectKind::Arguments(elements)) = &mut object.kind else {
        return Err(VmError::internal("element store on an object without elements"));
    };
    let i = index as usize;
    let exists = elements.get(i).is_some_and(|v| !matches!(v, Value::Empty));
    if !exists {
        if !extensible {
            return reject(throw, "Attempting to define property on object that is not extensible.");
        }
        if index > elements.len() as u32 + MAX_ARRAY_GROWTH {
            return Err(VmError::range_error("Array index exceeds the supported dense length"));
        }
        if i >= elements.len() {
            elements.resize(i + 1, Value::Empty);
        }
        elements[i] = desc.value.unwrap_or_default();
    } else if let Some(value) = desc.value {
        elements[i] = value;
    }
    Ok(true)
}

fn define_array_length(vm: &mut Vm, id: ObjectId, desc: PropertyDescriptor, throw: bool) -> VmResult<bool> {
    if desc.is_accessor() || desc.configurable == Some(true) || desc.enumerable == Some(true) {
        return reject(throw, "Attempting to change configurable attribute of unconfigurable property.");
    }
    if desc.writable == Some(false) {
        return reject(throw, "Read-only array length is not supported");
    }
    let Some(value) = desc.value else {
        return Ok(true);
    };
    let n = convert::to_number(vm, &value)?;
    let len = convert::to_uint32(n);
    if len as f64 != n {
        return Err(VmError::range_error("Invalid array length"));
    }
    if let ObjectKind::Array(elements) = &mut vm.heap.get_mut(id).kind {
        if len as usize > elements.len() + MAX_ARRAY_GROWTH as usize {
            return Err(VmError::range_error("Array index exceeds the supported dense length"));
        }
        elements.resize(len as usize, Value::Empty);
    }
    Ok(true)
}

/// `[[Delete]]`
pub fn delete(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<bool> {
    if key.is_private() {
        return Ok(false);
    }
    if vm.heap.get(id).is_proxy() {
        return proxy::delete(vm, id, key);
    }
    let object = vm.heap.get_mut(id);
    match (&mut object.kind, key) {
        (ObjectKind::Array(elements) | ObjectKind::Arguments(elements), PropertyKey::Index(i))
            if (*i as usize) < elements.len() && !matches!(elements[*i as usize], Value::Empty) =>
        {
            elements[*i as usize] = Value::Empty;
            return Ok(true);
        }
        (ObjectKind::Array(_), PropertyKey::String(s)) if &**s == "length" => return Ok(false),
        (ObjectKind::TypedArray(view), PropertyKey::Index(i)) => {
            let view = *view;
            return Ok(typed_array::get_element(&vm.heap, &view, *i as usize).is_none());
        }
        _ => {}
    }

    let shape = vm.heap.get(id).shape;
    let Some(info) = vm.shapes.lookup(shape, key).cloned() else {
        return Ok(true);
    };
    if !info.attributes.contains(PropertyAttributes::CONFIGURABLE) {
        return Ok(false);
    }
    let new_shape = vm.shapes.remove_property(shape, key);
    let object = vm.heap.get_mut(id);
    object.shape = new_shape;
    object.set_slot(info.slot, PropertySlot::default());
    vm.heap.note_layout_change(id);
    Ok(true)
}

/// `[[HasProperty]]`
pub fn has_property(vm: &mut Vm, id: ObjectId, key: &PropertyKey) -> VmResult<bool> {
    if key.is_private() {
        return Ok(ordinary_own(vm, id, key).is_some());
    }
    let mut current = id;
    loop {
        if vm.heap.get(current).is_proxy() {
            return proxy::has(vm, current, key);
        }
        if ordinary_own(vm, current, key).is_some() {
            return Ok(true);
        }
        match vm.heap.get(current).proto {
            Some(proto) => current = proto,
            None => return Ok(false),
        }
    }
}

fn nullish_name(value: &Value) -> &'static str {
    if matches!(value, Value::Null) { "null" } else { "undefined" }
}

/// GetValue on an arbitrary base (property access in bytecode)
pub fn get_value(vm: &mut Vm, base: &Value, key: &PropertyKey) -> VmResult<Value> {
    match base {
        Value::Object(id) => get(vm, *id, key, base),
        Value::Undefined | Value::Null | Value::Empty => Err(VmError::type_error(format!(
            "Cannot read property '{key}' of {}",
            nullish_name(base)
        ))),
        Value::String(s) => match key {
            PropertyKey::String(k) if &**k == "length" => Ok(Value::number(s.encode_utf16().count() as f64)),
            PropertyKey::Index(i) => Ok(s
                .encode_utf16()
                .nth(*i as usize)
                .map(|unit| Value::String(String::from_utf16_lossy(&[unit]).into()))
                .unwrap_or_default()),
            _ => primitive_get(vm, key, base),
        },
        _ => primitive_get(vm, key, base),
    }
}

fn primitive_get(vm: &mut Vm, key: &PropertyKey, base: &Value) -> VmResult<Value> {
    if key.is_private() {
        return Err(missing_private(key));
    }
    let proto = vm.current_intrinsics().object_prototype;
    get(vm, proto, key, base)
}

/// PutValue on an arbitrary base
pub fn set_value(vm: &mut Vm, base: &Value, key: &PropertyKey, value: Value, strict: bool) -> VmResult<()> {
    let ok = match base {
        Value::Object(id) => set(vm, *id, key, value, base)?,
        Value::Undefined | Value::Null | Value::Empty => {
            return Err(VmError::type_error(format!(
                "Cannot set property '{key}' of {}",
                nullish_name(base)
            )));
        }
        _ => false,
    };
    if !ok && strict {
        return Err(VmError::type_error("Attempted to assign to readonly property."));
    }
    Ok(())
}

/// Value for a property key, as passed to Proxy traps
pub fn key_to_value(key: &PropertyKey) -> Value {
    match key {
        PropertyKey::String(s) => Value::String(s.clone()),
        PropertyKey::Index(i) => {
            let mut buffer = itoa::Buffer::new();
            Value::string(buffer.format(*i))
        }
        PropertyKey::Symbol(sym) => Value::Symbol(sym.clone()),
    }
}

/// FromPropertyDescriptor
pub fn from_property_descriptor(vm: &mut Vm, desc: &PropertyDescriptor) -> VmResult<Value> {
    let object = vm.new_plain_object();
    let fields = [
        ("value", desc.value.clone()),
        ("writable", desc.writable.map(Value::Boolean)),
        ("get", desc.get.clone()),
        ("set", desc.set.clone()),
        ("enumerable", desc.enumerable.map(Value::Boolean)),
        ("configurable", desc.configurable.map(Value::Boolean)),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            add_property(
                vm,
                object,
                PropertyKey::from_str(name),
                PropertyDescriptor::data(value, PropertyAttributes::DEFAULT),
            );
        }
    }
    Ok(Value::Object(object))
}

/// ToPropertyDescriptor
pub fn to_property_descriptor(vm: &mut Vm, value: &Value) -> VmResult<PropertyDescriptor> {
    let Value::Object(id) = value else {
        return Err(VmError::type_error("Property description must be an object"));
    };
    let id = *id;
    let field = |vm: &mut Vm, name: &str| -> VmResult<Option<Value>> {
        let key = PropertyKey::from_str(name);
        if has_property(vm, id, &key)? {
            Ok(Some(get(vm, id, &key, value)?))
        } else {
            Ok(None)
        }
    };
    let enumerable = field(vm, "enumerable")?.map(|v| convert::to_boolean(&v));
    let configurable = field(vm, "configurable")?.map(|v| convert::to_boolean(&v));
    let value_field = field(vm, "value")?;
    let writable = field(vm, "writable")?.map(|v| convert::to_boolean(&v));
    let get_field = field(vm, "get")?;
    let set_field = field(vm, "set")?;

    if let Some(getter) = &get_field
        && !getter.is_undefined()
        && !vm.is_callable(getter)
    {
        return Err(VmError::type_error("Getter must be a function"));
    }
    if let Some(setter) = &set_field
        && !setter.is_undefined()
        && !vm.is_callable(setter)
    {
        return Err(VmError::type_error("Setter must be a function"));
    }
    let desc = PropertyDescriptor {
        value: value_field,
        writable,
        get: get_field,
        set: set_field,
        enumerable,
        configurable,
    };
    if desc.is_accessor() && desc.is_data() {
        return Err(VmError::type_error(
            "Invalid property.  A property cannot both have accessors and be writable or have a value",
        ));
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_classification() {
        let data = PropertyDescriptor::data(Value::Int32(1), PropertyAttributes::DEFAULT);
        assert!(data.is_data());
        assert!(!data.is_accessor());
        assert!(data.has_default_attributes());

        let accessor = PropertyDescriptor::accessor(Value::Undefined, Value::Undefined, PropertyAttributes::empty());
        assert!(accessor.is_accessor());
        assert!(!accessor.has_default_attributes());

        assert!(PropertyDescriptor::default().is_generic());
        assert!(PropertyDescriptor::value_only(Value::Null).has_default_attributes());
    }

    #[test]
    fn index_keys_become_strings_for_traps() {
        assert_eq!(key_to_value(&PropertyKey::Index(12)), Value::string("12"));
        assert_eq!(key_to_value(&PropertyKey::from_str("x")), Value::string("x"));
    }
}
