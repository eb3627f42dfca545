//! Unmapped arguments objects

use crate::context::FrameEnv;
use crate::object::ObjectKind;
use crate::property::{self, PropertyDescriptor};
use crate::shape::{PropertyAttributes, PropertyKey};
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Materialize the arguments object of an activation
///
/// Elements are copies of the actual arguments; writes to them do not alias
/// the parameter locals.
pub fn create(vm: &mut Vm, env: &FrameEnv) -> ObjectId {
    let proto = vm.realm(env.realm).intrinsics.object_prototype;
    let id = vm.alloc(ObjectKind::Arguments(env.args.to_vec()), Some(proto));
    let length = Value::number(env.args.len() as f64);
    property::add_property(
        vm,
        id,
        PropertyKey::from_str("length"),
        PropertyDescriptor::data(length, PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE),
    );
    id
}
