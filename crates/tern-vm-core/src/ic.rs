//! Inline cache runtime for named property access
//!
//! Each `GetPropConst`/`SetPropConst`/`GetGlobal` instruction owns an
//! [`InlineCacheState`](tern_vm_bytecode::InlineCacheState) in its function's
//! feedback vector, and so does a `GetProp`/`SetProp` whose key is a private
//! name (`this.#x`) as long as the site only ever sees that one name. A hit is keyed by the receiver shape (plus the global
//! object for global loads, plus the prototype epoch for anything that
//! depends on the prototype chain). A miss runs the generic operation and
//! then records what it found. Sites that go megamorphic stop growing and
//! use the engine-wide [`MegamorphicCache`].
//!
//! Never cached: proxies, dictionary-mode receivers, element keys, receivers
//! whose prototype is not fixed by their shape, and private names that are
//! missing.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::Serialize;
use tern_vm_bytecode::{IcAction, IcEntry, IcRecordOutcome};
use tracing::debug;

use crate::context::FrameEnv;
use crate::error::{VmError, VmResult};
use crate::object::{ObjectKind, PropertySlot};
use crate::property;
use crate::shape::{PropertyAttributes, PropertyKey, ProtoLink, ShapeId};
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Entries of the megamorphic cache
pub const MEGAMORPHIC_CACHE_SIZE: usize = 1024;

#[derive(Debug, Clone)]
struct MegamorphicEntry {
    key: PropertyKey,
    store: bool,
    entry: IcEntry,
}

/// Counters of the megamorphic cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MegamorphicStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that fell back to the generic path
    pub misses: u64,
}

/// Direct-mapped cache shared by all megamorphic sites
#[derive(Debug)]
pub struct MegamorphicCache {
    entries: Box<[Option<MegamorphicEntry>]>,
    stats: MegamorphicStats,
}

impl Default for MegamorphicCache {
    fn default() -> Self {
        Self {
            entries: vec![None; MEGAMORPHIC_CACHE_SIZE].into_boxed_slice(),
            stats: MegamorphicStats::default(),
        }
    }
}

impl MegamorphicCache {
    fn index(shape: u32, key: &PropertyKey, store: bool) -> usize {
        let mut hasher = FxHasher::default();
        shape.hash(&mut hasher);
        key.hash(&mut hasher);
        store.hash(&mut hasher);
        (hasher.finish() as usize) & (MEGAMORPHIC_CACHE_SIZE - 1)
    }

    fn lookup(&mut self, shape: u32, key: &PropertyKey, store: bool, global: Option<u32>, epoch: u64) -> Option<IcEntry> {
        let hit = self.entries[Self::index(shape, key, store)]
            .as_ref()
            .filter(|e| e.store == store && &e.key == key && e.entry.matches(shape, global, epoch))
            .map(|e| e.entry);
        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    fn insert(&mut self, key: &PropertyKey, store: bool, entry: IcEntry) {
        self.entries[Self::index(entry.shape, key, store)] = Some(MegamorphicEntry {
            key: key.clone(),
            store,
            entry,
        });
    }

    /// Hit and miss counters
    pub fn stats(&self) -> MegamorphicStats {
        self.stats
    }
}

enum SiteLookup {
    Hit(IcEntry),
    Miss,
    Megamorphic,
}

#[allow(clippy::too_many_arguments)]
fn lookup_site(
    vm: &mut Vm,
    env: &FrameEnv,
    pc: usize,
    receiver: &Value,
    shape: ShapeId,
    key: &PropertyKey,
    store: bool,
    global: Option<u32>,
) -> SiteLookup {
    let epoch = vm.heap.proto_epoch();
    let shape_index = shape.index();
    let site = env.function.record(pc, |site| {
        site.observed |= receiver.kind();
        site.observe_shape(shape_index);
        if site.ic.is_megamorphic() {
            SiteLookup::Megamorphic
        } else {
            match site.ic.lookup(shape_index, global, epoch) {
                Some(entry) => SiteLookup::Hit(entry),
                None => SiteLookup::Miss,
            }
        }
    });
    match site {
        SiteLookup::Megamorphic => match vm.megamorphic.lookup(shape_index, key, store, global, epoch) {
            Some(entry) => SiteLookup::Hit(entry),
            None => SiteLookup::Megamorphic,
        },
        other => other,
    }
}

fn record_entry(vm: &mut Vm, env: &FrameEnv, pc: usize, key: &PropertyKey, store: bool, entry: IcEntry) {
    let cap = vm.polymorphic_cap;
    let outcome = env.function.record(pc, |site| site.ic.record(entry, cap));
    match outcome {
        IcRecordOutcome::BecameMegamorphic => {
            debug!(
                function = env.function.display_name(),
                pc,
                key = %key,
                "inline cache went megamorphic"
            );
            vm.megamorphic.insert(key, store, entry);
        }
        IcRecordOutcome::Megamorphic => vm.megamorphic.insert(key, store, entry),
        IcRecordOutcome::Added | IcRecordOutcome::Replaced => {}
    }
}

/// Whether the receiver's layout is fixed by its shape
fn cacheable_receiver(vm: &Vm, id: ObjectId) -> bool {
    let object = vm.heap.get(id);
    !object.is_proxy() && !vm.shapes.get(object.shape).is_dictionary()
}

/// Where a load finds `key`, as `(action, depends on the prototype chain)`
fn resolve_load(vm: &Vm, id: ObjectId, key: &PropertyKey) -> Option<(IcAction, bool)> {
    if matches!(key, PropertyKey::Index(_)) || !cacheable_receiver(vm, id) {
        return None;
    }
    let object = vm.heap.get(id);
    if matches!(object.kind, ObjectKind::Array(_)) && key.as_str() == Some("length") {
        return Some((IcAction::ArrayLength, false));
    }
    let shape = vm.shapes.get(object.shape);
    if let Some(info) = shape.lookup(key) {
        let action = if info.attributes.is_accessor() {
            IcAction::Getter {
                holder: None,
                slot: info.slot,
            }
        } else {
            IcAction::OwnData { slot: info.slot }
        };
        return Some((action, false));
    }
    if key.is_private() || shape.proto() == ProtoLink::PolyProto {
        return None;
    }

    let mut current = object.proto;
    while let Some(holder) = current {
        let object = vm.heap.get(holder);
        if object.is_proxy() {
            return None;
        }
        if let Some(info) = vm.shapes.lookup(object.shape, key) {
            let action = if info.attributes.is_accessor() {
                IcAction::Getter {
                    holder: Some(holder.index()),
                    slot: info.slot,
                }
            } else {
                IcAction::ProtoData {
                    holder: holder.index(),
                    slot: info.slot,
                }
            };
            return Some((action, true));
        }
        current = object.proto;
    }
    Some((IcAction::Absent, true))
}

fn entry_for(vm: &Vm, shape: ShapeId, global: Option<u32>, action: IcAction, chain: bool) -> IcEntry {
    IcEntry {
        shape: shape.index(),
        global,
        proto_epoch: chain.then(|| vm.heap.proto_epoch()),
        action,
    }
}

/// Serve a load from a cache entry; `None` when the entry does not apply
fn apply_load(vm: &mut Vm, id: ObjectId, receiver: &Value, action: IcAction) -> VmResult<Option<Value>> {
    let slot_of = |vm: &Vm, holder: ObjectId, slot: u32| vm.heap.get(holder).slot(slot);
    let value = match action {
        IcAction::OwnData { slot } => slot_of(vm, id, slot),
        IcAction::ProtoData { holder, slot } => slot_of(vm, ObjectId(holder), slot),
        IcAction::Getter { holder, slot } => {
            let holder = holder.map(ObjectId).unwrap_or(id);
            return match slot_of(vm, holder, slot) {
                PropertySlot::Accessor { get, .. } => property::call_getter(vm, &get, receiver).map(Some),
                PropertySlot::Data(_) => Ok(None),
            };
        }
        IcAction::Absent => return Ok(Some(Value::Undefined)),
        IcAction::ArrayLength => {
            return Ok(match &vm.heap.get(id).kind {
                ObjectKind::Array(elements) => Some(Value::number(elements.len() as f64)),
                _ => None,
            });
        }
        _ => return Ok(None),
    };
    Ok(match value {
        PropertySlot::Data(value) => Some(value),
        PropertySlot::Accessor { .. } => None,
    })
}

/// `obj.name` at `pc`
pub fn get_named(vm: &mut Vm, env: &FrameEnv, pc: usize, receiver: &Value, key: &PropertyKey) -> VmResult<Value> {
    let Value::Object(id) = receiver else {
        env.function.record(pc, |site| site.observed |= receiver.kind());
        return property::get_value(vm, receiver, key);
    };
    let id = *id;
    let shape = vm.heap.get(id).shape;
    let lookup = lookup_site(vm, env, pc, receiver, shape, key, false, None);
    if let SiteLookup::Hit(entry) = lookup
        && let Some(value) = apply_load(vm, id, receiver, entry.action)?
    {
        return Ok(value);
    }

    let resolved = resolve_load(vm, id, key);
    let entry = resolved.map(|(action, chain)| entry_for(vm, shape, None, action, chain));
    let value = property::get(vm, id, key, receiver)?;
    if let Some(entry) = entry {
        record_entry(vm, env, pc, key, false, entry);
    }
    Ok(value)
}

/// Global variable load at `pc`
pub fn get_global(vm: &mut Vm, env: &FrameEnv, pc: usize, key: &PropertyKey) -> VmResult<Value> {
    let global = vm.realm(env.realm).global;
    let receiver = Value::Object(global);
    let shape = vm.heap.get(global).shape;
    let global_tag = Some(global.index());
    let lookup = lookup_site(vm, env, pc, &receiver, shape, key, false, global_tag);
    if let SiteLookup::Hit(entry) = lookup
        && entry.action != IcAction::Absent
        && let Some(value) = apply_load(vm, global, &receiver, entry.action)?
    {
        return Ok(value);
    }

    let resolved = resolve_load(vm, global, key).filter(|(action, _)| *action != IcAction::Absent);
    if resolved.is_none() && !property::has_property(vm, global, key)? {
        return Err(VmError::reference_error(format!("{key} is not defined")));
    }
    let entry = resolved.map(|(action, chain)| entry_for(vm, shape, global_tag, action, chain));
    let value = property::get(vm, global, key, &receiver)?;
    if let Some(entry) = entry {
        record_entry(vm, env, pc, key, false, entry);
    }
    Ok(value)
}

/// Where a store to an existing property goes
fn resolve_existing_store(vm: &Vm, id: ObjectId, key: &PropertyKey) -> Option<(IcAction, bool)> {
    if matches!(key, PropertyKey::Index(_)) || !cacheable_receiver(vm, id) {
        return None;
    }
    let object = vm.heap.get(id);
    if matches!(object.kind, ObjectKind::Array(_)) && key.as_str() == Some("length") {
        return None;
    }
    let shape = vm.shapes.get(object.shape);
    if let Some(info) = shape.lookup(key) {
        return match (info.attributes.is_accessor(), object.slot(info.slot)) {
            (true, PropertySlot::Accessor { set, .. }) if !set.is_undefined() => Some((
                IcAction::Setter {
                    holder: None,
                    slot: info.slot,
                },
                false,
            )),
            (false, _) if info.attributes.contains(PropertyAttributes::WRITABLE) => {
                Some((IcAction::ReplaceData { slot: info.slot }, false))
            }
            _ => None,
        };
    }
    if key.is_private() || shape.proto() == ProtoLink::PolyProto {
        return None;
    }
    let mut current = object.proto;
    while let Some(holder) = current {
        let proto = vm.heap.get(holder);
        if proto.is_proxy() {
            return None;
        }
        if let Some(info) = vm.shapes.lookup(proto.shape, key) {
            return match proto.slot(info.slot) {
                PropertySlot::Accessor { set, .. } if !set.is_undefined() => Some((
                    IcAction::Setter {
                        holder: Some(holder.index()),
                        slot: info.slot,
                    },
                    true,
                )),
                _ => None,
            };
        }
        current = proto.proto;
    }
    None
}

/// Serve a store from a cache entry; `false` when the entry does not apply
fn apply_store(vm: &mut Vm, id: ObjectId, receiver: &Value, action: IcAction, value: &Value) -> VmResult<bool> {
    match action {
        IcAction::ReplaceData { slot } => {
            vm.heap.get_mut(id).set_slot(slot, PropertySlot::Data(value.clone()));
            Ok(true)
        }
        IcAction::AddData { new_shape, slot } => {
            let object = vm.heap.get_mut(id);
            if object.is_prototype || !object.extensible {
                return Ok(false);
            }
            object.shape = ShapeId(new_shape);
            object.set_slot(slot, PropertySlot::Data(value.clone()));
            Ok(true)
        }
        IcAction::Setter { holder, slot } => {
            let holder = holder.map(ObjectId).unwrap_or(id);
            match vm.heap.get(holder).slot(slot) {
                PropertySlot::Accessor { set, .. } if !set.is_undefined() => {
                    vm.call(&set, receiver, &[value.clone()])?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        _ => Ok(false),
    }
}

/// `obj.name = value` at `pc`
pub fn set_named(
    vm: &mut Vm,
    env: &FrameEnv,
    pc: usize,
    receiver: &Value,
    key: &PropertyKey,
    value: Value,
) -> VmResult<()> {
    let strict = env.is_strict();
    let Value::Object(id) = receiver else {
        env.function.record(pc, |site| site.observed |= receiver.kind());
        return property::set_value(vm, receiver, key, value, strict);
    };
    let id = *id;
    let shape = vm.heap.get(id).shape;
    let lookup = lookup_site(vm, env, pc, receiver, shape, key, true, None);
    if let SiteLookup::Hit(entry) = lookup
        && apply_store(vm, id, receiver, entry.action, &value)?
    {
        return Ok(());
    }

    let existing = resolve_existing_store(vm, id, key);
    let epoch = vm.heap.proto_epoch();
    let ok = property::set(vm, id, key, value, receiver)?;
    if !ok {
        if strict {
            return Err(VmError::type_error("Attempted to assign to readonly property."));
        }
        return Ok(());
    }

    let entry = match existing {
        Some((action, chain)) => Some(IcEntry {
            shape: shape.index(),
            global: None,
            proto_epoch: chain.then_some(epoch),
            action,
        }),
        None => added_property_entry(vm, id, shape, key, epoch),
    };
    if let Some(entry) = entry {
        record_entry(vm, env, pc, key, true, entry);
    }
    Ok(())
}

/// Entry for a store that appended `key` through a shared transition
fn added_property_entry(vm: &Vm, id: ObjectId, old_shape: ShapeId, key: &PropertyKey, epoch: u64) -> Option<IcEntry> {
    if matches!(key, PropertyKey::Index(_)) || key.is_private() {
        return None;
    }
    let object = vm.heap.get(id);
    if object.is_prototype || !object.extensible || object.is_proxy() {
        return None;
    }
    if vm.shapes.get(old_shape).proto() == ProtoLink::PolyProto {
        return None;
    }
    let new_shape = vm.shapes.transition(old_shape, key, PropertyAttributes::DEFAULT)?;
    if new_shape != object.shape {
        return None;
    }
    let slot = vm.shapes.lookup(new_shape, key)?.slot;
    Some(IcEntry {
        shape: old_shape.index(),
        global: None,
        proto_epoch: Some(epoch),
        action: IcAction::AddData {
            new_shape: new_shape.index(),
            slot,
        },
    })
}
