//! Hidden classes (shapes) for property access optimization.
//!
//! A shape describes the layout of an object: which properties it has, in
//! which slot each one lives, with which attributes, and which prototype the
//! object links to. Shapes live in an arena ([`ShapeTable`]) and are
//! addressed by [`ShapeId`], so inline caches compare layouts with a single
//! integer comparison.
//!
//! Adding a property follows (or lazily creates) a transition edge keyed by
//! `(key, attributes)`, so objects built the same way converge to the same
//! shape. Deleting or reconfiguring a property is not append-only: the
//! object moves to a dictionary shape that it owns alone and that no cache
//! ever records.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::debug;

use crate::value::{ObjectId, Symbol};

/// Outgoing property transitions before a shape stops sharing children
pub const MAX_TRANSITIONS_PER_SHAPE: usize = 64;

/// Shapes linking to one prototype before it switches to poly-proto roots
pub const MAX_SHAPES_PER_PROTOTYPE: u32 = 256;

/// Prototype transitions out of one shape before it uses a poly-proto link
pub const MAX_PROTOTYPE_TRANSITIONS: usize = 8;

/// Own properties before an object goes to dictionary mode
pub const MAX_SLOTS_BEFORE_DICTIONARY: u32 = 512;

/// Handle of a shape in the [`ShapeTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub(crate) u32);

impl ShapeId {
    /// Arena index, as recorded by inline caches
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Property attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyAttributes: u8 {
        /// `[[Writable]]` (data properties only)
        const WRITABLE = 1 << 0;
        /// `[[Enumerable]]`
        const ENUMERABLE = 1 << 1;
        /// `[[Configurable]]`
        const CONFIGURABLE = 1 << 2;
        /// The slot holds a getter/setter pair
        const ACCESSOR = 1 << 3;

        /// Plain assignment
        const DEFAULT = Self::WRITABLE.bits() | Self::ENUMERABLE.bits() | Self::CONFIGURABLE.bits();
    }
}

impl PropertyAttributes {
    /// Attributes from the bytecode `DefineField` bits
    pub fn from_field_bits(bits: u8) -> Self {
        Self::from_bits_truncate(bits) & Self::DEFAULT
    }

    /// Whether the property is an accessor
    #[inline]
    pub fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }
}

/// Property key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key that is not an array index
    String(Arc<str>),
    /// Canonical array index (`0 ..= 2^32 - 2`)
    Index(u32),
    /// Symbol or private name
    Symbol(Arc<Symbol>),
}

impl PropertyKey {
    /// Key for a string, canonicalizing array indices
    pub fn from_str(s: &str) -> Self {
        match parse_array_index(s) {
            Some(index) => Self::Index(index),
            None => Self::String(Arc::from(s)),
        }
    }

    /// Key for an existing shared string
    pub fn from_arc(s: &Arc<str>) -> Self {
        match parse_array_index(s) {
            Some(index) => Self::Index(index),
            None => Self::String(s.clone()),
        }
    }

    /// Whether this is a private name
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Symbol(sym) if sym.is_private())
    }

    /// String payload of a string key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Index(i) => write!(f, "{i}"),
            Self::Symbol(sym) => write!(f, "{sym}"),
        }
    }
}

fn parse_array_index(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 10 {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = s.parse().ok()?;
    (n < u32::MAX as u64).then_some(n as u32)
}

/// Internal class of the objects using a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectClass {
    /// Plain object
    Ordinary,
    /// Array exotic object
    Array,
    /// Callable
    Function,
    /// Arguments object
    Arguments,
    /// ArrayBuffer
    ArrayBuffer,
    /// Integer-indexed exotic object
    TypedArray,
    /// Proxy exotic object
    Proxy,
    /// Generator object
    Generator,
    /// Error instance
    Error,
}

/// Prototype recorded in a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoLink {
    /// `[[Prototype]]` is null
    Null,
    /// The shape determines the prototype
    Object(ObjectId),
    /// Many layouts share this prototype; read it from the object
    PolyProto,
}

/// One own property of a shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Key
    pub key: PropertyKey,
    /// Slot in the object's slot vector
    pub slot: u32,
    /// Attributes
    pub attributes: PropertyAttributes,
}

/// A node of the shape tree
#[derive(Debug, Clone)]
pub struct Shape {
    id: ShapeId,
    parent: Option<ShapeId>,
    proto: ProtoLink,
    class: ObjectClass,
    properties: Vec<PropertyInfo>,
    index: FxHashMap<PropertyKey, usize>,
    transitions: FxHashMap<(PropertyKey, PropertyAttributes), ShapeId>,
    proto_transitions: FxHashMap<ProtoLink, ShapeId>,
    dictionary: bool,
    slot_count: u32,
}

impl Shape {
    /// Handle of this shape
    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Shape this one transitioned from
    pub fn parent(&self) -> Option<ShapeId> {
        self.parent
    }

    /// Prototype link
    #[inline]
    pub fn proto(&self) -> ProtoLink {
        self.proto
    }

    /// Object class
    #[inline]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Own properties in definition order
    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    /// Own property by key
    #[inline]
    pub fn lookup(&self, key: &PropertyKey) -> Option<&PropertyInfo> {
        self.index.get(key).map(|&i| &self.properties[i])
    }

    /// Whether the shape is uniquely owned and never cached
    #[inline]
    pub fn is_dictionary(&self) -> bool {
        self.dictionary
    }

    /// Number of slots an object with this shape needs
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    fn push_property(&mut self, key: PropertyKey, attributes: PropertyAttributes) -> u32 {
        let slot = self.slot_count;
        self.index.insert(key.clone(), self.properties.len());
        self.properties.push(PropertyInfo {
            key,
            slot,
            attributes,
        });
        self.slot_count += 1;
        slot
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key.clone(), i))
            .collect();
    }
}

/// Counters exposed by [`ShapeTable::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShapeTableStats {
    /// Shapes allocated
    pub shapes: usize,
    /// Shapes in dictionary mode
    pub dictionary_shapes: usize,
    /// Shared transition edges
    pub transitions: usize,
    /// Prototypes that switched to poly-proto roots
    pub poly_proto_prototypes: usize,
    /// Objects moved to dictionary mode
    pub dictionary_conversions: u64,
}

/// Arena of all shapes of one engine
#[derive(Debug, Default)]
pub struct ShapeTable {
    shapes: Vec<Shape>,
    roots: FxHashMap<(ObjectClass, ProtoLink), ShapeId>,
    shapes_per_proto: FxHashMap<ObjectId, u32>,
    poly_protos: FxHashSet<ObjectId>,
    dictionary_conversions: u64,
}

impl ShapeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape by handle
    ///
    /// Handles are only created by this table and never freed.
    #[inline]
    pub fn get(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.0 as usize]
    }

    /// Own property of a shape
    #[inline]
    pub fn lookup(&self, id: ShapeId, key: &PropertyKey) -> Option<&PropertyInfo> {
        self.get(id).lookup(key)
    }

    fn link_for(&self, proto: Option<ObjectId>) -> ProtoLink {
        match proto {
            None => ProtoLink::Null,
            Some(p) if self.poly_protos.contains(&p) => ProtoLink::PolyProto,
            Some(p) => ProtoLink::Object(p),
        }
    }

    fn alloc(&mut self, mut shape: Shape) -> ShapeId {
        let id = ShapeId(self.shapes.len() as u32);
        shape.id = id;
        if let ProtoLink::Object(proto) = shape.proto {
            let count = self.shapes_per_proto.entry(proto).or_insert(0);
            *count += 1;
            if *count > MAX_SHAPES_PER_PROTOTYPE && self.poly_protos.insert(proto) {
                debug!(prototype = proto.index(), shapes = *count, "prototype switched to poly-proto");
            }
        }
        self.shapes.push(shape);
        id
    }

    fn empty_shape(class: ObjectClass, proto: ProtoLink) -> Shape {
        Shape {
            id: ShapeId(0),
            parent: None,
            proto,
            class,
            properties: Vec::new(),
            index: FxHashMap::default(),
            transitions: FxHashMap::default(),
            proto_transitions: FxHashMap::default(),
            dictionary: false,
            slot_count: 0,
        }
    }

    /// Empty shape for a class and prototype
    pub fn root(&mut self, class: ObjectClass, proto: Option<ObjectId>) -> ShapeId {
        let link = self.link_for(proto);
        if let Some(&id) = self.roots.get(&(class, link)) {
            return id;
        }
        let id = self.alloc(Self::empty_shape(class, link));
        self.roots.insert((class, link), id);
        id
    }

    /// Whether objects linking to `proto` get poly-proto shapes
    pub fn is_poly_proto(&self, proto: ObjectId) -> bool {
        self.poly_protos.contains(&proto)
    }

    fn to_dictionary(&mut self, id: ShapeId) -> Shape {
        self.dictionary_conversions += 1;
        let source = self.get(id);
        debug!(shape = id.0, properties = source.properties.len(), "dictionary mode");
        Shape {
            id: ShapeId(0),
            parent: Some(id),
            proto: source.proto,
            class: source.class,
            properties: source.properties.clone(),
            index: source.index.clone(),
            transitions: FxHashMap::default(),
            proto_transitions: FxHashMap::default(),
            dictionary: true,
            slot_count: source.slot_count,
        }
    }

    /// Shape after adding `key` with `attributes`
    ///
    /// Dictionary shapes are updated in place and returned unchanged.
    pub fn add_property(&mut self, id: ShapeId, key: PropertyKey, attributes: PropertyAttributes) -> ShapeId {
        let shape = &mut self.shapes[id.0 as usize];
        if shape.dictionary {
            shape.push_property(key, attributes);
            return id;
        }
        let edge = (key, attributes);
        if let Some(&child) = shape.transitions.get(&edge) {
            return child;
        }

        if shape.transitions.len() >= MAX_TRANSITIONS_PER_SHAPE || shape.slot_count >= MAX_SLOTS_BEFORE_DICTIONARY {
            let mut dict = self.to_dictionary(id);
            dict.push_property(edge.0, edge.1);
            return self.alloc(dict);
        }

        let mut child = Shape {
            id: ShapeId(0),
            parent: Some(id),
            proto: shape.proto,
            class: shape.class,
            properties: shape.properties.clone(),
            index: shape.index.clone(),
            transitions: FxHashMap::default(),
            proto_transitions: FxHashMap::default(),
            dictionary: false,
            slot_count: shape.slot_count,
        };
        child.push_property(edge.0.clone(), edge.1);
        let child_id = self.alloc(child);
        self.shapes[id.0 as usize].transitions.insert(edge, child_id);
        child_id
    }

    /// Existing transition edge, without creating one
    pub fn transition(&self, id: ShapeId, key: &PropertyKey, attributes: PropertyAttributes) -> Option<ShapeId> {
        let shape = self.get(id);
        if shape.dictionary {
            return None;
        }
        shape.transitions.get(&(key.clone(), attributes)).copied()
    }

    /// Shape after removing `key`; the slot is left unused
    pub fn remove_property(&mut self, id: ShapeId, key: &PropertyKey) -> ShapeId {
        let (target, mut shape) = self.owned_dictionary(id);
        shape.properties.retain(|p| &p.key != key);
        shape.rebuild_index();
        self.store_dictionary(target, shape)
    }

    /// Shape after changing the attributes of `key`
    pub fn reconfigure_property(&mut self, id: ShapeId, key: &PropertyKey, attributes: PropertyAttributes) -> ShapeId {
        let (target, mut shape) = self.owned_dictionary(id);
        if let Some(&i) = shape.index.get(key) {
            shape.properties[i].attributes = attributes;
        }
        self.store_dictionary(target, shape)
    }

    /// Dictionary shape for an object that stops being extensible
    pub fn to_unique(&mut self, id: ShapeId) -> ShapeId {
        let (target, shape) = self.owned_dictionary(id);
        self.store_dictionary(target, shape)
    }

    /// Shape after replacing the prototype
    pub fn set_prototype(&mut self, id: ShapeId, proto: Option<ObjectId>) -> ShapeId {
        let link = self.link_for(proto);
        let shape = &mut self.shapes[id.0 as usize];
        if shape.dictionary {
            shape.proto = link;
            return id;
        }
        if shape.proto == link {
            return id;
        }
        let link = if shape.proto_transitions.len() >= MAX_PROTOTYPE_TRANSITIONS
            && !shape.proto_transitions.contains_key(&link)
        {
            ProtoLink::PolyProto
        } else {
            link
        };
        if let Some(&child) = shape.proto_transitions.get(&link) {
            return child;
        }
        let child = Shape {
            id: ShapeId(0),
            parent: Some(id),
            proto: link,
            class: shape.class,
            properties: shape.properties.clone(),
            index: shape.index.clone(),
            transitions: FxHashMap::default(),
            proto_transitions: FxHashMap::default(),
            dictionary: false,
            slot_count: shape.slot_count,
        };
        let child_id = self.alloc(child);
        self.shapes[id.0 as usize].proto_transitions.insert(link, child_id);
        child_id
    }

    fn owned_dictionary(&mut self, id: ShapeId) -> (Option<ShapeId>, Shape) {
        if self.get(id).dictionary {
            (Some(id), self.get(id).clone())
        } else {
            (None, self.to_dictionary(id))
        }
    }

    fn store_dictionary(&mut self, target: Option<ShapeId>, shape: Shape) -> ShapeId {
        match target {
            Some(id) => {
                self.shapes[id.0 as usize] = Shape { id, ..shape };
                id
            }
            None => self.alloc(shape),
        }
    }

    /// Counters for diagnostics
    pub fn stats(&self) -> ShapeTableStats {
        ShapeTableStats {
            shapes: self.shapes.len(),
            dictionary_shapes: self.shapes.iter().filter(|s| s.dictionary).count(),
            transitions: self
                .shapes
                .iter()
                .map(|s| s.transitions.len() + s.proto_transitions.len())
                .sum(),
            poly_proto_prototypes: self.poly_protos.len(),
            dictionary_conversions: self.dictionary_conversions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PropertyKey {
        PropertyKey::from_str(s)
    }

    #[test]
    fn same_definitions_converge() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        let a = table.add_property(root, key("x"), PropertyAttributes::DEFAULT);
        let a = table.add_property(a, key("y"), PropertyAttributes::DEFAULT);
        let b = table.add_property(root, key("x"), PropertyAttributes::DEFAULT);
        let b = table.add_property(b, key("y"), PropertyAttributes::DEFAULT);
        assert_eq!(a, b);
        assert_eq!(table.lookup(a, &key("y")).map(|p| p.slot), Some(1));
    }

    #[test]
    fn attributes_are_part_of_the_edge() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        let a = table.add_property(root, key("x"), PropertyAttributes::DEFAULT);
        let b = table.add_property(root, key("x"), PropertyAttributes::ENUMERABLE);
        assert_ne!(a, b);
    }

    #[test]
    fn delete_goes_to_dictionary_and_keeps_slots() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        let s = table.add_property(root, key("a"), PropertyAttributes::DEFAULT);
        let s = table.add_property(s, key("b"), PropertyAttributes::DEFAULT);
        let d = table.remove_property(s, &key("a"));
        assert_ne!(d, s);
        assert!(table.get(d).is_dictionary());
        assert!(table.lookup(d, &key("a")).is_none());
        assert_eq!(table.lookup(d, &key("b")).map(|p| p.slot), Some(1));
        assert!(table.lookup(s, &key("a")).is_some());

        // Dictionary shapes mutate in place
        let d2 = table.add_property(d, key("c"), PropertyAttributes::DEFAULT);
        assert_eq!(d, d2);
        assert_eq!(table.lookup(d, &key("c")).map(|p| p.slot), Some(2));
    }

    #[test]
    fn reconfigure_never_reuses_shared_shape() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        let s = table.add_property(root, key("a"), PropertyAttributes::DEFAULT);
        let r = table.reconfigure_property(s, &key("a"), PropertyAttributes::ENUMERABLE);
        assert_ne!(r, s);
        assert_eq!(
            table.lookup(r, &key("a")).map(|p| p.attributes),
            Some(PropertyAttributes::ENUMERABLE)
        );
        assert_eq!(
            table.lookup(s, &key("a")).map(|p| p.attributes),
            Some(PropertyAttributes::DEFAULT)
        );
    }

    #[test]
    fn too_many_transitions_fall_back_to_dictionary() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        for i in 0..MAX_TRANSITIONS_PER_SHAPE {
            let s = table.add_property(root, key(&format!("p{i}")), PropertyAttributes::DEFAULT);
            assert!(!table.get(s).is_dictionary());
        }
        let s = table.add_property(root, key("overflow"), PropertyAttributes::DEFAULT);
        assert!(table.get(s).is_dictionary());
    }

    #[test]
    fn many_shapes_on_one_prototype_switch_to_poly_proto() {
        let mut table = ShapeTable::new();
        let proto = ObjectId(7);
        let root = table.root(ObjectClass::Ordinary, Some(proto));
        let mut shape = root;
        for i in 0..MAX_SHAPES_PER_PROTOTYPE {
            shape = table.add_property(shape, key(&format!("f{i}")), PropertyAttributes::DEFAULT);
        }
        assert!(table.is_poly_proto(proto));
        let poly_root = table.root(ObjectClass::Ordinary, Some(proto));
        assert_ne!(poly_root, root);
        assert_eq!(table.get(poly_root).proto(), ProtoLink::PolyProto);
        assert_eq!(table.stats().poly_proto_prototypes, 1);
    }

    #[test]
    fn prototype_transitions_are_shared_then_poly() {
        let mut table = ShapeTable::new();
        let root = table.root(ObjectClass::Ordinary, None);
        let a = table.set_prototype(root, Some(ObjectId(1)));
        let b = table.set_prototype(root, Some(ObjectId(1)));
        assert_eq!(a, b);
        assert_eq!(table.get(a).proto(), ProtoLink::Object(ObjectId(1)));

        for i in 2..=(MAX_PROTOTYPE_TRANSITIONS as u32) {
            table.set_prototype(root, Some(ObjectId(i)));
        }
        let poly = table.set_prototype(root, Some(ObjectId(100)));
        assert_eq!(table.get(poly).proto(), ProtoLink::PolyProto);
    }

    #[test]
    fn array_index_keys_are_canonical() {
        assert_eq!(key("0"), PropertyKey::Index(0));
        assert_eq!(key("42"), PropertyKey::Index(42));
        assert!(matches!(key("042"), PropertyKey::String(_)));
        assert!(matches!(key("4294967295"), PropertyKey::String(_)));
        assert!(matches!(key("-1"), PropertyKey::String(_)));
    }
}
