//! Heap objects
//!
//! Every object has a shape and a slot vector; what it can do beyond
//! ordinary property storage is decided by a closed [`ObjectKind`] enum.

use std::fmt;
use std::sync::Arc;

use tern_vm_bytecode::{ElementKind, Module};

use crate::error::{ErrorKind, VmResult};
use crate::generator::GeneratorData;
use crate::realm::RealmId;
use crate::shape::{ObjectClass, ShapeId};
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Contents of one property slot
#[derive(Debug, Clone, PartialEq)]
pub enum PropertySlot {
    /// Data property value
    Data(Value),
    /// Accessor pair; `Undefined` for a missing half
    Accessor {
        /// Getter
        get: Value,
        /// Setter
        set: Value,
    },
}

impl Default for PropertySlot {
    fn default() -> Self {
        Self::Data(Value::Undefined)
    }
}

/// Host function signature: `(vm, this, args)`
pub type NativeFn = Arc<dyn Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// Callable payload
#[derive(Clone)]
pub enum FunctionKind {
    /// Bytecode function
    Closure {
        /// Owning module
        module: Arc<Module>,
        /// Index in the module's function table
        index: u32,
        /// Realm the closure was created in
        realm: RealmId,
    },
    /// Host function
    Native {
        /// Name, for diagnostics
        name: Arc<str>,
        /// Implementation
        func: NativeFn,
        /// Realm the function belongs to
        realm: RealmId,
    },
}

impl FunctionKind {
    /// Realm of the function
    pub fn realm(&self) -> RealmId {
        match self {
            Self::Closure { realm, .. } | Self::Native { realm, .. } => *realm,
        }
    }
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closure { module, index, realm } => f
                .debug_struct("Closure")
                .field("module", &module.module_id)
                .field("index", index)
                .field("realm", realm)
                .finish(),
            Self::Native { name, realm, .. } => f
                .debug_struct("Native")
                .field("name", name)
                .field("realm", realm)
                .finish(),
        }
    }
}

/// Element type of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    /// `Int8Array`
    Int8,
    /// `Uint8Array`
    Uint8,
    /// `Uint8ClampedArray`
    Uint8Clamped,
    /// `Int16Array`
    Int16,
    /// `Uint16Array`
    Uint16,
    /// `Int32Array`
    Int32,
    /// `Uint32Array`
    Uint32,
    /// `Float32Array`
    Float32,
    /// `Float64Array`
    Float64,
}

impl TypedArrayKind {
    /// Every kind, in intrinsic table order
    pub const ALL: [TypedArrayKind; 9] = [
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
    ];

    /// Bytes per element
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Constructor name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }

    /// Position in the realm's intrinsic prototype table
    pub const fn table_index(self) -> usize {
        self as usize
    }
}

/// ArrayBuffer storage
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBufferData {
    /// Bytes
    pub bytes: Vec<u8>,
    /// Maximum length for resizable buffers
    pub max_byte_length: Option<usize>,
    /// Detached buffers have no bytes
    pub detached: bool,
}

impl ArrayBufferData {
    /// Whether `resize` is allowed
    #[inline]
    pub fn is_resizable(&self) -> bool {
        self.max_byte_length.is_some()
    }
}

/// Typed array view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedArrayData {
    /// Element type
    pub kind: TypedArrayKind,
    /// Viewed ArrayBuffer
    pub buffer: ObjectId,
    /// Offset into the buffer
    pub byte_offset: usize,
    /// Fixed element count; `None` tracks the buffer length
    pub length: Option<usize>,
}

/// Proxy internal slots; both `None` once revoked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyData {
    /// `[[ProxyTarget]]`
    pub target: Option<ObjectId>,
    /// `[[ProxyHandler]]`
    pub handler: Option<ObjectId>,
}

/// Exotic behaviour of an object
#[derive(Debug)]
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Dense array; `length` is virtual
    Array(Vec<Value>),
    /// Callable
    Function(FunctionKind),
    /// Unmapped arguments object; elements live here, `length` is an own property
    Arguments(Vec<Value>),
    /// ArrayBuffer
    ArrayBuffer(ArrayBufferData),
    /// Typed array view
    TypedArray(TypedArrayData),
    /// Proxy
    Proxy(ProxyData),
    /// Generator object
    Generator(Box<GeneratorData>),
    /// Error instance
    Error(ErrorKind),
}

impl ObjectKind {
    /// Shape class for this kind
    pub fn class(&self) -> ObjectClass {
        match self {
            Self::Ordinary => ObjectClass::Ordinary,
            Self::Array(_) => ObjectClass::Array,
            Self::Function(_) => ObjectClass::Function,
            Self::Arguments(_) => ObjectClass::Arguments,
            Self::ArrayBuffer(_) => ObjectClass::ArrayBuffer,
            Self::TypedArray(_) => ObjectClass::TypedArray,
            Self::Proxy(_) => ObjectClass::Proxy,
            Self::Generator(_) => ObjectClass::Generator,
            Self::Error(_) => ObjectClass::Error,
        }
    }
}

/// A heap object
#[derive(Debug)]
pub struct JsObject {
    /// Current shape
    pub shape: ShapeId,
    /// `[[Prototype]]`; authoritative even when the shape is poly-proto
    pub proto: Option<ObjectId>,
    /// Property storage indexed by shape slot
    pub slots: Vec<PropertySlot>,
    /// Exotic behaviour
    pub kind: ObjectKind,
    /// `[[Extensible]]`
    pub extensible: bool,
    /// Some object links to this one as its prototype
    pub is_prototype: bool,
}

impl JsObject {
    /// Whether the object is callable
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Whether the object is a Proxy (revoked or not)
    #[inline]
    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, ObjectKind::Proxy(_))
    }

    /// Element receiver category for profiling
    pub fn element_kind(&self, buffer_resizable: bool) -> ElementKind {
        match &self.kind {
            ObjectKind::TypedArray(view) if view.length.is_some() && !buffer_resizable => {
                ElementKind::TypedArray
            }
            ObjectKind::TypedArray(_) => ElementKind::ResizableTypedArray,
            ObjectKind::Arguments(_) => ElementKind::Arguments,
            ObjectKind::Array(_) => ElementKind::Array,
            _ => ElementKind::Other,
        }
    }

    /// Slot contents, padding missing slots with `undefined`
    pub(crate) fn slot(&self, slot: u32) -> PropertySlot {
        self.slots.get(slot as usize).cloned().unwrap_or_default()
    }

    pub(crate) fn set_slot(&mut self, slot: u32, value: PropertySlot) {
        let index = slot as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, PropertySlot::default);
        }
        self.slots[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        assert_eq!(TypedArrayKind::Float64.element_size(), 8);
        assert_eq!(TypedArrayKind::Uint8Clamped.element_size(), 1);
        assert_eq!(TypedArrayKind::ALL[TypedArrayKind::Int32.table_index()], TypedArrayKind::Int32);
    }

    #[test]
    fn slots_grow_on_write() {
        let mut obj = JsObject {
            shape: ShapeId(0),
            proto: None,
            slots: Vec::new(),
            kind: ObjectKind::Ordinary,
            extensible: true,
            is_prototype: false,
        };
        obj.set_slot(2, PropertySlot::Data(Value::Int32(5)));
        assert_eq!(obj.slots.len(), 3);
        assert_eq!(obj.slot(0), PropertySlot::Data(Value::Undefined));
        assert_eq!(obj.slot(2), PropertySlot::Data(Value::Int32(5)));
    }

    #[test]
    fn typed_array_element_kind_tracks_resizability() {
        let view = TypedArrayData {
            kind: TypedArrayKind::Uint8,
            buffer: ObjectId(0),
            byte_offset: 0,
            length: Some(4),
        };
        let obj = JsObject {
            shape: ShapeId(0),
            proto: None,
            slots: Vec::new(),
            kind: ObjectKind::TypedArray(view),
            extensible: true,
            is_prototype: false,
        };
        assert_eq!(obj.element_kind(false), ElementKind::TypedArray);
        assert_eq!(obj.element_kind(true), ElementKind::ResizableTypedArray);
    }
}
