//! JavaScript value representation
//!
//! A Rust enum whose discriminant is the type tag. Numeric and reference
//! variants never alias, and object references are arena handles
//! ([`ObjectId`]), so a relocating collector only has to remap handles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use num_bigint::BigInt;
use tern_vm_bytecode::ValueKinds;

/// Handle of an object in the [`Heap`](crate::heap::Heap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    /// Arena index
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// Symbol or private name
#[derive(Debug)]
pub struct Symbol {
    id: u64,
    description: Option<Arc<str>>,
    private: bool,
}

impl Symbol {
    /// New unique symbol
    pub fn new(description: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.map(Arc::from),
            private: false,
        })
    }

    /// New private name (`#field`)
    pub fn private(description: &str) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: Some(Arc::from(description)),
            private: true,
        })
    }

    /// Unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether this is a private name
    pub fn is_private(&self) -> bool {
        self.private
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.description, self.private) {
            (Some(d), true) => write!(f, "#{d}"),
            (Some(d), false) => write!(f, "Symbol({d})"),
            (None, _) => f.write_str("Symbol()"),
        }
    }
}

/// A JavaScript value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Number that fits an int32 (never `-0`)
    Int32(i32),
    /// Any other number
    Double(f64),
    /// String
    String(Arc<str>),
    /// Symbol or private name
    Symbol(Arc<Symbol>),
    /// Arbitrary precision integer
    BigInt(Arc<BigInt>),
    /// Object reference
    Object(ObjectId),
    /// Uninitialized binding; never visible to scripts
    Empty,
}

impl Value {
    /// Create a number, using `Int32` when the value is integral and in range
    #[inline]
    pub fn number(n: f64) -> Self {
        let i = n as i32;
        if i as f64 == n && !(i == 0 && n.is_sign_negative()) {
            Self::Int32(i)
        } else {
            Self::Double(n)
        }
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Create a BigInt value
    pub fn bigint(n: BigInt) -> Self {
        Self::BigInt(Arc::new(n))
    }

    /// `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Int32 or Double
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int32(_) | Self::Double(_))
    }

    /// Object reference
    #[inline]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Int32 payload
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Self::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric payload of a Number
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int32(n) => Some(*n as f64),
            Self::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Kind bit for profiling
    pub fn kind(&self) -> ValueKinds {
        match self {
            Self::Undefined => ValueKinds::UNDEFINED,
            Self::Null => ValueKinds::NULL,
            Self::Boolean(_) => ValueKinds::BOOLEAN,
            Self::Int32(_) => ValueKinds::INT32,
            Self::Double(_) => ValueKinds::DOUBLE,
            Self::String(_) => ValueKinds::STRING,
            Self::Symbol(_) => ValueKinds::SYMBOL,
            Self::BigInt(_) => ValueKinds::BIGINT,
            Self::Object(_) => ValueKinds::OBJECT,
            Self::Empty => ValueKinds::EMPTY,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int32(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_normalizes_integral_doubles() {
        assert_eq!(Value::number(3.0), Value::Int32(3));
        assert_eq!(Value::number(-7.0), Value::Int32(-7));
        assert!(matches!(Value::number(0.5), Value::Double(_)));
        assert!(matches!(Value::number(2147483648.0), Value::Double(_)));
        assert!(matches!(Value::number(f64::NAN), Value::Double(_)));
    }

    #[test]
    fn negative_zero_stays_double() {
        match Value::number(-0.0) {
            Value::Double(d) => assert!(d == 0.0 && d.is_sign_negative()),
            other => panic!("expected -0, got {other:?}"),
        }
    }

    #[test]
    fn symbols_compare_by_identity() {
        let a = Symbol::new(Some("x"));
        let b = Symbol::new(Some("x"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(Symbol::private("secret").to_string(), "#secret");
    }

    #[test]
    fn kinds() {
        assert_eq!(Value::Int32(1).kind(), ValueKinds::INT32);
        assert_eq!(Value::Empty.kind(), ValueKinds::EMPTY);
    }
}
