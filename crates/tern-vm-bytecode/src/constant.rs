//! Module constants
//!
//! Strings double as property names for `GetPropConst`/`SetPropConst` and
//! `GetGlobal`, so a pool never stores the same literal twice.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Literal stored in a module's pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// Number literal
    Number(f64),
    /// String literal or property name
    String(Box<str>),
    /// Decimal digits of a BigInt literal, without the `n` suffix
    BigInt(Box<str>),
}

impl Constant {
    /// Numeric payload
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    /// String payload
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn key(&self) -> PoolKey {
        match self {
            // Bit pattern, so `0` and `-0` (and NaN payloads) stay apart
            Self::Number(n) => PoolKey::Number(n.to_bits()),
            Self::String(s) => PoolKey::String(s.clone()),
            Self::BigInt(digits) => PoolKey::BigInt(digits.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Number(u64),
    String(Box<str>),
    BigInt(Box<str>),
}

/// Deduplicating constant storage, indexed by `ConstantIndex`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    /// Rebuilt on demand after deserialization
    #[serde(skip)]
    index: FxHashMap<PoolKey, u32>,
}

impl ConstantPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `constant`, returning its index
    pub fn add(&mut self, constant: Constant) -> u32 {
        if self.index.len() != self.constants.len() {
            self.reindex();
        }
        let next = self.constants.len() as u32;
        let slot = *self.index.entry(constant.key()).or_insert(next);
        if slot == next {
            self.constants.push(constant);
        }
        slot
    }

    fn reindex(&mut self) {
        self.index = self
            .constants
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key(), i as u32))
            .collect();
    }

    /// Intern a number
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.add(Constant::Number(n))
    }

    /// Intern a string
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.add(Constant::String(s.into()))
    }

    /// Intern BigInt digits; they are parsed when the constant is loaded
    pub fn add_bigint(&mut self, digits: &str) -> u32 {
        self.add(Constant::BigInt(digits.into()))
    }

    /// Entry at `index`
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}
