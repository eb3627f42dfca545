//! Bytecode operands
//!
//! Registers and locals share one frame: slot `local_count + r` holds
//! register `r`, which is what lets OSR move an activation slot by slot.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! index_operand {
    ($(#[$doc:meta])* $name:ident($repr:ty), $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            /// Wrap a raw index
            #[inline]
            pub const fn new(index: $repr) -> Self {
                Self(index)
            }

            /// Raw index
            #[inline]
            pub const fn index(self) -> $repr {
                self.0
            }
        }

        impl From<$repr> for $name {
            fn from(index: $repr) -> Self {
                Self(index)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_operand!(
    /// Virtual register
    Register(u16),
    "r"
);
index_operand!(
    /// Parameter or declared local
    LocalIndex(u16),
    "l"
);
index_operand!(
    /// Entry of the module constant pool
    ConstantIndex(u32),
    "k"
);
index_operand!(
    /// Entry of the module function table
    FunctionIndex(u32),
    "f"
);

impl Register {
    /// Register `n` places after this one (argument windows)
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0 + n)
    }
}

/// Jump distance, relative to the jumping instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Wrap a raw distance
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Raw distance
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Absolute target of a jump at `pc`; `None` when it would land before 0
    #[inline]
    pub fn target_from(self, pc: usize) -> Option<usize> {
        usize::try_from(pc as i64 + i64::from(self.0)).ok()
    }
}

impl fmt::Display for JumpOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}
