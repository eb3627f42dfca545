//! # Tern VM Core
//!
//! Execution engine of the Tern JavaScript VM: values, shapes, inline
//! caches, the baseline interpreter and the executor for optimized code.
//!
//! ## Design Principles
//!
//! - **One semantics, two tiers**: optimized code runs speculative ops and
//!   falls back to the interpreter's own instruction semantics for
//!   everything it does not specialize
//! - **Hidden classes**: objects share shapes through an append-only
//!   transition tree; inline caches guard on shape identity
//! - **Exact deoptimization**: every guard names an exit that rebuilds the
//!   baseline frame the interpreter would have had at that offset
//! - **Arena handles**: objects live in a heap arena and are addressed by
//!   [`ObjectId`], so no `unsafe` is needed

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod arguments;
pub mod context;
pub mod convert;
mod deopt;
pub mod engine;
pub mod error;
pub mod generator;
pub mod heap;
pub mod ic;
pub mod interpreter;
mod jit_runtime;
pub mod object;
pub mod operations;
mod osr;
pub mod property;
pub mod proxy;
pub mod realm;
pub mod safepoint;
pub mod shape;
pub mod typed_array;
pub mod value;
pub mod vm;

pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{EngineException, ErrorKind, VmError, VmResult};
pub use generator::{GeneratorState, IteratorStep};
pub use object::TypedArrayKind;
pub use property::PropertyDescriptor;
pub use realm::RealmId;
pub use safepoint::{Safepoint, SafepointHook, SafepointKind};
pub use shape::{PropertyAttributes, PropertyKey, ShapeId};
pub use value::{ObjectId, Value};
pub use vm::Vm;

pub use tern_vm_exec::{ForcedTier, TierConfig, TierState};
