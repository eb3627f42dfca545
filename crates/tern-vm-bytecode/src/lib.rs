//! # Tern VM Bytecode
//!
//! This crate defines the instruction stream consumed by the Tern execution
//! tiers, together with the per-instruction profiling storage both tiers share.
//!
//! ## Design Principles
//!
//! - **Registers, not a stack**: operands name frame slots directly
//! - **Tier-neutral**: The same instructions drive the baseline interpreter
//!   and are the input of the optimizing compiler
//! - **Profiled in place**: Every function owns a feedback vector indexed by
//!   instruction offset (execution counts, observed kinds, inline caches)

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod error;
pub mod feedback;
pub mod function;
pub mod instruction;
pub mod module;
pub mod operand;

pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use feedback::{
    ElementKind, FeedbackSnapshot, FeedbackVector, IcAction, IcEntry, IcRecordOutcome, InlineCacheState,
    ProfiledSite, ValueKinds,
};
pub use function::{Function, FunctionBuilder, FunctionFlags, Label};
pub use instruction::{Instruction, Opcode};
pub use module::{Module, ModuleBuilder};
pub use operand::{ConstantIndex, FunctionIndex, JumpOffset, LocalIndex, Register};

