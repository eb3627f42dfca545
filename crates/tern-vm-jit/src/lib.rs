//! # Tern VM JIT
//!
//! Optimizing tier for hot bytecode functions.
//!
//! The compiler reads a function together with a snapshot of its profiling
//! data and lowers it into a list of speculative operations. Every
//! speculation is paired with an exit site describing how to rebuild the
//! baseline frame at the bytecode offset where the guard sits. The crate has
//! no runtime types of its own: executing [`CompiledCode`] is the job of the
//! VM core.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bailout;
pub mod compiler;
pub mod ir;
pub mod speculation;
pub mod translator;

pub use bailout::{BailoutReason, DEOPT_THRESHOLD, SITE_DEOPT_LIMIT};
pub use compiler::{JitError, OptimizingCompiler};
pub use ir::{
    CompareOp, CompiledCode, ConstValue, ExitId, ExitSite, Int32Op, NumberOp, Operand, OsrEntry,
    Recovery, Slot, SpecOp,
};
pub use translator::can_translate_function;
