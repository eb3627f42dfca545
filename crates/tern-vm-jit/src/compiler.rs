//! Optimizing compiler entry point.

use rustc_hash::FxHashSet;
use tern_vm_bytecode::feedback::FeedbackSnapshot;
use tern_vm_bytecode::{ConstantPool, Function};

use crate::ir::CompiledCode;
use crate::translator::translate_function;

/// Errors produced while compiling a function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    /// Function can never be compiled by the optimizing tier.
    #[error("function is not eligible for optimization: {reason}")]
    NotEligible {
        /// Short description
        reason: &'static str,
    },

    /// Jump target is outside the bytecode function bounds.
    #[error("invalid jump target from pc {pc} with offset {offset} (len={instruction_count})")]
    InvalidJumpTarget {
        /// Jumping instruction
        pc: usize,
        /// Relative offset
        offset: i32,
        /// Function length
        instruction_count: usize,
    },

    /// A frame slot was used without being assigned a compiled slot.
    #[error("baseline slot {slot} has no compiled slot")]
    UnmappedSlot {
        /// Baseline slot
        slot: usize,
    },

    /// A jump targets an instruction that produced no ops.
    #[error("jump target pc {pc} was not lowered")]
    UnboundTarget {
        /// Target bytecode offset
        pc: usize,
    },
}

impl JitError {
    /// Whether retrying later (with more feedback) cannot help
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotEligible { .. })
    }
}

/// Default size limit for optimized functions, in instructions
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 20_000;

/// Optimizing compiler.
///
/// Stateless apart from its limits; one instance is shared by the
/// synchronous path and the background worker.
#[derive(Debug, Clone)]
pub struct OptimizingCompiler {
    max_instructions: usize,
}

impl Default for OptimizingCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizingCompiler {
    /// Create a compiler with default limits
    pub fn new() -> Self {
        Self {
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
        }
    }

    /// Refuse functions longer than `limit` instructions
    pub fn with_max_instructions(mut self, limit: usize) -> Self {
        self.max_instructions = limit;
        self
    }

    /// Compile `function` against a feedback snapshot.
    ///
    /// `pessimized` lists bytecode offsets whose guards failed too often;
    /// they are lowered generically.
    pub fn compile(
        &self,
        function: &Function,
        constants: &ConstantPool,
        feedback: &FeedbackSnapshot,
        pessimized: &FxHashSet<u32>,
    ) -> Result<CompiledCode, JitError> {
        if function.instructions.len() > self.max_instructions {
            return Err(JitError::NotEligible {
                reason: "function too large",
            });
        }
        translate_function(function, constants, feedback, pessimized)
    }
}
