//! Bytecode errors

use thiserror::Error;

/// Errors found while validating a bytecode function
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BytecodeError {
    /// A register operand is outside the function's register file
    #[error("Register r{register} out of range at pc {pc} (register_count = {count})")]
    RegisterOutOfRange {
        /// Offending instruction
        pc: usize,
        /// Register index
        register: u16,
        /// Declared register count
        count: u16,
    },

    /// A local operand is outside the function's locals
    #[error("Local {local} out of range at pc {pc} (local_count = {count})")]
    LocalOutOfRange {
        /// Offending instruction
        pc: usize,
        /// Local index
        local: u16,
        /// Declared local count
        count: u16,
    },

    /// A jump lands outside the instruction stream
    #[error("Invalid jump target from pc {pc} (offset {offset})")]
    InvalidJumpTarget {
        /// Jumping instruction
        pc: usize,
        /// Relative offset
        offset: i32,
    },

    /// An instruction names a constant the module does not have
    #[error("Constant k{constant} out of range in function {function} at pc {pc} ({count} constants)")]
    ConstantOutOfRange {
        /// Function index in the module
        function: u32,
        /// Offending instruction
        pc: usize,
        /// Constant index
        constant: u32,
        /// Pool size
        count: usize,
    },

    /// A closure or the entry point names a function the module does not have
    #[error("Function f{index} out of range ({count} functions)")]
    FunctionOutOfRange {
        /// Function index
        index: u32,
        /// Function table size
        count: usize,
    },

    /// Parameters do not fit in the declared locals
    #[error("Function declares {params} parameters but only {locals} locals")]
    ParamsExceedLocals {
        /// Parameter count
        params: u8,
        /// Local count
        locals: u16,
    },
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
