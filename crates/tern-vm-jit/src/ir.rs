//! Speculative operation list produced by the optimizing compiler.
//!
//! Compiled frames use their own slot numbering. `CompiledCode::slot_map`
//! maps every baseline frame slot (locals first, then registers) to its
//! compiled slot, or to `None` when the compiled code never materializes it.

use smallvec::SmallVec;

use crate::bailout::BailoutReason;

/// Index of a slot in a compiled frame
pub type Slot = u16;

/// Index into [`CompiledCode::exits`]
pub type ExitId = u32;

/// Constant folded into an operand instead of being stored in a slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Int32 immediate
    Int32(i32),
    /// Entry of the module constant pool
    Pool(u32),
    /// Uninitialized binding sentinel
    Empty,
}

/// Input of a speculative op
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Read a compiled slot
    Slot(Slot),
    /// Use a folded constant
    Const(ConstValue),
}

/// Int32 operation guarded on int32 inputs and an int32 result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int32Op {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
}

/// Number operation guarded on numeric inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

/// Comparison on speculated numeric inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `===` (and `==` when both sides are numbers)
    Eq,
    /// `!==` (and `!=` when both sides are numbers)
    Ne,
}

/// One operation of compiled code
#[derive(Debug, Clone, PartialEq)]
pub enum SpecOp {
    /// `dst = src`
    Move {
        /// Destination
        dst: Slot,
        /// Source
        src: Operand,
    },
    /// Int32 binary op; exits on non-int32 input or result
    Int32Binary {
        /// Operation
        op: Int32Op,
        /// Destination
        dst: Slot,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// `-x` on int32; exits on `0` and `i32::MIN`
    Int32Negate {
        /// Destination
        dst: Slot,
        /// Operand
        src: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Number binary op; exits on non-number input
    NumberBinary {
        /// Operation
        op: NumberOp,
        /// Destination
        dst: Slot,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Int32 comparison producing a boolean
    Int32Compare {
        /// Comparison
        op: CompareOp,
        /// Destination
        dst: Slot,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Number comparison producing a boolean
    NumberCompare {
        /// Comparison
        op: CompareOp,
        /// Destination
        dst: Slot,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Jump to `target` when the truthiness of `cond` equals `when`
    Branch {
        /// Condition
        cond: Operand,
        /// Truthiness that takes the jump
        when: bool,
        /// Op index
        target: usize,
    },
    /// Exit unless the truthiness of `cond` equals `expected`
    SpeculateBranch {
        /// Condition
        cond: Operand,
        /// Truthiness seen while profiling
        expected: bool,
        /// Guard exit
        exit: ExitId,
    },
    /// Unconditional jump
    Jump {
        /// Op index
        target: usize,
    },
    /// Loop header (OSR entry and safepoint)
    LoopHeader {
        /// Bytecode offset of the `LoopHint`
        bytecode_pc: usize,
    },
    /// Monomorphic own data load
    GetOwnProperty {
        /// Destination
        dst: Slot,
        /// Receiver
        obj: Slot,
        /// Guarded shape id
        shape: u32,
        /// Data slot
        slot: u32,
        /// Guard exit
        exit: ExitId,
    },
    /// Polymorphic own data load
    GetPolymorphicProperty {
        /// Destination
        dst: Slot,
        /// Receiver
        obj: Slot,
        /// `(shape, slot)` cases in site order
        cases: SmallVec<[(u32, u32); 4]>,
        /// Guard exit
        exit: ExitId,
    },
    /// Monomorphic store to an existing writable own data slot
    SetOwnProperty {
        /// Receiver
        obj: Slot,
        /// Guarded shape id
        shape: u32,
        /// Data slot
        slot: u32,
        /// Stored value
        value: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// `arguments.length` without an arguments object
    ArgumentsLength {
        /// Destination
        dst: Slot,
    },
    /// `arguments[i]` without an arguments object; exits when out of bounds
    ArgumentsElement {
        /// Destination
        dst: Slot,
        /// Index
        index: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Typed array element load on a fixed-length view
    TypedArrayLoad {
        /// Destination
        dst: Slot,
        /// Typed array
        array: Slot,
        /// Index
        index: Operand,
        /// Guard exit
        exit: ExitId,
    },
    /// Exit if the binding still holds the uninitialized sentinel
    CheckInitialized {
        /// Binding slot
        slot: Slot,
        /// Guard exit
        exit: ExitId,
    },
    /// Execute the bytecode instruction at `pc` with baseline semantics
    Generic {
        /// Bytecode offset
        pc: usize,
    },
    /// Return from the function
    Return {
        /// Returned value
        value: Operand,
    },
    /// Unconditional exit
    Exit {
        /// Exit site
        exit: ExitId,
    },
}

/// How a baseline slot missing from the compiled frame is rebuilt on exit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recovery {
    /// Slot holds a constant that was never stored
    Constant(ConstValue),
    /// Slot holds an arguments object that was never allocated
    ArgumentsObject,
}

/// Deoptimization metadata for one guard
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSite {
    /// Bytecode offset the baseline tier resumes at
    pub bytecode_pc: usize,
    /// Reason reported when the exit is unconditional
    pub reason: BailoutReason,
    /// Baseline slots to rebuild, as `(baseline slot, recovery)`
    pub recoveries: Vec<(u32, Recovery)>,
}

/// Loop header where a baseline frame may enter compiled code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsrEntry {
    /// Bytecode offset of the `LoopHint`
    pub bytecode_pc: usize,
    /// First op executed after entry
    pub op_index: usize,
}

/// Output of the optimizing compiler
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCode {
    /// Function name, for logs
    pub name: String,
    /// Baseline frame size this code was compiled against
    pub baseline_slots: usize,
    /// Baseline slot -> compiled slot
    pub slot_map: Vec<Option<Slot>>,
    /// Compiled frame size
    pub slot_count: usize,
    /// Operations
    pub ops: Vec<SpecOp>,
    /// Exit sites, indexed by [`ExitId`]
    pub exits: Vec<ExitSite>,
    /// OSR entries, ordered by bytecode offset
    pub osr_entries: Vec<OsrEntry>,
    /// Baseline slot of the elided arguments object, if any
    pub elided_arguments: Option<u32>,
    /// Number of speculative ops (everything but `Generic`/`Move`/control)
    pub speculated_ops: usize,
}

impl CompiledCode {
    /// OSR entry for the loop header at `pc`
    pub fn osr_entry(&self, pc: usize) -> Option<&OsrEntry> {
        self.osr_entries.iter().find(|entry| entry.bytecode_pc == pc)
    }

    /// Exit site by id
    #[inline]
    pub fn exit(&self, id: ExitId) -> Option<&ExitSite> {
        self.exits.get(id as usize)
    }

    /// Compiled slot for a baseline slot
    #[inline]
    pub fn compiled_slot(&self, baseline: usize) -> Option<Slot> {
        self.slot_map.get(baseline).copied().flatten()
    }
}
