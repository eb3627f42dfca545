//! Instructions
//!
//! Operands are frame slots: `dst` receives the result, `lhs`/`rhs`/`src`
//! are read. Jumps are relative to their own pc. Property and global
//! instructions name their key through the constant pool and carry an
//! inline cache in the function's feedback vector. `LoopHint` heads every
//! loop; it is where back edges are counted and OSR may enter.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::operand::{ConstantIndex, FunctionIndex, JumpOffset, LocalIndex, Register};

macro_rules! opcodes {
    ($($name:ident = $byte:literal,)*) => {
        /// Operand-free tag of an [`Instruction`], for tracing and disassembly
        ///
        /// The high nibble groups related instructions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            /// Encoded byte
            #[inline]
            pub fn to_byte(self) -> u8 {
                self as u8
            }

            /// Mnemonic
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    LoadUndefined = 0x00, LoadNull = 0x01, LoadTrue = 0x02, LoadFalse = 0x03, LoadInt32 = 0x05,
    LoadConst = 0x06,
    GetLocal = 0x10, SetLocal = 0x11, GetLocalChecked = 0x12, ClearLocal = 0x13, GetGlobal = 0x14,
    SetGlobal = 0x15, LoadThis = 0x16,
    Add = 0x20, Sub = 0x21, Mul = 0x22, Div = 0x23, Mod = 0x24, Pow = 0x25, Neg = 0x26, Inc = 0x27,
    Dec = 0x28,
    BitAnd = 0x30, BitOr = 0x31, BitXor = 0x32, BitNot = 0x33, Shl = 0x34, Shr = 0x35, Ushr = 0x36,
    Eq = 0x40, StrictEq = 0x41, Ne = 0x42, StrictNe = 0x43, Lt = 0x44, Le = 0x45, Gt = 0x46,
    Ge = 0x47,
    Not = 0x50, TypeOf = 0x58,
    NewObject = 0x60, NewObjectWithProto = 0x61, GetPropConst = 0x62, SetPropConst = 0x63,
    GetProp = 0x64, SetProp = 0x65, DeleteProp = 0x66, DefineField = 0x67, DefineGetter = 0x68,
    DefineSetter = 0x69, SetPrototype = 0x6A, NewPrivateName = 0x6B,
    NewArray = 0x70, ArrayPush = 0x71,
    Closure = 0x80, Call = 0x81, CallMethod = 0x82, CreateArguments = 0x83, Return = 0x85,
    ReturnUndefined = 0x86,
    Jump = 0x90, JumpIfTrue = 0x91, JumpIfFalse = 0x92, LoopHint = 0x93,
    TryStart = 0xA0, TryEnd = 0xA1, Throw = 0xA2, Catch = 0xA3,
    Yield = 0xD0,
    Move = 0xE0, Nop = 0xE1, ForceOsrExit = 0xE2,
}

/// Attribute bits carried by [`Instruction::DefineField`]
pub mod field_attrs {
    /// `[[Writable]]`
    pub const WRITABLE: u8 = 0b001;
    /// `[[Enumerable]]`
    pub const ENUMERABLE: u8 = 0b010;
    /// `[[Configurable]]`
    pub const CONFIGURABLE: u8 = 0b100;
    /// Plain assignment defaults
    pub const DEFAULT: u8 = WRITABLE | ENUMERABLE | CONFIGURABLE;
}

/// A decoded instruction with its operands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Instruction {
    // Constants
    LoadUndefined { dst: Register },
    LoadNull { dst: Register },
    LoadTrue { dst: Register },
    LoadFalse { dst: Register },
    LoadInt32 { dst: Register, value: i32 },
    LoadConst { dst: Register, idx: ConstantIndex },

    // Variables
    GetLocal { dst: Register, idx: LocalIndex },
    SetLocal { idx: LocalIndex, src: Register },
    GetLocalChecked { dst: Register, idx: LocalIndex, name: ConstantIndex },
    ClearLocal { idx: LocalIndex },
    GetGlobal { dst: Register, name: ConstantIndex },
    SetGlobal { name: ConstantIndex, src: Register },
    LoadThis { dst: Register },

    // Arithmetic
    Add { dst: Register, lhs: Register, rhs: Register },
    Sub { dst: Register, lhs: Register, rhs: Register },
    Mul { dst: Register, lhs: Register, rhs: Register },
    Div { dst: Register, lhs: Register, rhs: Register },
    Mod { dst: Register, lhs: Register, rhs: Register },
    Pow { dst: Register, lhs: Register, rhs: Register },
    Neg { dst: Register, src: Register },
    Inc { dst: Register, src: Register },
    Dec { dst: Register, src: Register },

    // Bitwise
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    BitOr { dst: Register, lhs: Register, rhs: Register },
    BitXor { dst: Register, lhs: Register, rhs: Register },
    BitNot { dst: Register, src: Register },
    Shl { dst: Register, lhs: Register, rhs: Register },
    Shr { dst: Register, lhs: Register, rhs: Register },
    Ushr { dst: Register, lhs: Register, rhs: Register },

    // Comparison
    Eq { dst: Register, lhs: Register, rhs: Register },
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    Ne { dst: Register, lhs: Register, rhs: Register },
    StrictNe { dst: Register, lhs: Register, rhs: Register },
    Lt { dst: Register, lhs: Register, rhs: Register },
    Le { dst: Register, lhs: Register, rhs: Register },
    Gt { dst: Register, lhs: Register, rhs: Register },
    Ge { dst: Register, lhs: Register, rhs: Register },

    // Logical / type
    Not { dst: Register, src: Register },
    TypeOf { dst: Register, src: Register },

    // Objects
    NewObject { dst: Register },
    NewObjectWithProto { dst: Register, proto: Register },
    GetPropConst { dst: Register, obj: Register, name: ConstantIndex },
    SetPropConst { obj: Register, name: ConstantIndex, val: Register },
    GetProp { dst: Register, obj: Register, key: Register },
    SetProp { obj: Register, key: Register, val: Register },
    DeleteProp { dst: Register, obj: Register, key: Register },
    DefineField { obj: Register, key: Register, val: Register, attrs: u8 },
    DefineGetter { obj: Register, key: Register, func: Register },
    DefineSetter { obj: Register, key: Register, func: Register },
    SetPrototype { obj: Register, proto: Register },
    NewPrivateName { dst: Register, description: ConstantIndex },

    // Arrays
    NewArray { dst: Register },
    ArrayPush { arr: Register, src: Register },

    // Functions
    Closure { dst: Register, func: FunctionIndex },
    /// Arguments live in `argc` consecutive registers starting at `args`.
    Call { dst: Register, callee: Register, args: Register, argc: u8 },
    CallMethod { dst: Register, obj: Register, name: ConstantIndex, args: Register, argc: u8 },
    CreateArguments { dst: Register },
    Return { src: Register },
    ReturnUndefined,

    // Control flow
    Jump { offset: JumpOffset },
    JumpIfTrue { cond: Register, offset: JumpOffset },
    JumpIfFalse { cond: Register, offset: JumpOffset },
    LoopHint,

    // Exceptions
    TryStart { catch_offset: JumpOffset },
    TryEnd,
    Throw { src: Register },
    Catch { dst: Register },

    // Generators
    Yield { dst: Register, src: Register },

    // Misc
    Move { dst: Register, src: Register },
    Nop,
    ForceOsrExit,
}

impl Instruction {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::LoadUndefined { .. } => Opcode::LoadUndefined,
            Self::LoadNull { .. } => Opcode::LoadNull,
            Self::LoadTrue { .. } => Opcode::LoadTrue,
            Self::LoadFalse { .. } => Opcode::LoadFalse,
            Self::LoadInt32 { .. } => Opcode::LoadInt32,
            Self::LoadConst { .. } => Opcode::LoadConst,
            Self::GetLocal { .. } => Opcode::GetLocal,
            Self::SetLocal { .. } => Opcode::SetLocal,
            Self::GetLocalChecked { .. } => Opcode::GetLocalChecked,
            Self::ClearLocal { .. } => Opcode::ClearLocal,
            Self::GetGlobal { .. } => Opcode::GetGlobal,
            Self::SetGlobal { .. } => Opcode::SetGlobal,
            Self::LoadThis { .. } => Opcode::LoadThis,
            Self::Add { .. } => Opcode::Add,
            Self::Sub { .. } => Opcode::Sub,
            Self::Mul { .. } => Opcode::Mul,
            Self::Div { .. } => Opcode::Div,
            Self::Mod { .. } => Opcode::Mod,
            Self::Pow { .. } => Opcode::Pow,
            Self::Neg { .. } => Opcode::Neg,
            Self::Inc { .. } => Opcode::Inc,
            Self::Dec { .. } => Opcode::Dec,
            Self::BitAnd { .. } => Opcode::BitAnd,
            Self::BitOr { .. } => Opcode::BitOr,
            Self::BitXor { .. } => Opcode::BitXor,
            Self::BitNot { .. } => Opcode::BitNot,
            Self::Shl { .. } => Opcode::Shl,
            Self::Shr { .. } => Opcode::Shr,
            Self::Ushr { .. } => Opcode::Ushr,
            Self::Eq { .. } => Opcode::Eq,
            Self::StrictEq { .. } => Opcode::StrictEq,
            Self::Ne { .. } => Opcode::Ne,
            Self::StrictNe { .. } => Opcode::StrictNe,
            Self::Lt { .. } => Opcode::Lt,
            Self::Le { .. } => Opcode::Le,
            Self::Gt { .. } => Opcode::Gt,
            Self::Ge { .. } => Opcode::Ge,
            Self::Not { .. } => Opcode::Not,
            Self::TypeOf { .. } => Opcode::TypeOf,
            Self::NewObject { .. } => Opcode::NewObject,
            Self::NewObjectWithProto { .. } => Opcode::NewObjectWithProto,
            Self::GetPropConst { .. } => Opcode::GetPropConst,
            Self::SetPropConst { .. } => Opcode::SetPropConst,
            Self::GetProp { .. } => Opcode::GetProp,
            Self::SetProp { .. } => Opcode::SetProp,
            Self::DeleteProp { .. } => Opcode::DeleteProp,
            Self::DefineField { .. } => Opcode::DefineField,
            Self::DefineGetter { .. } => Opcode::DefineGetter,
            Self::DefineSetter { .. } => Opcode::DefineSetter,
            Self::SetPrototype { .. } => Opcode::SetPrototype,
            Self::NewPrivateName { .. } => Opcode::NewPrivateName,
            Self::NewArray { .. } => Opcode::NewArray,
            Self::ArrayPush { .. } => Opcode::ArrayPush,
            Self::Closure { .. } => Opcode::Closure,
            Self::Call { .. } => Opcode::Call,
            Self::CallMethod { .. } => Opcode::CallMethod,
            Self::CreateArguments { .. } => Opcode::CreateArguments,
            Self::Return { .. } => Opcode::Return,
            Self::ReturnUndefined => Opcode::ReturnUndefined,
            Self::Jump { .. } => Opcode::Jump,
            Self::JumpIfTrue { .. } => Opcode::JumpIfTrue,
            Self::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Self::LoopHint => Opcode::LoopHint,
            Self::TryStart { .. } => Opcode::TryStart,
            Self::TryEnd => Opcode::TryEnd,
            Self::Throw { .. } => Opcode::Throw,
            Self::Catch { .. } => Opcode::Catch,
            Self::Yield { .. } => Opcode::Yield,
            Self::Move { .. } => Opcode::Move,
            Self::Nop => Opcode::Nop,
            Self::ForceOsrExit => Opcode::ForceOsrExit,
        }
    }

    /// Relative jump offset, for instructions that transfer control
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        match self {
            Self::Jump { offset }
            | Self::JumpIfTrue { offset, .. }
            | Self::JumpIfFalse { offset, .. } => Some(*offset),
            Self::TryStart { catch_offset } => Some(*catch_offset),
            _ => None,
        }
    }

    /// Absolute jump target for an instruction located at `pc`
    pub fn jump_target(&self, pc: usize) -> Option<usize> {
        self.jump_offset().and_then(|offset| offset.target_from(pc))
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Return { .. } | Self::ReturnUndefined | Self::Throw { .. }
        )
    }

    /// Register written by this instruction, if any
    pub fn writes(&self) -> Option<Register> {
        match self {
            Self::LoadUndefined { dst }
            | Self::LoadNull { dst }
            | Self::LoadTrue { dst }
            | Self::LoadFalse { dst }
            | Self::LoadInt32 { dst, .. }
            | Self::LoadConst { dst, .. }
            | Self::GetLocal { dst, .. }
            | Self::GetLocalChecked { dst, .. }
            | Self::GetGlobal { dst, .. }
            | Self::LoadThis { dst }
            | Self::Add { dst, .. }
            | Self::Sub { dst, .. }
            | Self::Mul { dst, .. }
            | Self::Div { dst, .. }
            | Self::Mod { dst, .. }
            | Self::Pow { dst, .. }
            | Self::Neg { dst, .. }
            | Self::Inc { dst, .. }
            | Self::Dec { dst, .. }
            | Self::BitAnd { dst, .. }
            | Self::BitOr { dst, .. }
            | Self::BitXor { dst, .. }
            | Self::BitNot { dst, .. }
            | Self::Shl { dst, .. }
            | Self::Shr { dst, .. }
            | Self::Ushr { dst, .. }
            | Self::Eq { dst, .. }
            | Self::StrictEq { dst, .. }
            | Self::Ne { dst, .. }
            | Self::StrictNe { dst, .. }
            | Self::Lt { dst, .. }
            | Self::Le { dst, .. }
            | Self::Gt { dst, .. }
            | Self::Ge { dst, .. }
            | Self::Not { dst, .. }
            | Self::TypeOf { dst, .. }
            | Self::NewObject { dst }
            | Self::NewObjectWithProto { dst, .. }
            | Self::GetPropConst { dst, .. }
            | Self::GetProp { dst, .. }
            | Self::DeleteProp { dst, .. }
            | Self::NewPrivateName { dst, .. }
            | Self::NewArray { dst }
            | Self::Closure { dst, .. }
            | Self::Call { dst, .. }
            | Self::CallMethod { dst, .. }
            | Self::CreateArguments { dst }
            | Self::Catch { dst }
            | Self::Yield { dst, .. }
            | Self::Move { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// Registers read by this instruction
    pub fn reads(&self) -> SmallVec<[Register; 4]> {
        let mut regs = SmallVec::new();
        match self {
            Self::SetLocal { src, .. }
            | Self::SetGlobal { src, .. }
            | Self::Neg { src, .. }
            | Self::Inc { src, .. }
            | Self::Dec { src, .. }
            | Self::BitNot { src, .. }
            | Self::Not { src, .. }
            | Self::TypeOf { src, .. }
            | Self::Return { src }
            | Self::Throw { src }
            | Self::Yield { src, .. }
            | Self::Move { src, .. } => regs.push(*src),
            Self::Add { lhs, rhs, .. }
            | Self::Sub { lhs, rhs, .. }
            | Self::Mul { lhs, rhs, .. }
            | Self::Div { lhs, rhs, .. }
            | Self::Mod { lhs, rhs, .. }
            | Self::Pow { lhs, rhs, .. }
            | Self::BitAnd { lhs, rhs, .. }
            | Self::BitOr { lhs, rhs, .. }
            | Self::BitXor { lhs, rhs, .. }
            | Self::Shl { lhs, rhs, .. }
            | Self::Shr { lhs, rhs, .. }
            | Self::Ushr { lhs, rhs, .. }
            | Self::Eq { lhs, rhs, .. }
            | Self::StrictEq { lhs, rhs, .. }
            | Self::Ne { lhs, rhs, .. }
            | Self::StrictNe { lhs, rhs, .. }
            | Self::Lt { lhs, rhs, .. }
            | Self::Le { lhs, rhs, .. }
            | Self::Gt { lhs, rhs, .. }
            | Self::Ge { lhs, rhs, .. } => {
                regs.push(*lhs);
                regs.push(*rhs);
            }
            Self::NewObjectWithProto { proto, .. } => regs.push(*proto),
            Self::GetPropConst { obj, .. } => regs.push(*obj),
            Self::SetPropConst { obj, val, .. } => {
                regs.push(*obj);
                regs.push(*val);
            }
            Self::GetProp { obj, key, .. } | Self::DeleteProp { obj, key, .. } => {
                regs.push(*obj);
                regs.push(*key);
            }
            Self::SetProp { obj, key, val } | Self::DefineField { obj, key, val, .. } => {
                regs.push(*obj);
                regs.push(*key);
                regs.push(*val);
            }
            Self::DefineGetter { obj, key, func } | Self::DefineSetter { obj, key, func } => {
                regs.push(*obj);
                regs.push(*key);
                regs.push(*func);
            }
            Self::SetPrototype { obj, proto } => {
                regs.push(*obj);
                regs.push(*proto);
            }
            Self::ArrayPush { arr, src } => {
                regs.push(*arr);
                regs.push(*src);
            }
            Self::Call {
                callee, args, argc, ..
            } => {
                regs.push(*callee);
                regs.extend((0..*argc as u16).map(|i| args.offset(i)));
            }
            Self::CallMethod { obj, args, argc, .. } => {
                regs.push(*obj);
                regs.extend((0..*argc as u16).map(|i| args.offset(i)));
            }
            Self::JumpIfTrue { cond, .. } | Self::JumpIfFalse { cond, .. } => regs.push(*cond),
            _ => {}
        }
        regs
    }

    /// Constant pool entry referenced by this instruction
    pub fn constant_operand(&self) -> Option<ConstantIndex> {
        match self {
            Self::LoadConst { idx, .. } => Some(*idx),
            Self::GetLocalChecked { name, .. }
            | Self::GetGlobal { name, .. }
            | Self::SetGlobal { name, .. }
            | Self::GetPropConst { name, .. }
            | Self::SetPropConst { name, .. }
            | Self::CallMethod { name, .. } => Some(*name),
            Self::NewPrivateName { description, .. } => Some(*description),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_name() {
        let insn = Instruction::Add {
            dst: Register(0),
            lhs: Register(1),
            rhs: Register(2),
        };
        assert_eq!(insn.opcode().name(), "Add");
        assert_eq!(insn.opcode().to_byte(), 0x20);
    }

    #[test]
    fn test_call_reads_argument_window() {
        let insn = Instruction::Call {
            dst: Register(0),
            callee: Register(1),
            args: Register(4),
            argc: 3,
        };
        let reads = insn.reads();
        assert_eq!(reads.as_slice(), &[Register(1), Register(4), Register(5), Register(6)]);
        assert_eq!(insn.writes(), Some(Register(0)));
    }

    #[test]
    fn test_constant_operands() {
        let get = Instruction::GetPropConst {
            dst: Register(0),
            obj: Register(1),
            name: ConstantIndex(3),
        };
        assert_eq!(get.constant_operand(), Some(ConstantIndex(3)));
        assert_eq!(Instruction::ReturnUndefined.constant_operand(), None);
    }

    #[test]
    fn test_terminators() {
        assert!(Instruction::ReturnUndefined.is_terminator());
        assert!(Instruction::Jump { offset: JumpOffset(2) }.is_terminator());
        assert!(!Instruction::JumpIfTrue {
            cond: Register(0),
            offset: JumpOffset(2)
        }
        .is_terminator());
    }
}
