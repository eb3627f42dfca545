//! Bytecode to speculative op translation.
//!
//! The translator walks the function once, block by block:
//!
//! - blocks whose leader never ran while profiling become a single
//!   unconditional exit;
//! - constant loads are not stored right away; the constant is folded into
//!   later operands and only written to its slot at block boundaries and
//!   before generic ops (exit sites list the pending constants so the
//!   baseline frame can be rebuilt);
//! - an `arguments` object that is only read through `length` and indexed
//!   loads is never allocated.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tern_vm_bytecode::feedback::FeedbackSnapshot;
use tern_vm_bytecode::{ConstantPool, Function, Instruction, Register};

use crate::bailout::BailoutReason;
use crate::compiler::JitError;
use crate::ir::{
    CompareOp, CompiledCode, ConstValue, ExitId, ExitSite, Int32Op, NumberOp, Operand, OsrEntry,
    Recovery, Slot, SpecOp,
};
use crate::speculation::{
    self, ArithSpeculation, ArithSupport, BranchSpeculation, ElementSpeculation, LoadSpeculation,
    StoreSpeculation,
};

/// Check whether a function can be compiled by the optimizing tier
///
/// Generators suspend their frames and try/catch needs handler tables; both
/// stay in the baseline tier.
pub fn can_translate_function(function: &Function) -> Result<(), JitError> {
    if function.is_generator() {
        return Err(JitError::NotEligible { reason: "generator" });
    }
    if function.instructions.is_empty() {
        return Err(JitError::NotEligible { reason: "empty function" });
    }
    for insn in &function.instructions {
        match insn {
            Instruction::Yield { .. } => {
                return Err(JitError::NotEligible { reason: "yield" });
            }
            Instruction::TryStart { .. } | Instruction::TryEnd | Instruction::Catch { .. } => {
                return Err(JitError::NotEligible {
                    reason: "exception handler",
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn jump_target(function: &Function, pc: usize, insn: &Instruction) -> Result<Option<usize>, JitError> {
    let Some(offset) = insn.jump_offset() else {
        return Ok(None);
    };
    let len = function.instructions.len();
    match offset.target_from(pc) {
        Some(target) if target < len => Ok(Some(target)),
        _ => Err(JitError::InvalidJumpTarget {
            pc,
            offset: offset.offset(),
            instruction_count: len,
        }),
    }
}

/// First instruction of every basic block
fn block_leaders(function: &Function) -> Result<Vec<bool>, JitError> {
    let len = function.instructions.len();
    let mut leaders = vec![false; len];
    if let Some(first) = leaders.first_mut() {
        *first = true;
    }
    for (pc, insn) in function.instructions.iter().enumerate() {
        if let Some(target) = jump_target(function, pc, insn)? {
            leaders[target] = true;
            if pc + 1 < len {
                leaders[pc + 1] = true;
            }
        }
        if insn.is_terminator() && pc + 1 < len {
            leaders[pc + 1] = true;
        }
        if matches!(insn, Instruction::LoopHint) {
            leaders[pc] = true;
        }
    }
    Ok(leaders)
}

/// Register holding an `arguments` object that never escapes
///
/// A pessimized indexed read keeps the object: its element access then goes
/// through the generic path instead of the bounds-checked fast path.
fn elidable_arguments(
    function: &Function,
    constants: &ConstantPool,
    pessimized: &FxHashSet<u32>,
) -> Option<Register> {
    let mut created = function.instructions.iter().filter_map(|insn| match insn {
        Instruction::CreateArguments { dst } => Some(*dst),
        _ => None,
    });
    let register = created.next()?;
    if created.next().is_some() {
        return None;
    }

    for (pc, insn) in function.instructions.iter().enumerate() {
        if !matches!(insn, Instruction::CreateArguments { .. }) && insn.writes() == Some(register) {
            return None;
        }
        if !insn.reads().contains(&register) {
            continue;
        }
        match insn {
            Instruction::GetPropConst { obj, name, .. } if *obj == register => {
                let is_length = constants
                    .get(name.index())
                    .and_then(|c| c.as_string())
                    .is_some_and(|s| s == "length");
                if !is_length {
                    return None;
                }
            }
            Instruction::GetProp { obj, key, .. } if *obj == register && *key != register => {
                if pessimized.contains(&(pc as u32)) {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(register)
}

struct Lowering<'a> {
    function: &'a Function,
    feedback: &'a FeedbackSnapshot,
    pessimized: &'a FxHashSet<u32>,
    slot_map: Vec<Option<Slot>>,
    elided: Option<Register>,
    ops: Vec<SpecOp>,
    exits: Vec<ExitSite>,
    osr_entries: Vec<OsrEntry>,
    pending: BTreeMap<u32, ConstValue>,
    op_start: Vec<Option<usize>>,
    fixups: Vec<(usize, usize)>,
    speculated: usize,
}

impl<'a> Lowering<'a> {
    fn register_slot(&self, register: Register) -> u32 {
        self.function.register_slot(register) as u32
    }

    fn slot(&self, baseline: u32) -> Result<Slot, JitError> {
        self.slot_map
            .get(baseline as usize)
            .copied()
            .flatten()
            .ok_or(JitError::UnmappedSlot {
                slot: baseline as usize,
            })
    }

    fn operand(&self, register: Register) -> Result<Operand, JitError> {
        let baseline = self.register_slot(register);
        match self.pending.get(&baseline) {
            Some(constant) => Ok(Operand::Const(*constant)),
            None => Ok(Operand::Slot(self.slot(baseline)?)),
        }
    }

    /// Slot of a register that is about to be written
    fn write(&mut self, register: Register) -> Result<Slot, JitError> {
        let baseline = self.register_slot(register);
        self.pending.remove(&baseline);
        self.slot(baseline)
    }

    fn defer(&mut self, register: Register, constant: ConstValue) {
        let baseline = self.register_slot(register);
        self.pending.insert(baseline, constant);
    }

    fn flush(&mut self) -> Result<(), JitError> {
        for (baseline, constant) in std::mem::take(&mut self.pending) {
            let dst = self.slot(baseline)?;
            self.ops.push(SpecOp::Move {
                dst,
                src: Operand::Const(constant),
            });
        }
        Ok(())
    }

    fn exit(&mut self, pc: usize, reason: BailoutReason) -> ExitId {
        let mut recoveries: Vec<(u32, Recovery)> = self
            .pending
            .iter()
            .map(|(slot, constant)| (*slot, Recovery::Constant(*constant)))
            .collect();
        if let Some(register) = self.elided {
            recoveries.push((self.register_slot(register), Recovery::ArgumentsObject));
        }
        self.exits.push(ExitSite {
            bytecode_pc: pc,
            reason,
            recoveries,
        });
        (self.exits.len() - 1) as ExitId
    }

    fn generic(&mut self, pc: usize) -> Result<(), JitError> {
        self.flush()?;
        self.ops.push(SpecOp::Generic { pc });
        Ok(())
    }

    fn is_pessimized(&self, pc: usize) -> bool {
        self.pessimized.contains(&(pc as u32))
    }

    fn emit_jump(&mut self, target: usize) {
        self.fixups.push((self.ops.len(), target));
        self.ops.push(SpecOp::Jump { target });
    }

    fn arith(
        &mut self,
        pc: usize,
        dst: Register,
        lhs: Operand,
        rhs: Operand,
        int_op: Option<Int32Op>,
        number_op: Option<NumberOp>,
    ) -> Result<(), JitError> {
        let support = ArithSupport {
            int32: int_op.is_some(),
            number: number_op.is_some(),
        };
        let choice = speculation::arithmetic(self.feedback.site(pc), self.is_pessimized(pc), support);
        match (choice, int_op, number_op) {
            (ArithSpeculation::Int32, Some(op), _) => {
                let exit = self.exit(pc, BailoutReason::TypeGuard);
                let dst = self.write(dst)?;
                self.ops.push(SpecOp::Int32Binary {
                    op,
                    dst,
                    lhs,
                    rhs,
                    exit,
                });
                self.speculated += 1;
                Ok(())
            }
            (ArithSpeculation::Number, _, Some(op)) => {
                let exit = self.exit(pc, BailoutReason::TypeGuard);
                let dst = self.write(dst)?;
                self.ops.push(SpecOp::NumberBinary {
                    op,
                    dst,
                    lhs,
                    rhs,
                    exit,
                });
                self.speculated += 1;
                Ok(())
            }
            _ => self.generic(pc),
        }
    }

    fn binary(
        &mut self,
        pc: usize,
        dst: Register,
        lhs: Register,
        rhs: Register,
        int_op: Option<Int32Op>,
        number_op: Option<NumberOp>,
    ) -> Result<(), JitError> {
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        self.arith(pc, dst, lhs, rhs, int_op, number_op)
    }

    fn compare(
        &mut self,
        pc: usize,
        op: CompareOp,
        dst: Register,
        lhs: Register,
        rhs: Register,
    ) -> Result<(), JitError> {
        let choice = speculation::comparison(self.feedback.site(pc), self.is_pessimized(pc));
        if choice == ArithSpeculation::Generic {
            return self.generic(pc);
        }
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let exit = self.exit(pc, BailoutReason::TypeGuard);
        let dst = self.write(dst)?;
        self.ops.push(if choice == ArithSpeculation::Int32 {
            SpecOp::Int32Compare {
                op,
                dst,
                lhs,
                rhs,
                exit,
            }
        } else {
            SpecOp::NumberCompare {
                op,
                dst,
                lhs,
                rhs,
                exit,
            }
        });
        self.speculated += 1;
        Ok(())
    }

    fn conditional(&mut self, pc: usize, cond: Register, when: bool, target: usize) -> Result<(), JitError> {
        self.flush()?;
        let cond = self.operand(cond)?;
        match speculation::branch(self.feedback.site(pc), self.is_pessimized(pc)) {
            BranchSpeculation::AlwaysTaken => {
                let exit = self.exit(pc, BailoutReason::BranchSpeculation);
                self.ops.push(SpecOp::SpeculateBranch {
                    cond,
                    expected: when,
                    exit,
                });
                self.emit_jump(target);
                self.speculated += 1;
            }
            BranchSpeculation::NeverTaken => {
                let exit = self.exit(pc, BailoutReason::BranchSpeculation);
                self.ops.push(SpecOp::SpeculateBranch {
                    cond,
                    expected: !when,
                    exit,
                });
                self.speculated += 1;
            }
            BranchSpeculation::Unbiased => {
                self.fixups.push((self.ops.len(), target));
                self.ops.push(SpecOp::Branch { cond, when, target });
            }
        }
        Ok(())
    }

    fn lower(&mut self, pc: usize, insn: &Instruction) -> Result<(), JitError> {
        match insn {
            Instruction::LoadUndefined { dst } => self.defer(*dst, ConstValue::Undefined),
            Instruction::LoadNull { dst } => self.defer(*dst, ConstValue::Null),
            Instruction::LoadTrue { dst } => self.defer(*dst, ConstValue::Bool(true)),
            Instruction::LoadFalse { dst } => self.defer(*dst, ConstValue::Bool(false)),
            Instruction::LoadInt32 { dst, value } => self.defer(*dst, ConstValue::Int32(*value)),
            Instruction::LoadConst { dst, idx } => self.defer(*dst, ConstValue::Pool(idx.index())),

            Instruction::Move { dst, src } => {
                let src_slot = self.register_slot(*src);
                if let Some(constant) = self.pending.get(&src_slot).copied() {
                    self.defer(*dst, constant);
                } else {
                    let src = self.operand(*src)?;
                    let dst = self.write(*dst)?;
                    self.ops.push(SpecOp::Move { dst, src });
                }
            }
            Instruction::GetLocal { dst, idx } => {
                let src = Operand::Slot(self.slot(idx.index() as u32)?);
                let dst = self.write(*dst)?;
                self.ops.push(SpecOp::Move { dst, src });
            }
            Instruction::SetLocal { idx, src } => {
                let src = self.operand(*src)?;
                let dst = self.slot(idx.index() as u32)?;
                self.ops.push(SpecOp::Move { dst, src });
            }
            Instruction::GetLocalChecked { dst, idx, .. } => {
                if self.is_pessimized(pc) {
                    return self.generic(pc);
                }
                let local = self.slot(idx.index() as u32)?;
                let exit = self.exit(pc, BailoutReason::Uninitialized);
                self.ops.push(SpecOp::CheckInitialized { slot: local, exit });
                let dst = self.write(*dst)?;
                self.ops.push(SpecOp::Move {
                    dst,
                    src: Operand::Slot(local),
                });
                self.speculated += 1;
            }
            Instruction::ClearLocal { idx } => {
                let dst = self.slot(idx.index() as u32)?;
                self.ops.push(SpecOp::Move {
                    dst,
                    src: Operand::Const(ConstValue::Empty),
                });
            }

            Instruction::Add { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Add), Some(NumberOp::Add))?
            }
            Instruction::Sub { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Sub), Some(NumberOp::Sub))?
            }
            Instruction::Mul { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Mul), Some(NumberOp::Mul))?
            }
            Instruction::Div { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, None, Some(NumberOp::Div))?
            }
            Instruction::Mod { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, None, Some(NumberOp::Mod))?
            }
            Instruction::BitAnd { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::BitAnd), None)?
            }
            Instruction::BitOr { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::BitOr), None)?
            }
            Instruction::BitXor { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::BitXor), None)?
            }
            Instruction::Shl { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Shl), None)?
            }
            Instruction::Shr { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Shr), None)?
            }
            Instruction::Ushr { dst, lhs, rhs } => {
                self.binary(pc, *dst, *lhs, *rhs, Some(Int32Op::Ushr), None)?
            }
            Instruction::Inc { dst, src } | Instruction::Dec { dst, src } => {
                let increment = matches!(insn, Instruction::Inc { .. });
                let lhs = self.operand(*src)?;
                let one = Operand::Const(ConstValue::Int32(1));
                let (int_op, number_op) = if increment {
                    (Int32Op::Add, NumberOp::Add)
                } else {
                    (Int32Op::Sub, NumberOp::Sub)
                };
                self.arith(pc, *dst, lhs, one, Some(int_op), Some(number_op))?
            }
            Instruction::BitNot { dst, src } => {
                let lhs = self.operand(*src)?;
                let all_ones = Operand::Const(ConstValue::Int32(-1));
                self.arith(pc, *dst, lhs, all_ones, Some(Int32Op::BitXor), None)?
            }
            Instruction::Neg { dst, src } => {
                let support = ArithSupport {
                    int32: true,
                    number: true,
                };
                match speculation::arithmetic(self.feedback.site(pc), self.is_pessimized(pc), support) {
                    ArithSpeculation::Int32 => {
                        let src = self.operand(*src)?;
                        let exit = self.exit(pc, BailoutReason::TypeGuard);
                        let dst = self.write(*dst)?;
                        self.ops.push(SpecOp::Int32Negate { dst, src, exit });
                        self.speculated += 1;
                    }
                    ArithSpeculation::Number => {
                        let lhs = self.operand(*src)?;
                        let minus_one = Operand::Const(ConstValue::Int32(-1));
                        self.arith(pc, *dst, lhs, minus_one, None, Some(NumberOp::Mul))?
                    }
                    ArithSpeculation::Generic => self.generic(pc)?,
                }
            }

            Instruction::Lt { dst, lhs, rhs } => self.compare(pc, CompareOp::Lt, *dst, *lhs, *rhs)?,
            Instruction::Le { dst, lhs, rhs } => self.compare(pc, CompareOp::Le, *dst, *lhs, *rhs)?,
            Instruction::Gt { dst, lhs, rhs } => self.compare(pc, CompareOp::Gt, *dst, *lhs, *rhs)?,
            Instruction::Ge { dst, lhs, rhs } => self.compare(pc, CompareOp::Ge, *dst, *lhs, *rhs)?,
            Instruction::Eq { dst, lhs, rhs } | Instruction::StrictEq { dst, lhs, rhs } => {
                self.compare(pc, CompareOp::Eq, *dst, *lhs, *rhs)?
            }
            Instruction::Ne { dst, lhs, rhs } | Instruction::StrictNe { dst, lhs, rhs } => {
                self.compare(pc, CompareOp::Ne, *dst, *lhs, *rhs)?
            }

            Instruction::GetPropConst { dst, obj, .. } => {
                if Some(*obj) == self.elided {
                    let dst = self.write(*dst)?;
                    self.ops.push(SpecOp::ArgumentsLength { dst });
                    self.speculated += 1;
                    return Ok(());
                }
                if self.pending.contains_key(&self.register_slot(*obj)) {
                    return self.generic(pc);
                }
                match speculation::property_load(self.feedback.site(pc), self.is_pessimized(pc)) {
                    LoadSpeculation::Monomorphic { shape, slot } => {
                        let obj = self.slot(self.register_slot(*obj))?;
                        let exit = self.exit(pc, BailoutReason::ShapeGuard);
                        let dst = self.write(*dst)?;
                        self.ops.push(SpecOp::GetOwnProperty {
                            dst,
                            obj,
                            shape,
                            slot,
                            exit,
                        });
                        self.speculated += 1;
                    }
                    LoadSpeculation::Polymorphic(cases) => {
                        let obj = self.slot(self.register_slot(*obj))?;
                        let exit = self.exit(pc, BailoutReason::ShapeGuard);
                        let dst = self.write(*dst)?;
                        self.ops.push(SpecOp::GetPolymorphicProperty {
                            dst,
                            obj,
                            cases,
                            exit,
                        });
                        self.speculated += 1;
                    }
                    LoadSpeculation::Generic => self.generic(pc)?,
                }
            }
            Instruction::SetPropConst { obj, val, .. } => {
                if self.pending.contains_key(&self.register_slot(*obj)) {
                    return self.generic(pc);
                }
                match speculation::property_store(self.feedback.site(pc), self.is_pessimized(pc)) {
                    StoreSpeculation::Replace { shape, slot } => {
                        let obj = self.slot(self.register_slot(*obj))?;
                        let value = self.operand(*val)?;
                        let exit = self.exit(pc, BailoutReason::ShapeGuard);
                        self.ops.push(SpecOp::SetOwnProperty {
                            obj,
                            shape,
                            slot,
                            value,
                            exit,
                        });
                        self.speculated += 1;
                    }
                    StoreSpeculation::Generic => self.generic(pc)?,
                }
            }
            Instruction::GetProp { dst, obj, key } => {
                if Some(*obj) == self.elided {
                    let index = self.operand(*key)?;
                    let exit = self.exit(pc, BailoutReason::BoundsCheck);
                    let dst = self.write(*dst)?;
                    self.ops.push(SpecOp::ArgumentsElement { dst, index, exit });
                    self.speculated += 1;
                    return Ok(());
                }
                if self.pending.contains_key(&self.register_slot(*obj)) {
                    return self.generic(pc);
                }
                match speculation::element_load(self.feedback.site(pc), self.is_pessimized(pc)) {
                    ElementSpeculation::TypedArray => {
                        let array = self.slot(self.register_slot(*obj))?;
                        let index = self.operand(*key)?;
                        let exit = self.exit(pc, BailoutReason::BoundsCheck);
                        let dst = self.write(*dst)?;
                        self.ops.push(SpecOp::TypedArrayLoad {
                            dst,
                            array,
                            index,
                            exit,
                        });
                        self.speculated += 1;
                    }
                    ElementSpeculation::Generic => self.generic(pc)?,
                }
            }
            Instruction::CreateArguments { dst } if Some(*dst) == self.elided => {}

            Instruction::Jump { .. } => {
                if let Some(target) = jump_target(self.function, pc, insn)? {
                    self.flush()?;
                    self.emit_jump(target);
                }
            }
            Instruction::JumpIfTrue { cond, .. } | Instruction::JumpIfFalse { cond, .. } => {
                if let Some(target) = jump_target(self.function, pc, insn)? {
                    let when = matches!(insn, Instruction::JumpIfTrue { .. });
                    self.conditional(pc, *cond, when, target)?;
                }
            }
            Instruction::LoopHint => {
                self.flush()?;
                self.osr_entries.push(OsrEntry {
                    bytecode_pc: pc,
                    op_index: self.ops.len(),
                });
                self.ops.push(SpecOp::LoopHeader { bytecode_pc: pc });
            }
            Instruction::Return { src } => {
                let value = self.operand(*src)?;
                self.ops.push(SpecOp::Return { value });
                self.pending.clear();
            }
            Instruction::ReturnUndefined => {
                self.ops.push(SpecOp::Return {
                    value: Operand::Const(ConstValue::Undefined),
                });
                self.pending.clear();
            }
            Instruction::ForceOsrExit => {
                if !self.is_pessimized(pc) {
                    let exit = self.exit(pc, BailoutReason::ForcedExit);
                    self.ops.push(SpecOp::Exit { exit });
                }
            }
            Instruction::Nop => {}

            _ => self.generic(pc)?,
        }
        Ok(())
    }
}

/// Translate a function into speculative ops
pub fn translate_function(
    function: &Function,
    constants: &ConstantPool,
    feedback: &FeedbackSnapshot,
    pessimized: &FxHashSet<u32>,
) -> Result<CompiledCode, JitError> {
    can_translate_function(function)?;
    let leaders = block_leaders(function)?;
    let elided = elidable_arguments(function, constants, pessimized);

    // Compact slot assignment: only slots some instruction touches.
    let local_count = function.local_count as usize;
    let mut used = vec![false; function.frame_size()];
    for insn in &function.instructions {
        for register in insn.reads().into_iter().chain(insn.writes()) {
            if let Some(flag) = used.get_mut(local_count + register.index() as usize) {
                *flag = true;
            }
        }
        if let Instruction::GetLocal { idx, .. }
        | Instruction::SetLocal { idx, .. }
        | Instruction::GetLocalChecked { idx, .. }
        | Instruction::ClearLocal { idx } = insn
            && let Some(flag) = used.get_mut(idx.index() as usize)
        {
            *flag = true;
        }
    }
    if let Some(register) = elided
        && let Some(flag) = used.get_mut(function.register_slot(register))
    {
        *flag = false;
    }
    let mut next: Slot = 0;
    let slot_map: Vec<Option<Slot>> = used
        .iter()
        .map(|&is_used| {
            is_used.then(|| {
                let slot = next;
                next += 1;
                slot
            })
        })
        .collect();

    let mut lowering = Lowering {
        function,
        feedback,
        pessimized,
        slot_map,
        elided,
        ops: Vec::new(),
        exits: Vec::new(),
        osr_entries: Vec::new(),
        pending: BTreeMap::new(),
        op_start: vec![None; function.instructions.len()],
        fixups: Vec::new(),
        speculated: 0,
    };

    let mut skipping = false;
    for (pc, insn) in function.instructions.iter().enumerate() {
        if leaders[pc] {
            lowering.flush()?;
            skipping = false;
            lowering.op_start[pc] = Some(lowering.ops.len());
            if !feedback.executed(pc) && !lowering.is_pessimized(pc) {
                let exit = lowering.exit(pc, BailoutReason::UnreachedCode);
                lowering.ops.push(SpecOp::Exit { exit });
                skipping = true;
                continue;
            }
        } else if skipping {
            continue;
        }
        lowering.lower(pc, insn)?;
    }
    lowering.flush()?;
    lowering.ops.push(SpecOp::Return {
        value: Operand::Const(ConstValue::Undefined),
    });

    for (op_index, target_pc) in std::mem::take(&mut lowering.fixups) {
        let target = lowering
            .op_start
            .get(target_pc)
            .copied()
            .flatten()
            .ok_or(JitError::UnboundTarget { pc: target_pc })?;
        match &mut lowering.ops[op_index] {
            SpecOp::Jump { target: t } | SpecOp::Branch { target: t, .. } => *t = target,
            _ => {}
        }
    }

    Ok(CompiledCode {
        name: function.display_name().to_string(),
        baseline_slots: function.frame_size(),
        slot_count: next as usize,
        slot_map: lowering.slot_map,
        ops: lowering.ops,
        exits: lowering.exits,
        osr_entries: lowering.osr_entries,
        elided_arguments: elided.map(|r| function.register_slot(r) as u32),
        speculated_ops: lowering.speculated,
    })
}
