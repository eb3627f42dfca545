//! Functions
//!
//! Frame layout is shared by every tier: `local_count` locals (parameters
//! first) followed by `register_count` registers.

use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::feedback::{FeedbackSnapshot, FeedbackVector, ProfiledSite};
use crate::instruction::Instruction;
use crate::operand::{JumpOffset, Register};

bitflags! {
    /// Static properties of a function body
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FunctionFlags: u8 {
        /// Strict-mode code
        const STRICT = 1 << 0;
        /// Body suspends at `Yield`
        const GENERATOR = 1 << 1;
        /// Body materializes `arguments`
        const USES_ARGUMENTS = 1 << 2;
    }
}

/// Compiled function body plus its profiling data
#[derive(Debug, Serialize, Deserialize)]
pub struct Function {
    /// Source name; `None` for anonymous functions
    pub name: Option<String>,
    /// Declared parameter count
    pub param_count: u8,
    /// Parameters plus declared locals
    pub local_count: u16,
    /// Scratch registers after the locals
    pub register_count: u16,
    /// Strictness and body kind
    pub flags: FunctionFlags,
    /// Body
    pub instructions: Vec<Instruction>,
    #[serde(skip, default)]
    feedback: RwLock<FeedbackVector>,
}

impl Function {
    /// Start an empty body
    pub fn builder() -> FunctionBuilder {
        FunctionBuilder::default()
    }

    /// Name for diagnostics
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "<anonymous>",
        }
    }

    /// Generators never leave the baseline tier
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(FunctionFlags::GENERATOR)
    }

    /// Strict-mode semantics for stores, deletes and `this`
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.flags.contains(FunctionFlags::STRICT)
    }

    /// Total frame slots (locals then registers)
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.local_count as usize + self.register_count as usize
    }

    /// Frame slot index of a register
    #[inline]
    pub fn register_slot(&self, register: Register) -> usize {
        self.local_count as usize + register.index() as usize
    }

    /// Update the profiling site at `pc`
    #[inline]
    pub fn record<R>(&self, pc: usize, f: impl FnOnce(&mut ProfiledSite) -> R) -> R {
        let mut feedback = self.feedback.write();
        f(feedback.site_mut(pc))
    }

    /// Read the profiling site at `pc`
    #[inline]
    pub fn with_site<R>(&self, pc: usize, f: impl FnOnce(Option<&ProfiledSite>) -> R) -> R {
        let feedback = self.feedback.read();
        f(feedback.site(pc))
    }

    /// Consistent copy of all profiling data
    pub fn feedback_snapshot(&self) -> FeedbackSnapshot {
        self.feedback.read().snapshot()
    }

    /// Check operand ranges and jump targets
    pub fn validate(&self) -> Result<()> {
        if self.param_count as u16 > self.local_count {
            return Err(BytecodeError::ParamsExceedLocals {
                params: self.param_count,
                locals: self.local_count,
            });
        }

        let len = self.instructions.len();
        for (pc, insn) in self.instructions.iter().enumerate() {
            if let Some(register) = insn
                .reads()
                .into_iter()
                .chain(insn.writes())
                .find(|r| r.index() >= self.register_count)
            {
                return Err(BytecodeError::RegisterOutOfRange {
                    pc,
                    register: register.index(),
                    count: self.register_count,
                });
            }

            if let Instruction::GetLocal { idx, .. }
            | Instruction::SetLocal { idx, .. }
            | Instruction::GetLocalChecked { idx, .. }
            | Instruction::ClearLocal { idx } = insn
                && idx.index() >= self.local_count
            {
                return Err(BytecodeError::LocalOutOfRange {
                    pc,
                    local: idx.index(),
                    count: self.local_count,
                });
            }

            if let Some(offset) = insn.jump_offset()
                && !offset.target_from(pc).is_some_and(|target| target < len)
            {
                return Err(BytecodeError::InvalidJumpTarget {
                    pc,
                    offset: offset.offset(),
                });
            }
        }
        Ok(())
    }
}

impl Clone for Function {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            param_count: self.param_count,
            local_count: self.local_count,
            register_count: self.register_count,
            flags: self.flags,
            instructions: self.instructions.clone(),
            feedback: RwLock::new(self.feedback.read().clone()),
        }
    }
}

/// Jump target inside a [`FunctionBuilder`]; may be bound after use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Assembles a [`Function`], resolving label jumps on `build`
///
/// Setters consume and return the builder so a straight-line body chains;
/// the `&mut` methods serve bodies with control flow.
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: Option<String>,
    param_count: u8,
    local_count: u16,
    register_count: u16,
    flags: FunctionFlags,
    body: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    pending: Vec<(usize, Label)>,
}

impl FunctionBuilder {
    /// Source name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declared parameters, the first locals
    pub fn param_count(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Parameters plus declared locals
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Scratch registers
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = count;
        self
    }

    /// Body suspends at `Yield`
    pub fn is_generator(mut self, on: bool) -> Self {
        self.flags.set(FunctionFlags::GENERATOR, on);
        self
    }

    /// Strict-mode body
    pub fn is_strict(mut self, on: bool) -> Self {
        self.flags.set(FunctionFlags::STRICT, on);
        self
    }

    /// Append one instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.push(instruction);
        self
    }

    /// Append one instruction in place
    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        if let Instruction::CreateArguments { .. } = instruction {
            self.flags |= FunctionFlags::USES_ARGUMENTS;
        }
        self.body.push(instruction);
        self
    }

    /// New label, not yet bound
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Point `label` at the next instruction pushed
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.body.len());
        }
        self
    }

    /// Unconditional jump
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.push_to_label(label, Instruction::Jump {
            offset: JumpOffset(0),
        })
    }

    /// Jump when `cond` is truthy
    pub fn jump_if_true(&mut self, cond: Register, label: Label) -> &mut Self {
        self.push_to_label(label, Instruction::JumpIfTrue {
            cond,
            offset: JumpOffset(0),
        })
    }

    /// Jump when `cond` is falsy
    pub fn jump_if_false(&mut self, cond: Register, label: Label) -> &mut Self {
        self.push_to_label(label, Instruction::JumpIfFalse {
            cond,
            offset: JumpOffset(0),
        })
    }

    /// Open a try block whose handler starts at `label`
    pub fn try_start(&mut self, label: Label) -> &mut Self {
        self.push_to_label(label, Instruction::TryStart {
            catch_offset: JumpOffset(0),
        })
    }

    fn push_to_label(&mut self, label: Label, instruction: Instruction) -> &mut Self {
        self.pending.push((self.body.len(), label));
        self.push(instruction)
    }

    /// Patch label jumps and attach an empty feedback vector
    ///
    /// A jump to a label that was never bound points one past the end,
    /// which [`Function::validate`] rejects.
    pub fn build(self) -> Function {
        let Self {
            name,
            param_count,
            local_count,
            register_count,
            flags,
            mut body,
            labels,
            pending,
        } = self;

        let end = body.len();
        for (pc, label) in pending {
            let target = labels.get(label.0).copied().flatten().unwrap_or(end);
            let distance = JumpOffset(target as i32 - pc as i32);
            if let Instruction::Jump { offset }
            | Instruction::JumpIfTrue { offset, .. }
            | Instruction::JumpIfFalse { offset, .. }
            | Instruction::TryStart { catch_offset: offset } = &mut body[pc]
            {
                *offset = distance;
            }
        }

        Function {
            name,
            param_count,
            local_count,
            register_count,
            flags,
            feedback: RwLock::new(FeedbackVector::new(body.len())),
            instructions: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::LocalIndex;

    #[test]
    fn test_builder_sets_frame_layout_and_flags() {
        let func = Function::builder()
            .name("add")
            .param_count(2)
            .local_count(2)
            .register_count(3)
            .is_strict(true)
            .instruction(Instruction::Add {
                dst: Register(0),
                lhs: Register(1),
                rhs: Register(2),
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build();

        assert_eq!(func.display_name(), "add");
        assert_eq!(func.param_count, 2);
        assert_eq!(func.instructions.len(), 2);
        assert_eq!(func.frame_size(), 5);
        assert_eq!(func.register_slot(Register(1)), 3);
        assert!(func.is_strict());
        assert!(!func.is_generator());
        assert!(func.validate().is_ok());
    }

    #[test]
    fn test_arguments_use_is_detected() {
        let func = Function::builder()
            .register_count(1)
            .instruction(Instruction::CreateArguments { dst: Register(0) })
            .instruction(Instruction::Return { src: Register(0) })
            .build();
        assert_eq!(func.flags, FunctionFlags::USES_ARGUMENTS);
        assert_eq!(func.display_name(), "<anonymous>");
    }

    #[test]
    fn test_labels_resolve_relative_offsets() {
        let mut b = Function::builder().register_count(1);
        let top = b.label();
        let done = b.label();
        b.bind(top);
        b.push(Instruction::LoopHint);
        b.jump_if_false(Register(0), done);
        b.jump(top);
        b.bind(done);
        b.push(Instruction::ReturnUndefined);
        let func = b.build();

        assert_eq!(func.instructions[1].jump_offset(), Some(JumpOffset(2)));
        assert_eq!(func.instructions[2].jump_offset(), Some(JumpOffset(-2)));
        assert!(func.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_operands() {
        let func = Function::builder()
            .register_count(1)
            .instruction(Instruction::Move {
                dst: Register(0),
                src: Register(1),
            })
            .build();
        assert_eq!(
            func.validate(),
            Err(BytecodeError::RegisterOutOfRange {
                pc: 0,
                register: 1,
                count: 1
            })
        );

        let func = Function::builder()
            .local_count(1)
            .register_count(1)
            .instruction(Instruction::GetLocal {
                dst: Register(0),
                idx: LocalIndex(3),
            })
            .build();
        assert!(matches!(
            func.validate(),
            Err(BytecodeError::LocalOutOfRange { local: 3, .. })
        ));
    }

    #[test]
    fn test_unbound_label_fails_validation() {
        let mut b = Function::builder();
        let nowhere = b.label();
        b.jump(nowhere);
        let func = b.build();
        assert!(matches!(
            func.validate(),
            Err(BytecodeError::InvalidJumpTarget { pc: 0, .. })
        ));
    }

    #[test]
    fn test_feedback_recording_and_snapshot() {
        let func = Function::builder()
            .register_count(1)
            .instruction(Instruction::LoadTrue { dst: Register(0) })
            .instruction(Instruction::Return { src: Register(0) })
            .build();
        func.record(0, |site| site.execution_count += 1);
        let snapshot = func.feedback_snapshot();
        assert!(snapshot.executed(0));
        assert!(!snapshot.executed(1));

        let copy = func.clone();
        assert!(copy.feedback_snapshot().executed(0));
    }
}
