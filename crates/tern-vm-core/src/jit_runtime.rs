//! Optimized tier runtime
//!
//! Runs the speculative ops of a [`CompiledCode`] over a
//! [`CompiledActivation`]. Every guard either passes or stops execution with
//! the guard's exit id; the caller then rebuilds a baseline frame through
//! [`crate::deopt::handle_exit`]. Guards run before any side effect of their
//! op, so an exit never leaves an op half done.

use tern_vm_jit::{
    BailoutReason, CompareOp, CompiledCode, ConstValue, ExitId, Int32Op, NumberOp, Operand, SpecOp,
};

use crate::context::{CompiledActivation, FrameEnv};
use crate::convert::to_boolean;
use crate::error::{VmError, VmResult};
use crate::interpreter::{execute_instruction, load_constant};
use crate::object::{ObjectKind, PropertySlot};
use crate::operations::{self, ArithOp};
use crate::safepoint::SafepointKind;
use crate::typed_array;
use crate::value::Value;
use crate::vm::Vm;

/// How a run of optimized code ended
#[derive(Debug)]
pub enum OptOutcome {
    /// The function returned
    Return(Value),
    /// A guard failed or an unconditional exit was reached
    Exit(ExitId, BailoutReason),
}

/// Result of one op
enum Flow {
    Next,
    Goto(usize),
    Done(OptOutcome),
}

/// Materialize a compile-time constant
pub(crate) fn const_value(env: &FrameEnv, value: ConstValue) -> VmResult<Value> {
    Ok(match value {
        ConstValue::Undefined => Value::Undefined,
        ConstValue::Null => Value::Null,
        ConstValue::Bool(b) => Value::Boolean(b),
        ConstValue::Int32(n) => Value::Int32(n),
        ConstValue::Pool(index) => load_constant(env, index)?,
        ConstValue::Empty => Value::Empty,
    })
}

fn operand(env: &FrameEnv, act: &CompiledActivation, op: &Operand) -> VmResult<Value> {
    match op {
        Operand::Slot(slot) => Ok(act.get(*slot).clone()),
        Operand::Const(value) => const_value(env, *value),
    }
}

fn int32_binary(op: Int32Op, x: i32, y: i32) -> Result<i32, BailoutReason> {
    let shift = y as u32 & 31;
    match op {
        Int32Op::Add => x.checked_add(y).ok_or(BailoutReason::Overflow),
        Int32Op::Sub => x.checked_sub(y).ok_or(BailoutReason::Overflow),
        Int32Op::Mul => {
            let product = x.checked_mul(y).ok_or(BailoutReason::Overflow)?;
            if product == 0 && (x < 0 || y < 0) {
                return Err(BailoutReason::NegativeZero);
            }
            Ok(product)
        }
        Int32Op::BitAnd => Ok(x & y),
        Int32Op::BitOr => Ok(x | y),
        Int32Op::BitXor => Ok(x ^ y),
        Int32Op::Shl => Ok(x.wrapping_shl(shift)),
        Int32Op::Shr => Ok(x >> shift),
        Int32Op::Ushr => i32::try_from((x as u32) >> shift).map_err(|_| BailoutReason::Overflow),
    }
}

fn number_op(op: NumberOp) -> ArithOp {
    match op {
        NumberOp::Add => ArithOp::Add,
        NumberOp::Sub => ArithOp::Sub,
        NumberOp::Mul => ArithOp::Mul,
        NumberOp::Div => ArithOp::Div,
        NumberOp::Mod => ArithOp::Mod,
    }
}

fn compare<T: PartialOrd>(op: CompareOp, x: T, y: T) -> bool {
    match op {
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
    }
}

/// Data slot `slot` of `value` if it is an object with shape `shape`
fn own_data(vm: &Vm, value: &Value, shape: u32, slot: u32) -> Option<Value> {
    let object = vm.heap.get(value.as_object()?);
    if object.shape.index() != shape {
        return None;
    }
    match object.slot(slot) {
        PropertySlot::Data(value) => Some(value),
        PropertySlot::Accessor { .. } => None,
    }
}

/// Run `act.code` starting at op `start`
pub(crate) fn run_compiled(
    vm: &mut Vm,
    env: &FrameEnv,
    act: &mut CompiledActivation,
    start: usize,
) -> VmResult<OptOutcome> {
    let code = act.code.clone();
    let mut index = start;
    loop {
        let op = code
            .ops
            .get(index)
            .ok_or_else(|| VmError::internal(format!("{}: op {index} out of range", code.name)))?;
        match execute_op(vm, env, act, &code, op)? {
            Flow::Next => index += 1,
            Flow::Goto(target) => index = target,
            Flow::Done(outcome) => return Ok(outcome),
        }
    }
}

fn execute_op(
    vm: &mut Vm,
    env: &FrameEnv,
    act: &mut CompiledActivation,
    code: &CompiledCode,
    op: &SpecOp,
) -> VmResult<Flow> {
    let exit = |id: ExitId, reason: BailoutReason| Ok(Flow::Done(OptOutcome::Exit(id, reason)));

    match op {
        SpecOp::Move { dst, src } => {
            let value = operand(env, act, src)?;
            act.put(*dst, value);
        }

        // ==================== Int32 / Number ====================
        SpecOp::Int32Binary {
            op,
            dst,
            lhs,
            rhs,
            exit: id,
        } => {
            let (Value::Int32(x), Value::Int32(y)) = (operand(env, act, lhs)?, operand(env, act, rhs)?) else {
                return exit(*id, BailoutReason::TypeGuard);
            };
            match int32_binary(*op, x, y) {
                Ok(result) => act.put(*dst, Value::Int32(result)),
                Err(reason) => return exit(*id, reason),
            }
        }
        SpecOp::Int32Negate { dst, src, exit: id } => {
            let Value::Int32(x) = operand(env, act, src)? else {
                return exit(*id, BailoutReason::TypeGuard);
            };
            match x {
                0 => return exit(*id, BailoutReason::NegativeZero),
                i32::MIN => return exit(*id, BailoutReason::Overflow),
                _ => act.put(*dst, Value::Int32(-x)),
            }
        }
        SpecOp::NumberBinary {
            op,
            dst,
            lhs,
            rhs,
            exit: id,
        } => {
            let (Some(x), Some(y)) = (operand(env, act, lhs)?.as_number(), operand(env, act, rhs)?.as_number())
            else {
                return exit(*id, BailoutReason::TypeGuard);
            };
            act.put(*dst, Value::number(operations::number_arith(number_op(*op), x, y)));
        }
        SpecOp::Int32Compare {
            op,
            dst,
            lhs,
            rhs,
            exit: id,
        } => {
            let (Value::Int32(x), Value::Int32(y)) = (operand(env, act, lhs)?, operand(env, act, rhs)?) else {
                return exit(*id, BailoutReason::TypeGuard);
            };
            act.put(*dst, Value::Boolean(compare(*op, x, y)));
        }
        SpecOp::NumberCompare {
            op,
            dst,
            lhs,
            rhs,
            exit: id,
        } => {
            let (Some(x), Some(y)) = (operand(env, act, lhs)?.as_number(), operand(env, act, rhs)?.as_number())
            else {
                return exit(*id, BailoutReason::TypeGuard);
            };
            act.put(*dst, Value::Boolean(compare(*op, x, y)));
        }

        // ==================== Control ====================
        SpecOp::Branch { cond, when, target } => {
            if to_boolean(&operand(env, act, cond)?) == *when {
                return Ok(Flow::Goto(*target));
            }
        }
        SpecOp::SpeculateBranch {
            cond,
            expected,
            exit: id,
        } => {
            if to_boolean(&operand(env, act, cond)?) != *expected {
                return exit(*id, BailoutReason::BranchSpeculation);
            }
        }
        SpecOp::Jump { target } => return Ok(Flow::Goto(*target)),
        SpecOp::LoopHeader { bytecode_pc } => vm.safepoint(SafepointKind::BackEdge, &env.function, *bytecode_pc),
        SpecOp::Return { value } => return Ok(Flow::Done(OptOutcome::Return(operand(env, act, value)?))),
        SpecOp::Exit { exit: id } => {
            let reason = code.exit(*id).map_or(BailoutReason::ForcedExit, |site| site.reason);
            return exit(*id, reason);
        }

        // ==================== Properties ====================
        SpecOp::GetOwnProperty {
            dst,
            obj,
            shape,
            slot,
            exit: id,
        } => match own_data(vm, act.get(*obj), *shape, *slot) {
            Some(value) => act.put(*dst, value),
            None => return exit(*id, BailoutReason::ShapeGuard),
        },
        SpecOp::GetPolymorphicProperty { dst, obj, cases, exit: id } => {
            let receiver = act.get(*obj);
            let found = cases
                .iter()
                .find_map(|(shape, slot)| own_data(vm, receiver, *shape, *slot));
            match found {
                Some(value) => act.put(*dst, value),
                None => return exit(*id, BailoutReason::ShapeGuard),
            }
        }
        SpecOp::SetOwnProperty {
            obj,
            shape,
            slot,
            value,
            exit: id,
        } => {
            let target = act
                .get(*obj)
                .as_object()
                .filter(|object| own_data(vm, &Value::Object(*object), *shape, *slot).is_some());
            let Some(target) = target else {
                return exit(*id, BailoutReason::ShapeGuard);
            };
            let value = operand(env, act, value)?;
            vm.heap.get_mut(target).set_slot(*slot, PropertySlot::Data(value));
        }

        // ==================== Elements ====================
        SpecOp::ArgumentsLength { dst } => act.put(*dst, Value::number(env.args.len() as f64)),
        SpecOp::ArgumentsElement { dst, index, exit: id } => {
            let element = match operand(env, act, index)? {
                Value::Int32(i) if i >= 0 => env.args.get(i as usize).cloned(),
                _ => None,
            };
            match element {
                Some(value) => act.put(*dst, value),
                None => return exit(*id, BailoutReason::BoundsCheck),
            }
        }
        SpecOp::TypedArrayLoad {
            dst,
            array,
            index,
            exit: id,
        } => {
            let element = match (act.get(*array).as_object(), operand(env, act, index)?) {
                (Some(array), Value::Int32(i)) if i >= 0 => match &vm.heap.get(array).kind {
                    ObjectKind::TypedArray(view) if typed_array::has_fixed_layout(&vm.heap, view) => {
                        typed_array::get_element(&vm.heap, view, i as usize)
                    }
                    _ => None,
                },
                _ => None,
            };
            match element {
                Some(value) => act.put(*dst, value),
                None => return exit(*id, BailoutReason::BoundsCheck),
            }
        }
        SpecOp::CheckInitialized { slot, exit: id } => {
            if matches!(act.get(*slot), Value::Empty) {
                return exit(*id, BailoutReason::Uninitialized);
            }
        }

        // ==================== Generic ====================
        SpecOp::Generic { pc } => {
            let insn = env
                .function
                .instructions
                .get(*pc)
                .ok_or_else(|| VmError::internal(format!("{}: generic op at missing pc {pc}", code.name)))?;
            execute_instruction(vm, env, act, *pc, insn)?;
        }
    }
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_guards_report_the_failing_condition() {
        assert_eq!(int32_binary(Int32Op::Add, 2, 3), Ok(5));
        assert_eq!(int32_binary(Int32Op::Add, i32::MAX, 1), Err(BailoutReason::Overflow));
        assert_eq!(int32_binary(Int32Op::Mul, -4, 0), Err(BailoutReason::NegativeZero));
        assert_eq!(int32_binary(Int32Op::Ushr, -1, 0), Err(BailoutReason::Overflow));
        assert_eq!(int32_binary(Int32Op::Ushr, -1, 1), Ok(i32::MAX));
        assert_eq!(int32_binary(Int32Op::Shl, 1, 33), Ok(2));
    }

    #[test]
    fn number_comparisons_treat_nan_as_unordered() {
        assert!(!compare(CompareOp::Lt, f64::NAN, 1.0));
        assert!(!compare(CompareOp::Eq, f64::NAN, f64::NAN));
        assert!(compare(CompareOp::Ne, f64::NAN, f64::NAN));
        assert!(compare(CompareOp::Ge, 2, 2));
    }
}
