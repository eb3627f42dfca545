//! Baseline tier
//!
//! Executes bytecode one instruction at a time, recording profiling data in
//! the function's feedback vector as it goes. At every `LoopHint` it polls
//! the back-edge safepoint and asks the tier controller whether to transfer
//! the activation into optimized code.
//!
//! [`execute_instruction`] holds the semantics of every non-control
//! instruction. Optimized code reuses it for its generic ops, so both tiers
//! share one definition of each operation.

use tern_vm_bytecode::{ConstantIndex, ElementKind, Function, Instruction, Register};
use tern_vm_exec::BackEdgeDecision;

use crate::arguments;
use crate::context::{Frame, FrameEnv, FrameSlots};
use crate::convert::{self, to_boolean};
use crate::deopt;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::ic;
use crate::jit_runtime::{self, OptOutcome};
use crate::object::ObjectKind;
use crate::operations::{self, ArithOp, BitwiseOp, Relation};
use crate::osr;
use crate::property::{self, PropertyDescriptor};
use crate::safepoint::SafepointKind;
use crate::shape::{PropertyAttributes, PropertyKey};
use crate::typed_array;
use crate::value::{ObjectId, Symbol, Value};
use crate::vm::Vm;

/// How a baseline activation stopped
#[derive(Debug)]
pub enum FrameExit {
    /// The function returned
    Return(Value),
    /// A generator yielded; `frame` resumes after the `Yield`
    Yield {
        /// Yielded value
        value: Value,
        /// Register receiving the value sent by the next resumption
        resume: Register,
        /// Suspended frame
        frame: Frame,
    },
}

/// Run a baseline frame until it returns or yields
pub fn run_frame(vm: &mut Vm, env: &FrameEnv, mut frame: Frame) -> VmResult<FrameExit> {
    let function = env.function.clone();
    loop {
        let pc = frame.pc;
        let Some(insn) = function.instructions.get(pc) else {
            return Ok(FrameExit::Return(Value::Undefined));
        };
        function.record(pc, |site| site.execution_count = site.execution_count.saturating_add(1));

        if let Instruction::Yield { dst, src } = insn {
            let value = frame.register(&function, *src).clone();
            frame.pc = pc + 1;
            return Ok(FrameExit::Yield {
                value,
                resume: *dst,
                frame,
            });
        }

        match step(vm, env, &mut frame, pc, insn) {
            Ok(Some(exit)) => return Ok(exit),
            Ok(None) => {}
            Err(err) => {
                let Some(handler) = frame.handlers.pop() else {
                    return Err(err);
                };
                frame.exception = Some(vm.error_to_value(env.realm, err));
                frame.pc = handler;
            }
        }
    }
}

fn jump_target(insn: &Instruction, pc: usize) -> VmResult<usize> {
    insn.jump_target(pc)
        .ok_or_else(|| VmError::internal(format!("jump before function start at {pc}")))
}

/// Control flow, then everything else through [`execute_instruction`]
fn step(vm: &mut Vm, env: &FrameEnv, frame: &mut Frame, pc: usize, insn: &Instruction) -> VmResult<Option<FrameExit>> {
    let function = &env.function;
    match insn {
        Instruction::Jump { .. } => frame.pc = jump_target(insn, pc)?,
        Instruction::JumpIfTrue { cond, .. } | Instruction::JumpIfFalse { cond, .. } => {
            let when = matches!(insn, Instruction::JumpIfTrue { .. });
            let taken = to_boolean(frame.register(function, *cond)) == when;
            function.record(pc, |site| site.record_branch(taken));
            frame.pc = if taken { jump_target(insn, pc)? } else { pc + 1 };
        }
        Instruction::Return { src } => {
            return Ok(Some(FrameExit::Return(frame.register(function, *src).clone())));
        }
        Instruction::ReturnUndefined => return Ok(Some(FrameExit::Return(Value::Undefined))),
        Instruction::TryStart { .. } => {
            frame.handlers.push(jump_target(insn, pc)?);
            frame.pc = pc + 1;
        }
        Instruction::TryEnd => {
            frame.handlers.pop();
            frame.pc = pc + 1;
        }
        Instruction::Catch { dst } => {
            let exception = frame.exception.take().unwrap_or_default();
            frame.set_register(function, *dst, exception);
            frame.pc = pc + 1;
        }
        Instruction::LoopHint => {
            vm.safepoint(SafepointKind::BackEdge, function, pc);
            match vm.controller.on_back_edge(&env.module, env.function_index, pc) {
                BackEdgeDecision::Continue => frame.pc = pc + 1,
                BackEdgeDecision::Osr { code, op_index } => {
                    let mut activation = osr::osr_in(frame, code);
                    match jit_runtime::run_compiled(vm, env, &mut activation, op_index)? {
                        OptOutcome::Return(value) => return Ok(Some(FrameExit::Return(value))),
                        OptOutcome::Exit(exit, reason) => {
                            *frame = deopt::handle_exit(vm, env, &activation, exit, reason)?;
                        }
                    }
                }
            }
        }
        _ => {
            execute_instruction(vm, env, frame, pc, insn)?;
            frame.pc = pc + 1;
        }
    }
    Ok(None)
}

/// Value of a constant pool entry
pub(crate) fn load_constant(env: &FrameEnv, index: u32) -> VmResult<Value> {
    use tern_vm_bytecode::Constant;
    match env.module.constants.get(index) {
        Some(Constant::Number(n)) => Ok(Value::number(*n)),
        Some(Constant::String(s)) => Ok(Value::string(s)),
        Some(Constant::BigInt(digits)) => convert::string_to_bigint(digits)
            .map(Value::bigint)
            .ok_or_else(|| VmError::new(ErrorKind::SyntaxError, format!("Cannot convert {digits} to a BigInt"))),
        None => Err(VmError::internal(format!("constant {index} out of range"))),
    }
}

fn constant_str(env: &FrameEnv, index: ConstantIndex) -> VmResult<&str> {
    env.module
        .constants
        .get(index.index())
        .and_then(|c| c.as_string())
        .ok_or_else(|| VmError::internal(format!("constant {} is not a string", index.index())))
}

fn constant_key(env: &FrameEnv, index: ConstantIndex) -> VmResult<PropertyKey> {
    constant_str(env, index).map(PropertyKey::from_str)
}

fn object_operand(value: &Value) -> VmResult<ObjectId> {
    value
        .as_object()
        .ok_or_else(|| VmError::internal("object operand expected"))
}

fn prototype_operand(value: &Value) -> VmResult<Option<ObjectId>> {
    match value {
        Value::Object(id) => Ok(Some(*id)),
        Value::Null => Ok(None),
        _ => Err(VmError::type_error("Object prototype may only be an Object or null")),
    }
}

/// Private key whose keyed access at `pc` goes through the named inline cache
fn cached_private_key(function: &Function, pc: usize, key: &Value) -> Option<PropertyKey> {
    let Value::Symbol(symbol) = key else {
        return None;
    };
    if !symbol.is_private() {
        return None;
    }
    function
        .record(pc, |site| site.bind_private_name(symbol.id()))
        .then(|| PropertyKey::Symbol(symbol.clone()))
}

fn record_kinds(env: &FrameEnv, pc: usize, inputs: &[&Value], result: &Value) {
    let int_inputs = inputs.iter().all(|v| matches!(v, Value::Int32(_)));
    // Comparisons yield booleans; only a double result leaves the int32 range
    let overflowed = int_inputs && matches!(result, Value::Double(_));
    env.function.record(pc, |site| {
        for input in inputs {
            site.observed |= input.kind();
        }
        site.result |= result.kind();
        if overflowed {
            site.overflowed = true;
        }
    });
}

fn int32_arith(op: ArithOp, x: i32, y: i32) -> Option<Value> {
    let value = match op {
        ArithOp::Add => x.checked_add(y)?,
        ArithOp::Sub => x.checked_sub(y)?,
        ArithOp::Mul => {
            let product = x.checked_mul(y)?;
            if product == 0 && (x < 0 || y < 0) {
                return None;
            }
            product
        }
        _ => return None,
    };
    Some(Value::Int32(value))
}

fn arith(vm: &mut Vm, op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Int32(x), Value::Int32(y)) = (a, b)
        && let Some(value) = int32_arith(op, *x, *y)
    {
        return Ok(value);
    }
    match op {
        ArithOp::Add => operations::add(vm, a, b),
        _ => operations::arithmetic(vm, op, a, b),
    }
}

fn bitwise(vm: &mut Vm, op: BitwiseOp, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Int32(x), Value::Int32(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return Ok(match op {
            BitwiseOp::And => Value::Int32(x & y),
            BitwiseOp::Or => Value::Int32(x | y),
            BitwiseOp::Xor => Value::Int32(x ^ y),
            BitwiseOp::Shl => Value::Int32(x.wrapping_shl(y as u32 & 31)),
            BitwiseOp::Shr => Value::Int32(x >> (y as u32 & 31)),
            BitwiseOp::Ushr => Value::number(((x as u32) >> (y as u32 & 31)) as f64),
        });
    }
    operations::bitwise(vm, op, a, b)
}

fn relation(vm: &mut Vm, relation: Relation, a: &Value, b: &Value) -> VmResult<bool> {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Ok(operations::number_compare(relation, x, y)),
        _ => operations::compare(vm, relation, a, b),
    }
}

/// Receiver category and bounds of a keyed access, for profiling
fn element_profile(vm: &Vm, id: ObjectId, key: &Value) -> (ElementKind, bool) {
    let object = vm.heap.get(id);
    let (resizable, length) = match &object.kind {
        ObjectKind::TypedArray(view) => (
            !typed_array::has_fixed_layout(&vm.heap, view),
            typed_array::view_length(&vm.heap, view),
        ),
        ObjectKind::Array(elements) | ObjectKind::Arguments(elements) => (false, Some(elements.len())),
        _ => (false, None),
    };
    let kind = object.element_kind(resizable);
    let in_bounds = match (key, length) {
        (Value::Int32(i), Some(length)) => *i >= 0 && (*i as usize) < length,
        (_, Some(_)) => false,
        (_, None) => true,
    };
    (kind, in_bounds)
}

fn collect_args<S: FrameSlots>(env: &FrameEnv, slots: &S, first: Register, argc: u8) -> Vec<Value> {
    (0..argc as u16)
        .map(|i| slots.register(&env.function, first.offset(i)).clone())
        .collect()
}

/// Execute one non-control instruction against `slots`
pub fn execute_instruction<S: FrameSlots>(
    vm: &mut Vm,
    env: &FrameEnv,
    slots: &mut S,
    pc: usize,
    insn: &Instruction,
) -> VmResult<()> {
    let f = &*env.function;
    macro_rules! get {
        ($r:expr) => {
            slots.register(f, $r).clone()
        };
    }

    macro_rules! binary {
        ($dst:expr, $lhs:expr, $rhs:expr, |$vm:ident, $a:ident, $b:ident| $body:expr) => {{
            let $a = get!(*$lhs);
            let $b = get!(*$rhs);
            let $vm = &mut *vm;
            let result: Value = $body;
            record_kinds(env, pc, &[&$a, &$b], &result);
            slots.set_register(f, *$dst, result);
        }};
    }

    match insn {
        // ==================== Constants ====================
        Instruction::LoadUndefined { dst } => slots.set_register(f, *dst, Value::Undefined),
        Instruction::LoadNull { dst } => slots.set_register(f, *dst, Value::Null),
        Instruction::LoadTrue { dst } => slots.set_register(f, *dst, Value::Boolean(true)),
        Instruction::LoadFalse { dst } => slots.set_register(f, *dst, Value::Boolean(false)),
        Instruction::LoadInt32 { dst, value } => slots.set_register(f, *dst, Value::Int32(*value)),
        Instruction::LoadConst { dst, idx } => {
            let value = load_constant(env, idx.index())?;
            slots.set_register(f, *dst, value);
        }

        // ==================== Variables ====================
        Instruction::GetLocal { dst, idx } => {
            let value = slots.slot(idx.index() as usize).clone();
            slots.set_register(f, *dst, value);
        }
        Instruction::SetLocal { idx, src } => {
            let value = get!(*src);
            slots.set_slot(idx.index() as usize, value);
        }
        Instruction::GetLocalChecked { dst, idx, name } => {
            let value = slots.slot(idx.index() as usize).clone();
            if matches!(value, Value::Empty) {
                let name = constant_str(env, *name)?;
                return Err(VmError::reference_error(format!(
                    "Cannot access '{name}' before initialization."
                )));
            }
            slots.set_register(f, *dst, value);
        }
        Instruction::ClearLocal { idx } => slots.set_slot(idx.index() as usize, Value::Empty),
        Instruction::GetGlobal { dst, name } => {
            let key = constant_key(env, *name)?;
            let value = ic::get_global(vm, env, pc, &key)?;
            slots.set_register(f, *dst, value);
        }
        Instruction::SetGlobal { name, src } => {
            let key = constant_key(env, *name)?;
            let value = get!(*src);
            let global = vm.realm(env.realm).global;
            if env.is_strict() && !property::has_property(vm, global, &key)? {
                return Err(VmError::reference_error(format!("{key} is not defined")));
            }
            ic::set_named(vm, env, pc, &Value::Object(global), &key, value)?;
        }
        Instruction::LoadThis { dst } => slots.set_register(f, *dst, env.this.clone()),

        // ==================== Arithmetic ====================
        Instruction::Add { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Add, &a, &b)?),
        Instruction::Sub { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Sub, &a, &b)?),
        Instruction::Mul { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Mul, &a, &b)?),
        Instruction::Div { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Div, &a, &b)?),
        Instruction::Mod { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Mod, &a, &b)?),
        Instruction::Pow { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| arith(vm, ArithOp::Pow, &a, &b)?),
        Instruction::Neg { dst, src } => {
            let value = get!(*src);
            let result = match value {
                Value::Int32(x) if x != 0 && x != i32::MIN => Value::Int32(-x),
                _ => operations::negate(vm, &value)?,
            };
            record_kinds(env, pc, &[&value], &result);
            slots.set_register(f, *dst, result);
        }
        Instruction::Inc { dst, src } | Instruction::Dec { dst, src } => {
            let delta = if matches!(insn, Instruction::Inc { .. }) { 1 } else { -1 };
            let value = get!(*src);
            let result = match value {
                Value::Int32(x) => match x.checked_add(delta) {
                    Some(n) => Value::Int32(n),
                    None => Value::Double(x as f64 + delta as f64),
                },
                _ => operations::increment(vm, &value, delta)?,
            };
            record_kinds(env, pc, &[&value], &result);
            slots.set_register(f, *dst, result);
        }

        // ==================== Bitwise ====================
        Instruction::BitAnd { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::And, &a, &b)?),
        Instruction::BitOr { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::Or, &a, &b)?),
        Instruction::BitXor { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::Xor, &a, &b)?),
        Instruction::Shl { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::Shl, &a, &b)?),
        Instruction::Shr { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::Shr, &a, &b)?),
        Instruction::Ushr { dst, lhs, rhs } => binary!(dst, lhs, rhs, |vm, a, b| bitwise(vm, BitwiseOp::Ushr, &a, &b)?),
        Instruction::BitNot { dst, src } => {
            let value = get!(*src);
            let result = match value {
                Value::Int32(x) => Value::Int32(!x),
                _ => operations::bit_not(vm, &value)?,
            };
            record_kinds(env, pc, &[&value], &result);
            slots.set_register(f, *dst, result);
        }

        // ==================== Comparison ====================
        Instruction::Lt { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(relation(vm, Relation::Lt, &a, &b)?))
        }
        Instruction::Le { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(relation(vm, Relation::Le, &a, &b)?))
        }
        Instruction::Gt { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(relation(vm, Relation::Gt, &a, &b)?))
        }
        Instruction::Ge { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(relation(vm, Relation::Ge, &a, &b)?))
        }
        Instruction::Eq { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(convert::loose_equals(vm, &a, &b)?))
        }
        Instruction::Ne { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |vm, a, b| Value::Boolean(!convert::loose_equals(vm, &a, &b)?))
        }
        Instruction::StrictEq { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |_vm, a, b| Value::Boolean(convert::strict_equals(&a, &b)))
        }
        Instruction::StrictNe { dst, lhs, rhs } => {
            binary!(dst, lhs, rhs, |_vm, a, b| Value::Boolean(!convert::strict_equals(&a, &b)))
        }

        // ==================== Logical / Type ====================
        Instruction::Not { dst, src } => {
            let value = !to_boolean(slots.register(f, *src));
            slots.set_register(f, *dst, Value::Boolean(value));
        }
        Instruction::TypeOf { dst, src } => {
            let name = convert::type_of(vm, slots.register(f, *src));
            slots.set_register(f, *dst, Value::string(name));
        }

        // ==================== Objects ====================
        Instruction::NewObject { dst } => {
            let object = vm.new_plain_object();
            slots.set_register(f, *dst, Value::Object(object));
        }
        Instruction::NewObjectWithProto { dst, proto } => {
            let proto = prototype_operand(slots.register(f, *proto))?;
            let object = vm.alloc(ObjectKind::Ordinary, proto);
            slots.set_register(f, *dst, Value::Object(object));
        }
        Instruction::GetPropConst { dst, obj, name } => {
            let key = constant_key(env, *name)?;
            let receiver = get!(*obj);
            let value = ic::get_named(vm, env, pc, &receiver, &key)?;
            slots.set_register(f, *dst, value);
        }
        Instruction::SetPropConst { obj, name, val } => {
            let key = constant_key(env, *name)?;
            let receiver = get!(*obj);
            let value = get!(*val);
            ic::set_named(vm, env, pc, &receiver, &key, value)?;
        }
        Instruction::GetProp { dst, obj, key } => {
            let base = get!(*obj);
            let key_value = get!(*key);
            if let Some(private) = cached_private_key(f, pc, &key_value) {
                let value = ic::get_named(vm, env, pc, &base, &private)?;
                slots.set_register(f, *dst, value);
                return Ok(());
            }
            let element = base.as_object().map(|id| element_profile(vm, id, &key_value));
            f.record(pc, |site| {
                site.observed |= base.kind();
                site.secondary |= key_value.kind();
                if let Some((kind, in_bounds)) = element {
                    site.record_element(kind, in_bounds);
                }
            });
            let key = convert::to_property_key(vm, &key_value)?;
            let value = property::get_value(vm, &base, &key)?;
            slots.set_register(f, *dst, value);
        }
        Instruction::SetProp { obj, key, val } => {
            let base = get!(*obj);
            let key_value = get!(*key);
            let value = get!(*val);
            match cached_private_key(f, pc, &key_value) {
                Some(private) => ic::set_named(vm, env, pc, &base, &private, value)?,
                None => {
                    let key = convert::to_property_key(vm, &key_value)?;
                    property::set_value(vm, &base, &key, value, env.is_strict())?;
                }
            }
        }
        Instruction::DeleteProp { dst, obj, key } => {
            let base = get!(*obj);
            let key = convert::to_property_key(vm, slots.register(f, *key))?;
            let deleted = match base {
                Value::Object(id) => property::delete(vm, id, &key)?,
                Value::Undefined | Value::Null => {
                    return Err(VmError::type_error("Cannot convert undefined or null to object"));
                }
                _ => true,
            };
            if !deleted && env.is_strict() {
                return Err(VmError::type_error("Unable to delete property."));
            }
            slots.set_register(f, *dst, Value::Boolean(deleted));
        }
        Instruction::DefineField { obj, key, val, attrs } => {
            let id = object_operand(slots.register(f, *obj))?;
            let key = convert::to_property_key(vm, slots.register(f, *key))?;
            let desc = PropertyDescriptor::data(get!(*val), PropertyAttributes::from_field_bits(*attrs));
            property::define_own_property(vm, id, &key, desc, true)?;
        }
        Instruction::DefineGetter { obj, key, func } | Instruction::DefineSetter { obj, key, func } => {
            let id = object_operand(slots.register(f, *obj))?;
            let key = convert::to_property_key(vm, slots.register(f, *key))?;
            let accessor = get!(*func);
            let mut desc = PropertyDescriptor {
                enumerable: Some(true),
                configurable: Some(true),
                ..PropertyDescriptor::default()
            };
            if matches!(insn, Instruction::DefineGetter { .. }) {
                desc.get = Some(accessor);
            } else {
                desc.set = Some(accessor);
            }
            property::define_own_property(vm, id, &key, desc, true)?;
        }
        Instruction::SetPrototype { obj, proto } => {
            let id = object_operand(slots.register(f, *obj))?;
            let proto = prototype_operand(slots.register(f, *proto))?;
            if !property::set_prototype_of(vm, id, proto)? {
                return Err(VmError::type_error("Object.setPrototypeOf failed"));
            }
        }
        Instruction::NewPrivateName { dst, description } => {
            let description = constant_str(env, *description)?;
            slots.set_register(f, *dst, Value::Symbol(Symbol::private(description)));
        }

        // ==================== Arrays ====================
        Instruction::NewArray { dst } => {
            let array = vm.new_array(Vec::new());
            slots.set_register(f, *dst, Value::Object(array));
        }
        Instruction::ArrayPush { arr, src } => {
            let id = object_operand(slots.register(f, *arr))?;
            let value = get!(*src);
            match &mut vm.heap.get_mut(id).kind {
                ObjectKind::Array(elements) => elements.push(value),
                _ => return Err(VmError::internal("ArrayPush on a non-array")),
            }
        }

        // ==================== Functions ====================
        Instruction::Closure { dst, func } => {
            let closure = vm.new_closure(&env.module, func.index(), env.realm)?;
            slots.set_register(f, *dst, Value::Object(closure));
        }
        Instruction::Call { dst, callee, args, argc } => {
            let callee = get!(*callee);
            let args = collect_args(env, slots, *args, *argc);
            let result = vm.call(&callee, &Value::Undefined, &args)?;
            slots.set_register(f, *dst, result);
        }
        Instruction::CallMethod {
            dst,
            obj,
            name,
            args,
            argc,
        } => {
            let key = constant_key(env, *name)?;
            let receiver = get!(*obj);
            let method = ic::get_named(vm, env, pc, &receiver, &key)?;
            let args = collect_args(env, slots, *args, *argc);
            let result = vm.call(&method, &receiver, &args)?;
            slots.set_register(f, *dst, result);
        }
        Instruction::CreateArguments { dst } => {
            let object = arguments::create(vm, env);
            slots.set_register(f, *dst, Value::Object(object));
        }

        // ==================== Exceptions ====================
        Instruction::Throw { src } => return Err(VmError::exception(get!(*src))),

        // ==================== Misc ====================
        Instruction::Move { dst, src } => {
            let value = get!(*src);
            slots.set_register(f, *dst, value);
        }
        Instruction::Nop | Instruction::ForceOsrExit => {}

        Instruction::Return { .. }
        | Instruction::ReturnUndefined
        | Instruction::Jump { .. }
        | Instruction::JumpIfTrue { .. }
        | Instruction::JumpIfFalse { .. }
        | Instruction::LoopHint
        | Instruction::TryStart { .. }
        | Instruction::TryEnd
        | Instruction::Catch { .. }
        | Instruction::Yield { .. } => {
            return Err(VmError::internal(format!(
                "{} outside the interpreter loop",
                insn.opcode().name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_fast_paths_refuse_non_int32_results() {
        assert_eq!(int32_arith(ArithOp::Add, 1, 2), Some(Value::Int32(3)));
        assert_eq!(int32_arith(ArithOp::Add, i32::MAX, 1), None);
        assert_eq!(int32_arith(ArithOp::Mul, 0, -5), None);
        assert_eq!(int32_arith(ArithOp::Mul, -3, 4), Some(Value::Int32(-12)));
        assert_eq!(int32_arith(ArithOp::Div, 4, 2), None);
    }
}
