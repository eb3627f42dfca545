//! Generator objects
//!
//! A generator owns a suspended baseline [`Frame`]. Generator functions are
//! never optimized, so resumption always goes through the interpreter.

use std::fmt;

use tern_vm_bytecode::Register;
use tracing::trace;

use crate::context::{Frame, FrameEnv, FrameSlots};
use crate::error::{VmError, VmResult};
use crate::interpreter::{self, FrameExit};
use crate::object::ObjectKind;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// `[[GeneratorState]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not entered yet
    SuspendedStart,
    /// Stopped at a `yield`
    SuspendedYield,
    /// Body is running
    Executing,
    /// Returned or threw
    Completed,
}

/// Internal slots of a generator object
pub struct GeneratorData {
    pub(crate) state: GeneratorState,
    pub(crate) env: FrameEnv,
    pub(crate) frame: Option<Frame>,
    /// Register receiving the value passed to the next `next()`
    pub(crate) resume: Option<Register>,
}

impl fmt::Debug for GeneratorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorData")
            .field("state", &self.state)
            .field("function", &self.env.function.display_name())
            .field("pc", &self.frame.as_ref().map(Frame::pc))
            .finish()
    }
}

/// How a generator is resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// `next(value)`
    Next,
    /// `return(value)`
    Return,
}

/// One iterator result
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorStep {
    /// `value`
    pub value: Value,
    /// `done`
    pub done: bool,
}

/// Generator object for an activation that has not started
pub fn create(vm: &mut Vm, env: FrameEnv) -> Value {
    let proto = vm.realm(env.realm).intrinsics.generator_prototype;
    let frame = Frame::new(&env);
    let data = GeneratorData {
        state: GeneratorState::SuspendedStart,
        env,
        frame: Some(frame),
        resume: None,
    };
    Value::Object(vm.alloc(ObjectKind::Generator(Box::new(data)), Some(proto)))
}

fn data_mut(vm: &mut Vm, id: ObjectId) -> Option<&mut GeneratorData> {
    match &mut vm.heap.get_mut(id).kind {
        ObjectKind::Generator(data) => Some(data),
        _ => None,
    }
}

/// State of a generator object
pub fn state(vm: &Vm, generator: &Value) -> Option<GeneratorState> {
    match &vm.heap.get(generator.as_object()?).kind {
        ObjectKind::Generator(data) => Some(data.state),
        _ => None,
    }
}

/// GeneratorResume / GeneratorResumeAbrupt
///
/// `return` on a suspended generator completes it immediately; `finally`
/// blocks around the suspended `yield` do not run.
pub fn resume(vm: &mut Vm, generator: &Value, mode: ResumeMode, value: Value) -> VmResult<IteratorStep> {
    let incompatible = || VmError::type_error("next method called on incompatible receiver");
    let id = generator.as_object().ok_or_else(incompatible)?;
    let data = data_mut(vm, id).ok_or_else(incompatible)?;

    match (data.state, mode) {
        (GeneratorState::Executing, _) => return Err(VmError::type_error("Generator is executing")),
        (GeneratorState::Completed, ResumeMode::Next) => {
            return Ok(IteratorStep {
                value: Value::Undefined,
                done: true,
            });
        }
        (_, ResumeMode::Return) => {
            data.state = GeneratorState::Completed;
            data.frame = None;
            return Ok(IteratorStep { value, done: true });
        }
        (GeneratorState::SuspendedStart | GeneratorState::SuspendedYield, ResumeMode::Next) => {}
    }

    let Some(mut frame) = data.frame.take() else {
        data.state = GeneratorState::Completed;
        return Ok(IteratorStep {
            value: Value::Undefined,
            done: true,
        });
    };
    if let Some(register) = data.resume.take() {
        frame.set_register(&data.env.function, register, value);
    }
    data.state = GeneratorState::Executing;
    let env = data.env.clone();
    trace!(function = env.function.display_name(), pc = frame.pc(), "resume generator");

    let saved_realm = vm.current_realm;
    vm.current_realm = env.realm;
    let outcome = interpreter::run_frame(vm, &env, frame);
    vm.current_realm = saved_realm;

    let data = data_mut(vm, id).ok_or_else(incompatible)?;
    match outcome {
        Ok(FrameExit::Return(value)) => {
            data.state = GeneratorState::Completed;
            Ok(IteratorStep { value, done: true })
        }
        Ok(FrameExit::Yield { value, resume, frame }) => {
            data.state = GeneratorState::SuspendedYield;
            data.frame = Some(frame);
            data.resume = Some(resume);
            Ok(IteratorStep { value, done: false })
        }
        Err(err) => {
            data.state = GeneratorState::Completed;
            Err(err)
        }
    }
}
