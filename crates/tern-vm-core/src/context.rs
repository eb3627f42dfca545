//! Activation state shared by both tiers
//!
//! A baseline [`Frame`] holds every slot of the function (locals, then
//! registers). A [`CompiledActivation`] holds only the slots the compiled
//! code maps. Both implement [`FrameSlots`] over baseline slot numbers, so
//! instruction semantics are written once.

use std::sync::Arc;

use tern_vm_bytecode::{Function, Module, Register};
use tern_vm_exec::FunctionKey;
use tern_vm_jit::{CompiledCode, Slot};

use crate::realm::RealmId;
use crate::value::{ObjectId, Value};

static UNDEFINED: Value = Value::Undefined;

/// Immutable part of an activation
#[derive(Clone)]
pub struct FrameEnv {
    /// Owning module
    pub module: Arc<Module>,
    /// Function being executed
    pub function: Arc<Function>,
    /// Index of the function in its module
    pub function_index: u32,
    /// Realm the function belongs to
    pub realm: RealmId,
    /// `this` binding
    pub this: Value,
    /// Actual arguments
    pub args: Arc<[Value]>,
    /// Function object, when called through one
    pub callee: Option<ObjectId>,
}

impl FrameEnv {
    /// Key of the function in the tier controller
    #[inline]
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.module.module_id, self.function_index)
    }

    /// Strict mode code
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.function.is_strict()
    }
}

impl std::fmt::Debug for FrameEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEnv")
            .field("function", &self.function.display_name())
            .field("function_index", &self.function_index)
            .field("realm", &self.realm)
            .field("argc", &self.args.len())
            .finish_non_exhaustive()
    }
}

/// Baseline activation
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) slots: Vec<Value>,
    pub(crate) pc: usize,
    /// Catch targets of the enclosing `try` blocks, innermost last
    pub(crate) handlers: Vec<usize>,
    /// Exception waiting for a `Catch`
    pub(crate) exception: Option<Value>,
}

impl Frame {
    /// Fresh frame with parameters bound to the actual arguments
    pub fn new(env: &FrameEnv) -> Self {
        let function = &env.function;
        let mut slots = vec![Value::Undefined; function.frame_size()];
        let bound = (function.param_count as usize)
            .min(function.local_count as usize)
            .min(env.args.len());
        slots[..bound].clone_from_slice(&env.args[..bound]);
        Self::from_slots(slots, 0)
    }

    /// Frame rebuilt from explicit slot contents
    pub(crate) fn from_slots(slots: Vec<Value>, pc: usize) -> Self {
        Self {
            slots,
            pc,
            handlers: Vec::new(),
            exception: None,
        }
    }

    /// Bytecode offset of the next instruction
    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }
}

/// Slot access by baseline slot number
pub trait FrameSlots {
    /// Read a slot; unknown slots read as `undefined`
    fn slot(&self, index: usize) -> &Value;

    /// Write a slot
    fn set_slot(&mut self, index: usize, value: Value);

    /// Read a register of `function`
    #[inline]
    fn register(&self, function: &Function, register: Register) -> &Value {
        self.slot(function.register_slot(register))
    }

    /// Write a register of `function`
    #[inline]
    fn set_register(&mut self, function: &Function, register: Register, value: Value) {
        self.set_slot(function.register_slot(register), value)
    }
}

impl FrameSlots for Frame {
    #[inline]
    fn slot(&self, index: usize) -> &Value {
        self.slots.get(index).unwrap_or(&UNDEFINED)
    }

    #[inline]
    fn set_slot(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value;
        }
    }
}

/// Activation of optimized code
#[derive(Debug)]
pub struct CompiledActivation {
    pub(crate) code: Arc<CompiledCode>,
    pub(crate) slots: Vec<Value>,
}

impl CompiledActivation {
    /// Empty activation for `code`
    pub(crate) fn new(code: Arc<CompiledCode>) -> Self {
        let slots = vec![Value::Undefined; code.slot_count];
        Self { code, slots }
    }

    /// Read a compiled slot
    #[inline]
    pub(crate) fn get(&self, slot: Slot) -> &Value {
        self.slots.get(slot as usize).unwrap_or(&UNDEFINED)
    }

    /// Write a compiled slot
    #[inline]
    pub(crate) fn put(&mut self, slot: Slot, value: Value) {
        if let Some(target) = self.slots.get_mut(slot as usize) {
            *target = value;
        }
    }
}

impl FrameSlots for CompiledActivation {
    #[inline]
    fn slot(&self, index: usize) -> &Value {
        match self.code.compiled_slot(index) {
            Some(slot) => self.get(slot),
            None => &UNDEFINED,
        }
    }

    #[inline]
    fn set_slot(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.code.compiled_slot(index) {
            self.put(slot, value);
        }
    }
}
