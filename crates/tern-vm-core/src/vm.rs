//! VM state and the call path
//!
//! [`Vm`] owns everything one engine mutates while running: the heap, the
//! shape table, the realms, the megamorphic cache and the tier controller.
//! Every call, from script or from the embedder, goes through [`Vm::call`],
//! which picks the tier for the new activation.

use std::sync::Arc;

use tern_vm_bytecode::{Function, Module};
use tern_vm_exec::{EntryDecision, TierConfig, TierController};
use tracing::trace;

use crate::context::{Frame, FrameEnv};
use crate::convert;
use crate::deopt;
use crate::error::{EngineException, ErrorKind, VmError, VmResult};
use crate::generator;
use crate::heap::Heap;
use crate::ic::MegamorphicCache;
use crate::interpreter::{self, FrameExit};
use crate::jit_runtime::{OptOutcome, run_compiled};
use crate::object::{FunctionKind, JsObject, ObjectKind, PropertySlot};
use crate::osr;
use crate::property::{self, PropertyDescriptor};
use crate::realm::{Intrinsics, Realm, RealmId};
use crate::safepoint::{Safepoint, SafepointHook, SafepointKind};
use crate::shape::{PropertyAttributes, PropertyKey, ShapeTable};
use crate::value::{ObjectId, Value};

/// Mutable state of one engine
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) shapes: ShapeTable,
    pub(crate) realms: Vec<Realm>,
    pub(crate) controller: TierController,
    pub(crate) megamorphic: MegamorphicCache,
    pub(crate) max_call_depth: usize,
    pub(crate) polymorphic_cap: usize,
    pub(crate) depth: usize,
    /// Realm of the running function
    pub(crate) current_realm: RealmId,
    pub(crate) safepoint_hook: Option<Box<dyn SafepointHook>>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("objects", &self.heap.len())
            .field("realms", &self.realms.len())
            .field("depth", &self.depth)
            .field("current_realm", &self.current_realm)
            .finish_non_exhaustive()
    }
}

impl Vm {
    pub(crate) fn new(tier: TierConfig, max_call_depth: usize, polymorphic_cap: usize) -> Self {
        Self {
            heap: Heap::new(),
            shapes: ShapeTable::new(),
            realms: Vec::new(),
            controller: TierController::new(tier),
            megamorphic: MegamorphicCache::default(),
            max_call_depth,
            polymorphic_cap,
            depth: 0,
            current_realm: RealmId(0),
            safepoint_hook: None,
        }
    }

    /// Object heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Shape table
    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    /// Tier controller
    pub fn controller(&self) -> &TierController {
        &self.controller
    }

    /// Realm by handle
    ///
    /// Handles are only produced by realm creation and realms are never
    /// dropped, so every handle is valid.
    pub fn realm(&self, id: RealmId) -> &Realm {
        &self.realms[id.index() as usize]
    }

    /// Intrinsics of the running function's realm
    pub(crate) fn current_intrinsics(&self) -> &Intrinsics {
        &self.realm(self.current_realm).intrinsics
    }

    // ==================== Allocation ====================

    /// Allocate an object with the root shape for its class and prototype
    pub(crate) fn alloc(&mut self, kind: ObjectKind, proto: Option<ObjectId>) -> ObjectId {
        let shape = self.shapes.root(kind.class(), proto);
        self.heap.alloc(JsObject {
            shape,
            proto,
            slots: Vec::new(),
            kind,
            extensible: true,
            is_prototype: false,
        })
    }

    /// `{}` in the current realm
    pub(crate) fn new_plain_object(&mut self) -> ObjectId {
        let proto = self.current_intrinsics().object_prototype;
        self.alloc(ObjectKind::Ordinary, Some(proto))
    }

    /// Dense array in the current realm
    pub(crate) fn new_array(&mut self, elements: Vec<Value>) -> ObjectId {
        let proto = self.current_intrinsics().array_prototype;
        self.alloc(ObjectKind::Array(elements), Some(proto))
    }

    /// Closure over function `index` of `module`
    pub(crate) fn new_closure(&mut self, module: &Arc<Module>, index: u32, realm: RealmId) -> VmResult<ObjectId> {
        if module.function(index).is_none() {
            return Err(VmError::internal(format!("function {index} not found")));
        }
        let proto = self.realm(realm).intrinsics.function_prototype;
        let kind = FunctionKind::Closure {
            module: module.clone(),
            index,
            realm,
        };
        Ok(self.alloc(ObjectKind::Function(kind), Some(proto)))
    }

    /// Error instance of `kind` from `realm`
    pub(crate) fn make_error(&mut self, realm: RealmId, kind: ErrorKind, message: Option<&str>) -> ObjectId {
        let proto = self.realm(realm).intrinsics.error_prototypes[kind.table_index()];
        let error = self.alloc(ObjectKind::Error(kind), Some(proto));
        if let Some(message) = message {
            let desc = PropertyDescriptor::data(
                Value::string(message),
                PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
            );
            property::add_property(self, error, PropertyKey::from_str("message"), desc);
        }
        error
    }

    // ==================== Calls ====================

    /// Whether `value` is callable
    pub fn is_callable(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|id| self.heap.get(id).is_callable())
    }

    /// `[[Call]]`
    pub fn call(&mut self, callee: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
        let (id, kind) = match callee.as_object().map(|id| (id, &self.heap.get(id).kind)) {
            Some((id, ObjectKind::Function(kind))) => (id, kind.clone()),
            _ => {
                let type_name = convert::type_of(self, callee);
                return Err(VmError::type_error(format!("{type_name} is not a function")));
            }
        };
        if self.depth >= self.max_call_depth {
            return Err(VmError::stack_overflow());
        }

        let saved_realm = self.current_realm;
        self.current_realm = kind.realm();
        self.depth += 1;
        let result = match kind {
            FunctionKind::Native { func, .. } => func(self, this, args),
            FunctionKind::Closure { module, index, realm } => self.call_closure(module, index, realm, id, this, args),
        };
        self.depth -= 1;
        self.current_realm = saved_realm;
        result
    }

    fn call_closure(
        &mut self,
        module: Arc<Module>,
        index: u32,
        realm: RealmId,
        callee: ObjectId,
        this: &Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let function = module
            .function(index)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("function {index} not found")))?;
        let this = if !function.is_strict() && this.is_nullish() {
            Value::Object(self.realm(realm).global)
        } else {
            this.clone()
        };
        let env = FrameEnv {
            module,
            function,
            function_index: index,
            realm,
            this,
            args: Arc::from(args),
            callee: Some(callee),
        };
        self.safepoint(SafepointKind::FunctionEntry, &env.function, 0);

        if env.function.is_generator() {
            return Ok(generator::create(self, env));
        }
        match self.controller.on_function_entry(&env.module, index) {
            EntryDecision::Optimized(code) => {
                trace!(function = env.function.display_name(), "enter optimized code");
                let mut activation = osr::osr_in(&Frame::new(&env), code);
                match run_compiled(self, &env, &mut activation, 0)? {
                    OptOutcome::Return(value) => Ok(value),
                    OptOutcome::Exit(exit, reason) => {
                        let frame = deopt::handle_exit(self, &env, &activation, exit, reason)?;
                        self.run_baseline(&env, frame)
                    }
                }
            }
            EntryDecision::Baseline => self.run_baseline(&env, Frame::new(&env)),
        }
    }

    fn run_baseline(&mut self, env: &FrameEnv, frame: Frame) -> VmResult<Value> {
        match interpreter::run_frame(self, env, frame)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield { .. } => Err(VmError::internal("yield outside a generator")),
        }
    }

    // ==================== Errors ====================

    /// Script-visible value of an error
    pub(crate) fn error_to_value(&mut self, realm: RealmId, err: VmError) -> Value {
        match err {
            VmError::Exception(value) => *value,
            other => {
                let (kind, message) = other
                    .kind_and_message()
                    .unwrap_or((ErrorKind::InternalError, String::new()));
                Value::Object(self.make_error(realm, kind, Some(&message)))
            }
        }
    }

    /// Embedder-facing form of an error
    pub(crate) fn to_exception(&self, err: VmError) -> EngineException {
        let value = match err {
            VmError::Exception(value) => *value,
            other => {
                let (kind, message) = other
                    .kind_and_message()
                    .unwrap_or((ErrorKind::InternalError, other.to_string()));
                return EngineException {
                    kind,
                    message,
                    value: None,
                };
            }
        };

        let (kind, message) = match value.as_object().map(|id| (id, &self.heap.get(id).kind)) {
            Some((id, ObjectKind::Error(kind))) => {
                let message = property::ordinary_own(self, id, &PropertyKey::from_str("message"))
                    .and_then(|(slot, _)| match slot {
                        PropertySlot::Data(Value::String(s)) => Some(s.to_string()),
                        _ => None,
                    })
                    .unwrap_or_default();
                (*kind, message)
            }
            Some(_) => (ErrorKind::Error, "[object Object]".to_string()),
            None => (
                ErrorKind::Error,
                convert::primitive_to_string(&value)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            ),
        };
        EngineException {
            kind,
            message,
            value: Some(value),
        }
    }

    // ==================== Safepoints ====================

    /// Run the embedder hook, if any
    pub(crate) fn safepoint(&mut self, kind: SafepointKind, function: &Function, pc: usize) {
        if let Some(hook) = self.safepoint_hook.as_mut() {
            let point = Safepoint {
                kind,
                heap: &self.heap,
                shapes: &self.shapes,
                function: function.display_name(),
                pc,
            };
            hook.at_safepoint(&point);
        }
    }
}
