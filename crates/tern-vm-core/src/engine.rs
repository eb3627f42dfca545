//! Embedder entry point
//!
//! [`Engine`] is the only public way to run code. Errors leave it as
//! [`EngineException`]; everything beneath works in [`VmError`].
//!
//! Realms are explicit: allocation entry points take the realm the new
//! object belongs to, and calls run in the callee's realm.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tern_vm_bytecode::Module;
use tern_vm_exec::{ForcedTier, FunctionKey, FunctionTierInfo, TierConfig, TierState, TierStats};
use tracing::debug;

use crate::error::{EngineException, VmError, VmResult};
use crate::generator::{self, IteratorStep, ResumeMode};
use crate::ic::MegamorphicStats;
use crate::object::{FunctionKind, ObjectKind, TypedArrayKind};
use crate::property::{self, PropertyDescriptor};
use crate::proxy;
use crate::realm::{self, RealmId};
use crate::safepoint::SafepointHook;
use crate::shape::{PropertyKey, ShapeId, ShapeTableStats};
use crate::typed_array;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Default nesting limit for calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Default number of shapes an inline cache site holds before going megamorphic
pub const DEFAULT_POLYMORPHIC_CAP: usize = 4;

const MAX_POLYMORPHIC_CAP: usize = 8;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    /// Tier-up policy
    pub tier: TierConfig,
    /// Calls nested deeper than this throw a RangeError
    pub max_call_depth: usize,
    /// Inline cache entries per site, 1..=8
    pub polymorphic_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier: TierConfig::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            polymorphic_cap: DEFAULT_POLYMORPHIC_CAP,
        }
    }
}

impl EngineConfig {
    /// Defaults with the tier policy read from `TERN_*` variables
    pub fn from_env() -> Self {
        Self {
            tier: TierConfig::from_env(),
            ..Self::default()
        }
    }

    /// Replace the tier policy
    pub fn with_tier(mut self, tier: TierConfig) -> Self {
        self.tier = tier;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the polymorphic cap (clamped to 1..=8)
    pub fn with_polymorphic_cap(mut self, cap: usize) -> Self {
        self.polymorphic_cap = cap.clamp(1, MAX_POLYMORPHIC_CAP);
        self
    }
}

/// Counters from every part of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Tier controller
    pub tier: TierStats,
    /// Shape table
    pub shapes: ShapeTableStats,
    /// Objects on the heap
    pub objects: usize,
    /// Megamorphic cache
    pub megamorphic: MegamorphicStats,
}

/// A JavaScript engine instance
///
/// # Example
///
/// ```
/// use tern_vm_bytecode::{Function, Instruction, Module, Register};
/// use tern_vm_core::{Engine, EngineConfig, Value};
///
/// let mut builder = Module::builder("answer.js");
/// builder.add_function(
///     Function::builder()
///         .name("answer")
///         .register_count(1)
///         .instruction(Instruction::LoadInt32 { dst: Register(0), value: 42 })
///         .instruction(Instruction::Return { src: Register(0) })
///         .build(),
/// );
/// let module = builder.build().unwrap();
///
/// let mut engine = Engine::new(EngineConfig::default());
/// let realm = engine.create_realm().unwrap();
/// let module = engine.load_module(module);
/// let answer = engine.create_closure(realm, &module, 0).unwrap();
/// assert_eq!(engine.call(&answer, &Value::Undefined, &[]).unwrap(), Value::Int32(42));
/// ```
pub struct Engine {
    vm: Vm,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("vm", &self.vm).finish()
    }
}

impl Engine {
    /// Create an engine with no realms
    pub fn new(config: EngineConfig) -> Self {
        let cap = config.polymorphic_cap.clamp(1, MAX_POLYMORPHIC_CAP);
        debug!(
            tier_enabled = config.tier.enabled,
            background = config.tier.background,
            max_call_depth = config.max_call_depth,
            polymorphic_cap = cap,
            "engine created"
        );
        Self {
            vm: Vm::new(config.tier, config.max_call_depth, cap),
        }
    }

    /// VM state, for inspection
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    fn finish<T>(&self, result: VmResult<T>) -> Result<T, EngineException> {
        result.map_err(|err| self.vm.to_exception(err))
    }

    /// Run `f` with `realm` as the current realm
    fn in_realm<T>(&mut self, realm: RealmId, f: impl FnOnce(&mut Vm) -> VmResult<T>) -> Result<T, EngineException> {
        if realm.index() as usize >= self.vm.realms.len() {
            return Err(self.vm.to_exception(VmError::internal(format!("unknown realm {}", realm.index()))));
        }
        let saved = self.vm.current_realm;
        self.vm.current_realm = realm;
        let result = f(&mut self.vm);
        self.vm.current_realm = saved;
        self.finish(result)
    }

    // ==================== Realms and modules ====================

    /// Create a realm with its own global object and intrinsics
    pub fn create_realm(&mut self) -> Result<RealmId, EngineException> {
        let result = realm::create(&mut self.vm);
        self.finish(result)
    }

    /// Global object of `realm`
    pub fn realm_global(&self, realm: RealmId) -> ObjectId {
        self.vm.realm(realm).global
    }

    /// Take ownership of a bytecode module
    pub fn load_module(&mut self, module: Module) -> Arc<Module> {
        debug!(
            module = module.source_url.as_str(),
            functions = module.functions.len(),
            "module loaded"
        );
        Arc::new(module)
    }

    /// Function object for function `index` of `module`
    pub fn create_closure(
        &mut self,
        realm: RealmId,
        module: &Arc<Module>,
        index: u32,
    ) -> Result<Value, EngineException> {
        self.in_realm(realm, |vm| vm.new_closure(module, index, realm).map(Value::Object))
    }

    /// Host function callable from scripts
    pub fn new_native_function<F>(&mut self, realm: RealmId, name: &str, func: F) -> Result<Value, EngineException>
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.in_realm(realm, |vm| {
            let kind = FunctionKind::Native {
                name: Arc::from(name),
                func: Arc::new(func),
                realm,
            };
            let proto = vm.realm(realm).intrinsics.function_prototype;
            Ok(Value::Object(vm.alloc(ObjectKind::Function(kind), Some(proto))))
        })
    }

    // ==================== Calls and properties ====================

    /// Call `callee` with `this` and `args`
    pub fn call(&mut self, callee: &Value, this: &Value, args: &[Value]) -> Result<Value, EngineException> {
        let result = self.vm.call(callee, this, args);
        self.finish(result)
    }

    /// `base[key]`
    pub fn get(&mut self, base: &Value, key: &str) -> Result<Value, EngineException> {
        let result = property::get_value(&mut self.vm, base, &PropertyKey::from_str(key));
        self.finish(result)
    }

    /// `base[key] = value` with strict-mode failure reporting
    pub fn set(&mut self, base: &Value, key: &str, value: Value) -> Result<(), EngineException> {
        let result = property::set_value(&mut self.vm, base, &PropertyKey::from_str(key), value, true);
        self.finish(result)
    }

    /// `Object.defineProperty(object, key, desc)`
    pub fn define_property(
        &mut self,
        object: ObjectId,
        key: &str,
        desc: PropertyDescriptor,
    ) -> Result<(), EngineException> {
        let result = property::define_own_property(&mut self.vm, object, &PropertyKey::from_str(key), desc, true);
        self.finish(result.map(drop))
    }

    /// `Object.getOwnPropertyDescriptor(object, key)`
    pub fn get_own_property_descriptor(
        &mut self,
        object: ObjectId,
        key: &str,
    ) -> Result<Option<PropertyDescriptor>, EngineException> {
        let result = property::get_own_property(&mut self.vm, object, &PropertyKey::from_str(key));
        self.finish(result)
    }

    // ==================== Objects ====================

    /// `{}` in `realm`
    pub fn new_object(&mut self, realm: RealmId) -> Result<ObjectId, EngineException> {
        self.in_realm(realm, |vm| Ok(vm.new_plain_object()))
    }

    /// Array literal in `realm`
    pub fn new_array(&mut self, realm: RealmId, elements: Vec<Value>) -> Result<ObjectId, EngineException> {
        self.in_realm(realm, |vm| Ok(vm.new_array(elements)))
    }

    /// `new Proxy(target, handler)`
    pub fn new_proxy(&mut self, target: &Value, handler: &Value) -> Result<ObjectId, EngineException> {
        let result = proxy::create(&mut self.vm, target, handler);
        self.finish(result)
    }

    /// Revoke a proxy
    pub fn revoke_proxy(&mut self, proxy: ObjectId) -> Result<(), EngineException> {
        let result = proxy::revoke(&mut self.vm, proxy);
        self.finish(result)
    }

    /// `new ArrayBuffer(length, { maxByteLength })`
    pub fn new_array_buffer(
        &mut self,
        realm: RealmId,
        byte_length: usize,
        max_byte_length: Option<usize>,
    ) -> Result<ObjectId, EngineException> {
        self.in_realm(realm, |vm| typed_array::create_buffer(vm, byte_length, max_byte_length))
    }

    /// `buffer.resize(length)`
    pub fn resize_array_buffer(&mut self, buffer: ObjectId, byte_length: usize) -> Result<(), EngineException> {
        let result = typed_array::resize_buffer(&mut self.vm, buffer, byte_length);
        self.finish(result)
    }

    /// `new <Kind>Array(buffer, byteOffset, length)`
    pub fn new_typed_array(
        &mut self,
        realm: RealmId,
        kind: TypedArrayKind,
        buffer: ObjectId,
        byte_offset: usize,
        length: Option<usize>,
    ) -> Result<ObjectId, EngineException> {
        self.in_realm(realm, |vm| typed_array::create_view(vm, kind, buffer, byte_offset, length))
    }

    /// `generator.next(value)`
    pub fn generator_next(&mut self, generator: &Value, value: Value) -> Result<IteratorStep, EngineException> {
        let result = generator::resume(&mut self.vm, generator, ResumeMode::Next, value);
        self.finish(result)
    }

    /// `generator.return(value)`
    pub fn generator_return(&mut self, generator: &Value, value: Value) -> Result<IteratorStep, EngineException> {
        let result = generator::resume(&mut self.vm, generator, ResumeMode::Return, value);
        self.finish(result)
    }

    // ==================== Testing hooks ====================

    fn closure_key(&self, function: &Value) -> Option<FunctionKey> {
        match &self.vm.heap.get(function.as_object()?).kind {
            ObjectKind::Function(FunctionKind::Closure { module, index, .. }) => {
                Some(FunctionKey::new(module.module_id, *index))
            }
            _ => None,
        }
    }

    /// Override the tier policy of a closure's function; false if `function`
    /// is not a bytecode closure
    pub fn force_tier(&self, function: &Value, tier: ForcedTier) -> bool {
        match self.closure_key(function) {
            Some(key) => {
                self.vm.controller.force_tier(key, tier);
                true
            }
            None => false,
        }
    }

    /// Tier state of a closure's function
    pub fn tier_state(&self, function: &Value) -> Option<TierState> {
        self.closure_key(function).map(|key| self.vm.controller.state(key))
    }

    /// Controller counters of a closure's function
    pub fn function_info(&self, function: &Value) -> Option<FunctionTierInfo> {
        self.vm.controller.function_info(self.closure_key(function)?)
    }

    /// Whether the instruction at `pc` of a closure's function ever ran in
    /// the baseline tier
    pub fn has_basic_block_executed(&self, function: &Value, pc: usize) -> bool {
        let Some(ObjectKind::Function(FunctionKind::Closure { module, index, .. })) =
            function.as_object().map(|id| &self.vm.heap.get(id).kind)
        else {
            return false;
        };
        module.function(*index).is_some_and(|function| {
            function.with_site(pc, |site| site.is_some_and(|site| site.execution_count > 0))
        })
    }

    /// Wait for queued background compiles; returns how many are still pending
    pub fn wait_for_background(&self, timeout: Duration) -> usize {
        self.vm.controller.wait_for_background(timeout)
    }

    // ==================== Diagnostics ====================

    /// Counters of the tier controller, shape table, heap and megamorphic cache
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tier: self.vm.controller.stats(),
            shapes: self.vm.shapes.stats(),
            objects: self.vm.heap.len(),
            megamorphic: self.vm.megamorphic.stats(),
        }
    }

    /// Current shape of an object
    pub fn shape_of(&self, object: ObjectId) -> ShapeId {
        self.vm.heap.get(object).shape
    }

    /// Install a hook run at every safepoint
    pub fn set_safepoint_hook(&mut self, hook: impl SafepointHook + 'static) {
        self.vm.safepoint_hook = Some(Box::new(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polymorphic_cap_is_clamped() {
        assert_eq!(EngineConfig::default().with_polymorphic_cap(0).polymorphic_cap, 1);
        assert_eq!(EngineConfig::default().with_polymorphic_cap(100).polymorphic_cap, 8);
        assert_eq!(EngineConfig::default().polymorphic_cap, 4);
        assert_eq!(EngineConfig::default().max_call_depth, 512);
    }

    #[test]
    fn unknown_realm_is_rejected() {
        let mut engine = Engine::new(EngineConfig::default());
        assert!(engine.new_object(RealmId(3)).is_err());
        let realm = engine.create_realm().unwrap();
        let object = engine.new_object(realm).unwrap();
        assert_eq!(
            engine.vm().heap().get(object).proto,
            Some(engine.vm().realm(realm).intrinsics.object_prototype)
        );
    }

    #[test]
    fn non_callable_reports_typeof() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.create_realm().unwrap();
        let err = engine.call(&Value::Int32(1), &Value::Undefined, &[]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: number is not a function");
    }

    /// `function f(x) { if (x < 100) return 1; return 2; }`
    fn below_hundred() -> tern_vm_bytecode::Function {
        use tern_vm_bytecode::{Function, Instruction, LocalIndex, Register};
        let mut b = Function::builder()
            .name("f")
            .param_count(1)
            .local_count(1)
            .register_count(3);
        let otherwise = b.label();
        b.push(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        });
        b.push(Instruction::LoadInt32 {
            dst: Register(1),
            value: 100,
        });
        b.push(Instruction::Lt {
            dst: Register(2),
            lhs: Register(0),
            rhs: Register(1),
        });
        b.jump_if_false(Register(2), otherwise);
        b.push(Instruction::LoadInt32 {
            dst: Register(1),
            value: 1,
        });
        b.push(Instruction::Return { src: Register(1) });
        b.bind(otherwise);
        b.push(Instruction::LoadInt32 {
            dst: Register(1),
            value: 2,
        });
        b.push(Instruction::Return { src: Register(1) });
        b.build()
    }

    #[test]
    fn warmed_int32_comparison_compiles_to_int32_compare() {
        use tern_vm_jit::{CompareOp, SpecOp};

        let tier = TierConfig::default().synchronous().with_hot_call_threshold(5);
        let mut engine = Engine::new(EngineConfig::default().with_tier(tier));
        let realm = engine.create_realm().unwrap();
        let mut builder = Module::builder("compare.js");
        builder.add_function(below_hundred());
        let module = engine.load_module(builder.build().unwrap());
        let f = engine.create_closure(realm, &module, 0).unwrap();

        for x in 0..50 {
            assert_eq!(engine.call(&f, &Value::Undefined, &[Value::Int32(x)]).unwrap(), Value::Int32(1));
        }
        let key = engine.closure_key(&f).unwrap();
        let code = engine.vm().controller().compiled_code(key).expect("optimized code");
        assert!(code.ops.iter().any(|op| matches!(op, SpecOp::Int32Compare { op: CompareOp::Lt, .. })));
        assert!(!code.ops.iter().any(|op| matches!(op, SpecOp::NumberCompare { .. })));
    }

    #[test]
    fn stats_serialize_to_json() {
        let mut engine = Engine::new(EngineConfig::default());
        let realm = engine.create_realm().unwrap();
        engine.new_object(realm).unwrap();
        let json = serde_json::to_value(engine.stats()).unwrap();
        assert_eq!(json["tier"]["deopts"], 0);
        assert_eq!(json["megamorphic"]["hits"], 0);
        assert!(json["objects"].as_u64().unwrap() > 0);
        assert!(json["shapes"]["shapes"].as_u64().unwrap() > 0);
    }
}
