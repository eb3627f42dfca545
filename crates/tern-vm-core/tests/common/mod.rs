//! Helpers shared by the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use tern_vm_bytecode::{Function, Module};
use tern_vm_core::{Engine, EngineConfig, RealmId, TierConfig, Value};

/// Tier policy that compiles on the calling thread after a few calls
pub fn eager_tier() -> TierConfig {
    TierConfig::default()
        .synchronous()
        .with_hot_call_threshold(5)
        .with_back_edge_threshold(10)
}

/// Engine plus one realm
pub fn engine_with(tier: TierConfig) -> (Engine, RealmId) {
    let mut engine = Engine::new(EngineConfig::default().with_tier(tier));
    let realm = engine.create_realm().unwrap();
    (engine, realm)
}

/// Module holding `functions`, with string constants interned in order
pub fn module(strings: &[&str], functions: Vec<Function>) -> Module {
    let mut builder = Module::builder("test.js");
    for s in strings {
        builder.constants_mut().add_string(s);
    }
    for function in functions {
        builder.add_function(function);
    }
    builder.build().unwrap()
}

/// Closures for every function of `module`, in module order
pub fn load(engine: &mut Engine, realm: RealmId, module: Module) -> Vec<Value> {
    let count = module.functions.len() as u32;
    let module: Arc<Module> = engine.load_module(module);
    (0..count)
        .map(|index| engine.create_closure(realm, &module, index).unwrap())
        .collect()
}

/// Call with `undefined` as the receiver
pub fn call(engine: &mut Engine, f: &Value, args: &[Value]) -> Value {
    engine.call(f, &Value::Undefined, args).unwrap()
}

/// Numbers compared by value, `NaN` equal to itself and `-0` distinct from `0`
pub fn same_number(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}
