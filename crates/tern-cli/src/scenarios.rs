//! Built-in scenarios exercising tier-up, OSR and deoptimization

use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tern_vm_bytecode::{ConstantIndex, Function, Instruction, LocalIndex, Module, Register};
use tern_vm_core::convert::primitive_to_string;
use tern_vm_core::{
    Engine, EngineConfig, EngineException, EngineStats, PropertyAttributes, PropertyDescriptor, RealmId, Value,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Speculate on one branch, then take the other
    BranchExit,
    /// BigInt operands reaching code warmed with numbers
    BigintMix,
    /// Elided `arguments` object rebuilt at a forced exit
    Arguments,
    /// Store cache meeting a property made read-only, then an accessor
    IcAttributes,
    /// Long loop entered through OSR, overflowing int32
    LoopOsr,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::BranchExit,
        Scenario::BigintMix,
        Scenario::Arguments,
        Scenario::IcAttributes,
        Scenario::LoopOsr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::BranchExit => "branch-exit",
            Scenario::BigintMix => "bigint-mix",
            Scenario::Arguments => "arguments",
            Scenario::IcAttributes => "ic-attributes",
            Scenario::LoopOsr => "loop-osr",
        }
    }
}

/// One observed result
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub label: String,
    pub value: String,
}

/// Everything a scenario observed, plus engine counters at the end
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub outcomes: Vec<Outcome>,
    pub stats: EngineStats,
}

/// Run `scenario` in a fresh engine
pub fn run(scenario: Scenario, config: EngineConfig) -> Result<ScenarioReport> {
    let mut engine = Engine::new(config);
    let realm = engine.create_realm()?;
    let mut report = Report::default();

    tracing::info!(scenario = scenario.name(), "running scenario");
    match scenario {
        Scenario::BranchExit => branch_exit(&mut engine, realm, &mut report)?,
        Scenario::BigintMix => bigint_mix(&mut engine, realm, &mut report)?,
        Scenario::Arguments => arguments(&mut engine, realm, &mut report)?,
        Scenario::IcAttributes => ic_attributes(&mut engine, realm, &mut report)?,
        Scenario::LoopOsr => loop_osr(&mut engine, realm, &mut report)?,
    }

    Ok(ScenarioReport {
        scenario: scenario.name(),
        outcomes: report.0,
        stats: engine.stats(),
    })
}

#[derive(Default)]
struct Report(Vec<Outcome>);

impl Report {
    fn record(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.0.push(Outcome {
            label: label.into(),
            value: value.into(),
        });
    }

    fn result(&mut self, label: impl Into<String>, result: Result<Value, EngineException>) {
        let value = match result {
            Ok(value) => display(&value),
            Err(exception) => format!("threw {exception}"),
        };
        self.record(label, value);
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::BigInt(n) => format!("{n}n"),
        Value::String(s) => format!("{s:?}"),
        other => primitive_to_string(other).map_or_else(|| "[object]".to_string(), |s| s.to_string()),
    }
}

/// Closures for every function of a module whose constants are `strings` then `bigints`
fn load(
    engine: &mut Engine,
    realm: RealmId,
    strings: &[&str],
    bigints: &[&str],
    functions: Vec<Function>,
) -> Result<Vec<Value>> {
    let mut builder = Module::builder("scenario.js");
    for s in strings {
        builder.constants_mut().add_string(s);
    }
    for digits in bigints {
        builder.constants_mut().add_bigint(digits);
    }
    let count = functions.len() as u32;
    for function in functions {
        builder.add_function(function);
    }
    let module = engine.load_module(builder.build().context("invalid scenario bytecode")?);
    (0..count)
        .map(|index| Ok(engine.create_closure(realm, &module, index)?))
        .collect()
}

/// Let queued background compiles land before the interesting call
fn settle(engine: &Engine) {
    let pending = engine.wait_for_background(SETTLE_TIMEOUT);
    if pending > 0 {
        tracing::warn!(pending, "background compiles still queued");
    }
}

fn call(engine: &mut Engine, f: &Value, args: &[Value]) -> Result<Value, EngineException> {
    engine.call(f, &Value::Undefined, args)
}

fn record_tier(engine: &Engine, report: &mut Report, f: &Value) {
    if let Some(info) = engine.function_info(f) {
        report.record("tier state", format!("{:?}", info.state));
        report.record("deopts", info.deopts.to_string());
        if !info.pessimized_sites.is_empty() {
            report.record("pessimized sites", format!("{:?}", info.pessimized_sites));
        }
    }
}

/// `function f(x) { return x > 20 ? 20 : 30; }`
fn branchy() -> Function {
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
        value: 20,
    });
    b.push(Instruction::Gt {
        dst: Register(2),
        lhs: Register(0),
        rhs: Register(1),
    });
    b.jump_if_false(Register(2), otherwise);
    b.push(Instruction::Return { src: Register(1) });
    b.bind(otherwise);
    b.push(Instruction::LoadInt32 {
        dst: Register(1),
        value: 30,
    });
    b.push(Instruction::Return { src: Register(1) });
    b.build()
}

fn branch_exit(engine: &mut Engine, realm: RealmId, report: &mut Report) -> Result<()> {
    let f = load(engine, realm, &[], &[], vec![branchy()])?.remove(0);
    let mut last = Value::Undefined;
    for _ in 0..50 {
        last = call(engine, &f, &[Value::Int32(10)])?;
    }
    report.record("f(10) x50", display(&last));
    settle(engine);
    report.result("f(25)", call(engine, &f, &[Value::Int32(25)]));
    report.result("f(10)", call(engine, &f, &[Value::Int32(10)]));
    record_tier(engine, report, &f);
    Ok(())
}

/// `function seed() { return 18446744073709551615n; }`
fn seed() -> Function {
    Function::builder()
        .name("seed")
        .register_count(1)
        .instruction(Instruction::LoadConst {
            dst: Register(0),
            idx: ConstantIndex(0),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

/// `function add(a, b) { return a + b; }`
fn add() -> Function {
    Function::builder()
        .name("add")
        .param_count(2)
        .local_count(2)
        .register_count(2)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::Add {
            dst: Register(0),
            lhs: Register(0),
            rhs: Register(1),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

fn bigint_mix(engine: &mut Engine, realm: RealmId, report: &mut Report) -> Result<()> {
    let mut closures = load(engine, realm, &[], &["18446744073709551615"], vec![seed(), add()])?.into_iter();
    let (seed, add) = closures.next().zip(closures.next()).context("scenario module is incomplete")?;

    for i in 0..30 {
        call(engine, &add, &[Value::Int32(i), Value::Int32(i)])?;
    }
    settle(engine);
    let big = call(engine, &seed, &[])?;
    report.result("add(seed, seed)", call(engine, &add, &[big.clone(), big.clone()]));
    report.result("add(seed, 1)", call(engine, &add, &[big.clone(), Value::Int32(1)]));
    report.result("add(\"n=\", seed)", call(engine, &add, &[Value::string("n="), big]));
    report.result("add(2, 3)", call(engine, &add, &[Value::Int32(2), Value::Int32(3)]));
    record_tier(engine, report, &add);
    Ok(())
}

/// ```js
/// function g() {
///   let s = 0;
///   for (let i = 0; i < arguments.length; i++) s += arguments[i];
///   // forced exit
///   return s + arguments.length;
/// }
/// ```
fn sum_arguments() -> Function {
    const LENGTH: ConstantIndex = ConstantIndex(0);
    let (s, i) = (LocalIndex(0), LocalIndex(1));
    let args = Register(0);
    let mut b = Function::builder()
        .name("g")
        .local_count(2)
        .register_count(4);
    let top = b.label();
    let done = b.label();
    b.push(Instruction::CreateArguments { dst: args });
    b.push(Instruction::LoadInt32 {
        dst: Register(1),
        value: 0,
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(1) });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.bind(top);
    b.push(Instruction::LoopHint);
    b.push(Instruction::GetLocal { dst: Register(1), idx: i });
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::Lt {
        dst: Register(3),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.jump_if_false(Register(3), done);
    b.push(Instruction::GetProp {
        dst: Register(3),
        obj: args,
        key: Register(1),
    });
    b.push(Instruction::GetLocal { dst: Register(2), idx: s });
    b.push(Instruction::Add {
        dst: Register(2),
        lhs: Register(2),
        rhs: Register(3),
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(2) });
    b.push(Instruction::Inc {
        dst: Register(1),
        src: Register(1),
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.jump(top);
    b.bind(done);
    b.push(Instruction::ForceOsrExit);
    b.push(Instruction::GetLocal { dst: Register(1), idx: s });
    b.push(Instruction::GetPropConst {
        dst: Register(2),
        obj: args,
        name: LENGTH,
    });
    b.push(Instruction::Add {
        dst: Register(1),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.push(Instruction::Return { src: Register(1) });
    b.build()
}

fn arguments(engine: &mut Engine, realm: RealmId, report: &mut Report) -> Result<()> {
    let g = load(engine, realm, &["length"], &[], vec![sum_arguments()])?.remove(0);
    let args: Vec<Value> = (1..=10).map(Value::Int32).collect();
    let mut last = Value::Undefined;
    for _ in 0..30 {
        last = call(engine, &g, &args)?;
    }
    report.record("g(1..10) x30", display(&last));
    settle(engine);
    report.result("g(1..10)", call(engine, &g, &args));
    report.result("g()", call(engine, &g, &[]));
    record_tier(engine, report, &g);
    Ok(())
}

/// `function write(o, v) { "use strict"; o.x = v; }`
fn write_x() -> Function {
    Function::builder()
        .name("write")
        .param_count(2)
        .local_count(2)
        .register_count(2)
        .is_strict(true)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetLocal {
            dst: Register(1),
            idx: LocalIndex(1),
        })
        .instruction(Instruction::SetPropConst {
            obj: Register(0),
            name: ConstantIndex(0),
            val: Register(1),
        })
        .instruction(Instruction::ReturnUndefined)
        .build()
}

/// `function read(o) { return o.x; }`
fn read_x() -> Function {
    Function::builder()
        .name("read")
        .param_count(1)
        .local_count(1)
        .register_count(1)
        .instruction(Instruction::GetLocal {
            dst: Register(0),
            idx: LocalIndex(0),
        })
        .instruction(Instruction::GetPropConst {
            dst: Register(0),
            obj: Register(0),
            name: ConstantIndex(0),
        })
        .instruction(Instruction::Return { src: Register(0) })
        .build()
}

fn ic_attributes(engine: &mut Engine, realm: RealmId, report: &mut Report) -> Result<()> {
    let mut closures = load(engine, realm, &["x"], &[], vec![write_x(), read_x()])?.into_iter();
    let (write, read) = closures.next().zip(closures.next()).context("scenario module is incomplete")?;

    let id = engine.new_object(realm)?;
    let object = Value::Object(id);
    engine.set(&object, "x", Value::Int32(0))?;
    for i in 0..30 {
        call(engine, &write, &[object.clone(), Value::Int32(i)])?;
        call(engine, &read, &[object.clone()])?;
    }
    settle(engine);
    report.result("read after warm-up", call(engine, &read, &[object.clone()]));

    let readonly = PropertyDescriptor {
        writable: Some(false),
        ..PropertyDescriptor::default()
    };
    engine.define_property(id, "x", readonly)?;
    report.result("strict write to read-only x", call(engine, &write, &[object.clone(), Value::Int32(100)]));
    report.result("read after failed write", call(engine, &read, &[object.clone()]));

    let getter = engine.new_native_function(realm, "get x", |_, _, _| Ok(Value::Int32(42)))?;
    let accessor = PropertyDescriptor::accessor(getter, Value::Undefined, PropertyAttributes::CONFIGURABLE);
    if let Err(exception) = engine.define_property(id, "x", accessor) {
        report.record("redefine x as accessor", format!("threw {exception}"));
    }
    report.result("read after redefinition", call(engine, &read, &[object]));
    record_tier(engine, report, &read);
    Ok(())
}

/// `function sum(n) { let s = 0; for (let i = 0; i < n; i++) s += i; return s; }`
fn summing_loop() -> Function {
    let (n, s, i) = (LocalIndex(0), LocalIndex(1), LocalIndex(2));
    let mut b = Function::builder()
        .name("sum")
        .param_count(1)
        .local_count(3)
        .register_count(4);
    let top = b.label();
    let done = b.label();
    b.push(Instruction::LoadInt32 {
        dst: Register(0),
        value: 0,
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(0) });
    b.push(Instruction::SetLocal { idx: i, src: Register(0) });
    b.bind(top);
    b.push(Instruction::LoopHint);
    b.push(Instruction::GetLocal { dst: Register(1), idx: i });
    b.push(Instruction::GetLocal { dst: Register(2), idx: n });
    b.push(Instruction::Lt {
        dst: Register(3),
        lhs: Register(1),
        rhs: Register(2),
    });
    b.jump_if_false(Register(3), done);
    b.push(Instruction::GetLocal { dst: Register(0), idx: s });
    b.push(Instruction::Add {
        dst: Register(0),
        lhs: Register(0),
        rhs: Register(1),
    });
    b.push(Instruction::SetLocal { idx: s, src: Register(0) });
    b.push(Instruction::Inc {
        dst: Register(1),
        src: Register(1),
    });
    b.push(Instruction::SetLocal { idx: i, src: Register(1) });
    b.jump(top);
    b.bind(done);
    b.push(Instruction::GetLocal { dst: Register(0), idx: s });
    b.push(Instruction::Return { src: Register(0) });
    b.build()
}

fn loop_osr(engine: &mut Engine, realm: RealmId, report: &mut Report) -> Result<()> {
    let sum = load(engine, realm, &[], &[], vec![summing_loop()])?.remove(0);
    report.result("sum(1000)", call(engine, &sum, &[Value::Int32(1000)]));
    settle(engine);
    report.result("sum(100000)", call(engine, &sum, &[Value::Int32(100_000)]));
    report.result("sum(1000)", call(engine, &sum, &[Value::Int32(1000)]));
    record_tier(engine, report, &sum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_vm_core::TierConfig;

    fn eager() -> EngineConfig {
        EngineConfig::default().with_tier(
            TierConfig::default()
                .synchronous()
                .with_hot_call_threshold(5)
                .with_back_edge_threshold(10),
        )
    }

    fn outcome<'a>(report: &'a ScenarioReport, label: &str) -> &'a str {
        report
            .outcomes
            .iter()
            .find(|o| o.label == label)
            .map(|o| o.value.as_str())
            .unwrap()
    }

    #[test]
    fn every_scenario_runs() {
        for scenario in Scenario::ALL {
            let report = run(scenario, eager()).unwrap();
            assert_eq!(report.scenario, scenario.name());
            assert!(!report.outcomes.is_empty());
        }
    }

    #[test]
    fn branch_exit_takes_the_other_branch() {
        let report = run(Scenario::BranchExit, eager()).unwrap();
        assert_eq!(outcome(&report, "f(10) x50"), "30");
        assert_eq!(outcome(&report, "f(25)"), "20");
        assert!(report.stats.tier.deopts >= 1);
    }

    #[test]
    fn bigint_mix_is_exact() {
        let report = run(Scenario::BigintMix, eager()).unwrap();
        assert_eq!(outcome(&report, "add(seed, seed)"), "36893488147419103230n");
        assert_eq!(
            outcome(&report, "add(seed, 1)"),
            "threw TypeError: Invalid mix of BigInt and other type in addition."
        );
        assert_eq!(outcome(&report, "add(\"n=\", seed)"), "\"n=18446744073709551615\"");
        assert_eq!(outcome(&report, "add(2, 3)"), "5");
    }

    #[test]
    fn loop_osr_matches_exact_sum() {
        let report = run(Scenario::LoopOsr, eager()).unwrap();
        assert_eq!(outcome(&report, "sum(100000)"), "4999950000");
        assert!(report.stats.tier.osr_entries >= 1);
    }

    #[test]
    fn read_only_store_throws_in_strict_code() {
        let report = run(Scenario::IcAttributes, eager()).unwrap();
        assert_eq!(
            outcome(&report, "strict write to read-only x"),
            "threw TypeError: Attempted to assign to readonly property."
        );
        assert_eq!(outcome(&report, "read after failed write"), "29");
        assert_eq!(outcome(&report, "read after redefinition"), "42");
    }

    #[test]
    fn stats_serialize_to_json() {
        let report = run(Scenario::Arguments, eager()).unwrap();
        assert_eq!(outcome(&report, "g(1..10)"), "65");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenario"], "arguments");
        assert!(json["stats"]["tier"]["deopts"].as_u64().unwrap() >= 1);
    }
}
