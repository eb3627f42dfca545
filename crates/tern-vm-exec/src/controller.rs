//! Per-function tier state machine.
//!
//! ```text
//! NotCompiled ──first entry──▶ Baseline ──calls / back-edges──▶ OsrPending
//!                                 ▲                                 │ compiled
//!                                 │                                 ▼
//!                   Deoptimized(n) ◀──────── exit taken ──────── Optimizing
//! ```
//!
//! After `n` deopts both thresholds are multiplied by
//! `backoff_factor^min(n, max_backoff_shift)`. A bytecode site whose guard
//! failed `site_deopt_limit` times is compiled generically from then on, and
//! a function that reached `deopt_threshold` deopts stays in the baseline
//! tier for good.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tern_vm_bytecode::Module;
use tern_vm_jit::{BailoutReason, CompiledCode, OptimizingCompiler, can_translate_function};
use tracing::{debug, info, warn};

use crate::config::TierConfig;
use crate::jit_queue::{CompileQueue, CompileRequest};
use crate::stats::TierStats;
use crate::worker::{BackgroundWorker, CompileResult};

/// Identity of a function across the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionKey {
    /// Owning module
    pub module_id: u64,
    /// Index in the module's function table
    pub function_index: u32,
}

impl FunctionKey {
    /// Create a key
    pub const fn new(module_id: u64, function_index: u32) -> Self {
        Self {
            module_id,
            function_index,
        }
    }
}

/// Tier state of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TierState {
    /// Never executed
    #[default]
    NotCompiled,
    /// Running in the baseline tier
    Baseline,
    /// Compilation requested, not installed yet
    OsrPending,
    /// Optimized code installed
    Optimizing,
    /// Optimized code was thrown away after the n-th deopt
    Deoptimized(u32),
}

/// Testing override of the tier policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ForcedTier {
    /// Follow the thresholds
    #[default]
    Default,
    /// Never optimize (`noInline`)
    BaselineOnly,
    /// Optimize as soon as one call has been profiled, synchronously
    Optimize,
}

/// What to run for a new activation
#[derive(Debug, Clone)]
pub enum EntryDecision {
    /// Interpret the bytecode
    Baseline,
    /// Run optimized code
    Optimized(Arc<CompiledCode>),
}

/// What to do at a loop back-edge of a baseline activation
#[derive(Debug, Clone)]
pub enum BackEdgeDecision {
    /// Keep interpreting
    Continue,
    /// Transfer the activation into optimized code
    Osr {
        /// Code to enter
        code: Arc<CompiledCode>,
        /// First op to execute
        op_index: usize,
    },
}

/// Result of reporting a deopt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptOutcome {
    /// Deopts of the function so far
    pub deopts: u32,
    /// This exit made its site generic
    pub site_pessimized: bool,
    /// This exit pinned the function to the baseline tier
    pub pinned: bool,
}

/// Per-function view for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionTierInfo {
    /// Current state
    pub state: TierState,
    /// Calls since the last deopt
    pub calls: u32,
    /// Back-edges since the last deopt
    pub back_edges: u32,
    /// Total deopts
    pub deopts: u32,
    /// Generic sites, sorted
    pub pessimized_sites: Vec<u32>,
    /// Pinned to the baseline tier
    pub pinned: bool,
    /// Cannot be optimized at all
    pub ineligible: bool,
    /// Holds optimized code
    pub optimized: bool,
}

#[derive(Debug, Default)]
struct TierRecord {
    state: TierState,
    calls: u32,
    back_edges: u32,
    deopts: u32,
    site_exits: FxHashMap<u32, u32>,
    pessimized: FxHashSet<u32>,
    code: Option<Arc<CompiledCode>>,
    /// Bumped whenever the assumptions of in-flight compiles go stale
    epoch: u64,
    forced: ForcedTier,
    pinned: bool,
    ineligible: bool,
}

impl TierRecord {
    fn drop_code(&mut self) {
        self.code = None;
        self.epoch += 1;
        if matches!(self.state, TierState::Optimizing | TierState::OsrPending) {
            self.state = TierState::Baseline;
        }
    }
}

#[derive(Default)]
struct ControllerState {
    records: FxHashMap<FunctionKey, TierRecord>,
    queue: CompileQueue,
    worker: Option<BackgroundWorker>,
    worker_failed: bool,
    in_flight: usize,
    stats: TierStats,
}

/// Tier-up controller shared by every activation of an engine
pub struct TierController {
    config: TierConfig,
    compiler: OptimizingCompiler,
    inner: Mutex<ControllerState>,
}

impl std::fmt::Debug for TierController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TierController {
    /// Create a controller
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            compiler: OptimizingCompiler::new(),
            inner: Mutex::new(ControllerState::default()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    fn may_optimize(&self, record: &TierRecord) -> bool {
        self.config.enabled && !record.pinned && !record.ineligible && record.forced != ForcedTier::BaselineOnly
    }

    /// Called before every activation of a function
    pub fn on_function_entry(&self, module: &Arc<Module>, function_index: u32) -> EntryDecision {
        let key = FunctionKey::new(module.module_id, function_index);
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        self.poll_background(state);

        let record = state.records.entry(key).or_default();
        if record.state == TierState::NotCompiled {
            record.state = TierState::Baseline;
        }
        record.calls = record.calls.saturating_add(1);
        if !self.may_optimize(record) {
            return EntryDecision::Baseline;
        }
        if let Some(code) = record.code.clone() {
            state.stats.optimized_entries += 1;
            return EntryDecision::Optimized(code);
        }
        let threshold = match record.forced {
            ForcedTier::Optimize => 1,
            _ => self
                .config
                .scaled_threshold(self.config.hot_call_threshold, record.deopts),
        };
        if record.calls <= threshold {
            return EntryDecision::Baseline;
        }

        match self.request_compile(state, key, module) {
            Some(code) => {
                state.stats.optimized_entries += 1;
                EntryDecision::Optimized(code)
            }
            None => EntryDecision::Baseline,
        }
    }

    /// Called by a baseline activation at every `LoopHint`
    pub fn on_back_edge(&self, module: &Arc<Module>, function_index: u32, pc: usize) -> BackEdgeDecision {
        let key = FunctionKey::new(module.module_id, function_index);
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        self.poll_background(state);

        let record = state.records.entry(key).or_default();
        if !self.may_optimize(record) {
            return BackEdgeDecision::Continue;
        }
        record.back_edges = record.back_edges.saturating_add(1);
        if let Some(code) = record.code.clone() {
            return Self::osr_decision(state, code, pc);
        }
        let threshold = match record.forced {
            ForcedTier::Optimize => 1,
            _ => self
                .config
                .scaled_threshold(self.config.back_edge_threshold, record.deopts),
        };
        if record.back_edges <= threshold {
            return BackEdgeDecision::Continue;
        }

        match self.request_compile(state, key, module) {
            Some(code) => Self::osr_decision(state, code, pc),
            None => BackEdgeDecision::Continue,
        }
    }

    fn osr_decision(state: &mut ControllerState, code: Arc<CompiledCode>, pc: usize) -> BackEdgeDecision {
        match code.osr_entry(pc) {
            Some(entry) => {
                let op_index = entry.op_index;
                state.stats.osr_entries += 1;
                debug!(function = %code.name, pc, op_index, "osr entry");
                BackEdgeDecision::Osr { code, op_index }
            }
            None => BackEdgeDecision::Continue,
        }
    }

    fn request_compile(
        &self,
        state: &mut ControllerState,
        key: FunctionKey,
        module: &Arc<Module>,
    ) -> Option<Arc<CompiledCode>> {
        let function = module.function(key.function_index)?.clone();
        if state.queue.is_reserved(key) {
            return None;
        }
        if let Err(err) = can_translate_function(&function) {
            let record = state.records.entry(key).or_default();
            if !record.ineligible {
                record.ineligible = true;
                state.stats.ineligible_functions += 1;
                debug!(function = function.display_name(), %err, "not eligible for optimization");
            }
            return None;
        }

        let record = state.records.entry(key).or_default();
        record.state = TierState::OsrPending;
        let synchronous = !self.config.background || record.forced == ForcedTier::Optimize;
        let request = CompileRequest {
            key,
            module: module.clone(),
            feedback: function.feedback_snapshot(),
            function,
            pessimized: record.pessimized.clone(),
            epoch: record.epoch,
        };
        state.stats.compile_requests += 1;
        debug!(
            function = request.function.display_name(),
            synchronous,
            pessimized = request.pessimized.len(),
            "compile requested"
        );

        if !synchronous && self.ensure_worker(state) {
            if state.queue.push(request) {
                self.pump(state);
            }
            return None;
        }

        let outcome = self.compiler.compile(
            &request.function,
            &request.module.constants,
            &request.feedback,
            &request.pessimized,
        );
        Self::install(
            state,
            CompileResult {
                key,
                epoch: request.epoch,
                outcome,
            },
        )
    }

    fn ensure_worker(&self, state: &mut ControllerState) -> bool {
        if state.worker.is_some() {
            return true;
        }
        if state.worker_failed {
            return false;
        }
        match BackgroundWorker::spawn(self.compiler.clone()) {
            Ok(worker) => {
                state.worker = Some(worker);
                true
            }
            Err(err) => {
                warn!(%err, "failed to spawn background compiler, compiling synchronously");
                state.worker_failed = true;
                false
            }
        }
    }

    /// Move queued requests to the worker
    fn pump(&self, state: &mut ControllerState) {
        while let Some(request) = state.queue.pop() {
            let key = request.key;
            let submitted = state
                .worker
                .as_ref()
                .is_some_and(|worker| worker.submit(request));
            if submitted {
                state.in_flight += 1;
                continue;
            }
            warn!("background compiler stopped");
            state.queue.finish(key);
            state.worker = None;
            state.worker_failed = true;
            if let Some(record) = state.records.get_mut(&key)
                && record.state == TierState::OsrPending
            {
                record.state = TierState::Baseline;
            }
        }
    }

    fn poll_background(&self, state: &mut ControllerState) {
        while state.in_flight > 0 {
            let Some(result) = state.worker.as_ref().and_then(BackgroundWorker::try_result) else {
                break;
            };
            state.in_flight -= 1;
            state.queue.finish(result.key);
            Self::install(state, result);
        }
    }

    /// Block until every background compile has been handled or `timeout`
    /// elapsed. Returns the number of results handled.
    pub fn wait_for_background(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let mut handled = 0;
        while state.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(result) = state.worker.as_ref().and_then(|w| w.wait_result(remaining)) else {
                break;
            };
            state.in_flight -= 1;
            state.queue.finish(result.key);
            Self::install(state, result);
            handled += 1;
        }
        handled
    }

    fn install(state: &mut ControllerState, result: CompileResult) -> Option<Arc<CompiledCode>> {
        let record = state.records.get_mut(&result.key)?;
        if record.epoch != result.epoch || record.pinned || record.forced == ForcedTier::BaselineOnly {
            state.stats.compiles_discarded += 1;
            debug!(
                module_id = result.key.module_id,
                function_index = result.key.function_index,
                "stale compile discarded"
            );
            if record.state == TierState::OsrPending {
                record.state = TierState::Baseline;
            }
            return None;
        }

        match result.outcome {
            Ok(code) => {
                state.stats.compiles_succeeded += 1;
                info!(
                    function = %code.name,
                    ops = code.ops.len(),
                    speculated = code.speculated_ops,
                    "function optimized"
                );
                let code = Arc::new(code);
                record.code = Some(code.clone());
                record.state = TierState::Optimizing;
                Some(code)
            }
            Err(err) => {
                state.stats.compile_errors += 1;
                warn!(%err, "optimizing compile failed");
                if err.is_permanent() && !record.ineligible {
                    record.ineligible = true;
                    state.stats.ineligible_functions += 1;
                }
                record.state = TierState::Baseline;
                record.calls = 0;
                record.back_edges = 0;
                None
            }
        }
    }

    /// Account for an exit taken by optimized code of `key` at `pc`.
    ///
    /// The code is dropped; the function recompiles once the scaled
    /// thresholds are crossed again.
    pub fn record_deopt(&self, key: FunctionKey, pc: usize, reason: BailoutReason) -> DeoptOutcome {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let record = state.records.entry(key).or_default();

        record.deopts = record.deopts.saturating_add(1);
        record.code = None;
        record.epoch += 1;
        record.calls = 0;
        record.back_edges = 0;
        record.state = TierState::Deoptimized(record.deopts);
        state.stats.deopts += 1;

        let site = pc as u32;
        let exits = {
            let exits = record.site_exits.entry(site).or_insert(0);
            *exits += 1;
            *exits
        };
        let site_pessimized = exits >= self.config.site_deopt_limit && record.pessimized.insert(site);
        if site_pessimized {
            state.stats.pessimized_sites += 1;
            info!(pc, %reason, "site pessimized");
        }

        let pinned = record.deopts >= self.config.deopt_threshold && !record.pinned;
        if pinned {
            record.pinned = true;
            state.stats.pinned_functions += 1;
            info!(
                module_id = key.module_id,
                function_index = key.function_index,
                deopts = record.deopts,
                "function pinned to baseline"
            );
        }
        debug!(pc, %reason, deopts = record.deopts, "deopt");

        DeoptOutcome {
            deopts: record.deopts,
            site_pessimized,
            pinned,
        }
    }

    /// Override the policy for one function
    pub fn force_tier(&self, key: FunctionKey, tier: ForcedTier) {
        let mut guard = self.inner.lock();
        let record = guard.records.entry(key).or_default();
        record.forced = tier;
        if tier == ForcedTier::BaselineOnly {
            record.drop_code();
        }
    }

    /// Drop optimized code and cancel in-flight compiles.
    ///
    /// Returns whether code was installed.
    pub fn invalidate(&self, key: FunctionKey) -> bool {
        let mut guard = self.inner.lock();
        match guard.records.get_mut(&key) {
            Some(record) => {
                let had_code = record.code.is_some();
                record.drop_code();
                had_code
            }
            None => false,
        }
    }

    /// Current state of a function
    pub fn state(&self, key: FunctionKey) -> TierState {
        self.inner
            .lock()
            .records
            .get(&key)
            .map_or(TierState::NotCompiled, |record| record.state)
    }

    /// Installed optimized code
    pub fn compiled_code(&self, key: FunctionKey) -> Option<Arc<CompiledCode>> {
        self.inner.lock().records.get(&key).and_then(|r| r.code.clone())
    }

    /// Per-function diagnostics
    pub fn function_info(&self, key: FunctionKey) -> Option<FunctionTierInfo> {
        let guard = self.inner.lock();
        let record = guard.records.get(&key)?;
        let mut pessimized_sites: Vec<u32> = record.pessimized.iter().copied().collect();
        pessimized_sites.sort_unstable();
        Some(FunctionTierInfo {
            state: record.state,
            calls: record.calls,
            back_edges: record.back_edges,
            deopts: record.deopts,
            pessimized_sites,
            pinned: record.pinned,
            ineligible: record.ineligible,
            optimized: record.code.is_some(),
        })
    }

    /// Counter snapshot
    pub fn stats(&self) -> TierStats {
        let guard = self.inner.lock();
        TierStats {
            compiled_functions: guard.records.values().filter(|r| r.code.is_some()).count() as u64,
            ..guard.stats
        }
    }
}
