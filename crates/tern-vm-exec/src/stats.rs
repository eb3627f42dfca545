//! Runtime statistics of the tier controller.

use serde::Serialize;

/// Snapshot of tier-up counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// Compilations requested
    pub compile_requests: u64,
    /// Compilations that produced code
    pub compiles_succeeded: u64,
    /// Compilations that failed
    pub compile_errors: u64,
    /// Background results dropped because the profile changed meanwhile
    pub compiles_discarded: u64,
    /// Calls that started in optimized code
    pub optimized_entries: u64,
    /// Loop transfers from baseline into optimized code
    pub osr_entries: u64,
    /// Exits from optimized code back to baseline
    pub deopts: u64,
    /// Sites that are now compiled generically
    pub pessimized_sites: u64,
    /// Functions pinned to the baseline tier after repeated deopts
    pub pinned_functions: u64,
    /// Functions the optimizing tier cannot compile
    pub ineligible_functions: u64,
    /// Functions currently holding optimized code
    pub compiled_functions: u64,
}
