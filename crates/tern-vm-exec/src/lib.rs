//! # Tern VM Exec
//!
//! Execution-tier coordination for the optimizing tier:
//! - invocation and back-edge counters per function
//! - compilation lifecycle (synchronous or on a background worker)
//! - deopt accounting with exponential backoff and site pessimization
//!
//! The controller never runs code. The VM core asks it what to do at
//! function entry and at loop back-edges, and reports every exit taken by
//! optimized code.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod controller;
mod jit_queue;
pub mod stats;
mod worker;

pub use config::TierConfig;
pub use controller::{
    BackEdgeDecision, DeoptOutcome, EntryDecision, ForcedTier, FunctionKey, FunctionTierInfo, TierController,
    TierState,
};
pub use stats::TierStats;
