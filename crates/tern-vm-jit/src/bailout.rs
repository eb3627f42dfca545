//! Speculation failure reasons and deoptimization limits.
//!
//! Optimized code never reports a failed guard as an error. It stops at the
//! exit site attached to the guard and hands the activation back to the
//! baseline tier, which re-executes the guarded instruction.
//!
//! # Exit flow
//!
//! ```text
//! optimized op:
//!   guard check
//!     ├─ holds  → fast path result
//!     └─ fails  → Exit(exit_id, reason)
//!
//! VM core:
//!   rebuild baseline frame from exit site
//!   report (pc, reason) to the tier controller
//!   resume baseline at exit_site.bytecode_pc
//! ```

use std::fmt;

/// Number of deopts after which a function stays in the baseline tier.
pub const DEOPT_THRESHOLD: u32 = 10;

/// Exits at one bytecode site before that site is compiled generically.
pub const SITE_DEOPT_LIMIT: u32 = 2;

/// Why optimized code left through an exit site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailoutReason {
    /// Operand kind differs from the profiled kind.
    TypeGuard,
    /// Int32 arithmetic left the int32 range.
    Overflow,
    /// Int32 arithmetic would have produced `-0`.
    NegativeZero,
    /// Receiver shape differs from every cached shape.
    ShapeGuard,
    /// Branch went the way profiling never saw.
    BranchSpeculation,
    /// Control reached code that never ran while profiling.
    UnreachedCode,
    /// Element index outside the speculated bounds.
    BoundsCheck,
    /// Binding read while still in its temporal dead zone.
    Uninitialized,
    /// Exit requested by the testing hook.
    ForcedExit,
}

impl BailoutReason {
    /// Stable name for logs and statistics
    pub const fn name(self) -> &'static str {
        match self {
            Self::TypeGuard => "type-guard",
            Self::Overflow => "overflow",
            Self::NegativeZero => "negative-zero",
            Self::ShapeGuard => "shape-guard",
            Self::BranchSpeculation => "branch-speculation",
            Self::UnreachedCode => "unreached-code",
            Self::BoundsCheck => "bounds-check",
            Self::Uninitialized => "uninitialized",
            Self::ForcedExit => "forced-exit",
        }
    }
}

impl fmt::Display for BailoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
