//! Tier-up configuration.

use serde::Serialize;
use tern_vm_jit::{DEOPT_THRESHOLD, SITE_DEOPT_LIMIT};

/// Calls before a function is compiled by the optimizing tier.
pub const DEFAULT_HOT_CALL_THRESHOLD: u32 = 20;

/// Loop iterations before a running loop is compiled and entered via OSR.
pub const DEFAULT_BACK_EDGE_THRESHOLD: u32 = 100;

/// Tier-up policy knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierConfig {
    /// Optimizing tier enabled at all
    pub enabled: bool,
    /// Compile on the background worker instead of the calling thread
    pub background: bool,
    /// Invocation count that triggers compilation
    pub hot_call_threshold: u32,
    /// Back-edge count that triggers compilation and OSR
    pub back_edge_threshold: u32,
    /// Deopts after which a function stays in the baseline tier
    pub deopt_threshold: u32,
    /// Exits at one site before that site is compiled generically
    pub site_deopt_limit: u32,
    /// Threshold multiplier applied once per deopt
    pub backoff_factor: u32,
    /// Cap on the number of backoff multiplications
    pub max_backoff_shift: u32,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background: true,
            hot_call_threshold: DEFAULT_HOT_CALL_THRESHOLD,
            back_edge_threshold: DEFAULT_BACK_EDGE_THRESHOLD,
            deopt_threshold: DEOPT_THRESHOLD,
            site_deopt_limit: SITE_DEOPT_LIMIT,
            backoff_factor: 2,
            max_backoff_shift: 6,
        }
    }
}

fn parse_env_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("off")
        && !value.eq_ignore_ascii_case("no")
}

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
}

impl TierConfig {
    /// Defaults overridden by `TERN_*` environment variables.
    ///
    /// - `TERN_DISABLE_JIT=1` turns the optimizing tier off
    /// - `TERN_JIT_BACKGROUND=0` compiles on the calling thread
    /// - `TERN_JIT_HOT_THRESHOLD`, `TERN_JIT_BACK_EDGE_THRESHOLD` and
    ///   `TERN_JIT_DEOPT_THRESHOLD` take positive integers
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if std::env::var("TERN_DISABLE_JIT")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
        {
            config.enabled = false;
        }
        if let Ok(value) = std::env::var("TERN_JIT_BACKGROUND") {
            config.background = parse_env_truthy(&value);
        }
        if let Some(threshold) = parse_env_u32("TERN_JIT_HOT_THRESHOLD") {
            config.hot_call_threshold = threshold;
        }
        if let Some(threshold) = parse_env_u32("TERN_JIT_BACK_EDGE_THRESHOLD") {
            config.back_edge_threshold = threshold;
        }
        if let Some(threshold) = parse_env_u32("TERN_JIT_DEOPT_THRESHOLD") {
            config.deopt_threshold = threshold;
        }
        config
    }

    /// Baseline tier only
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the invocation threshold
    pub fn with_hot_call_threshold(mut self, threshold: u32) -> Self {
        self.hot_call_threshold = threshold.max(1);
        self
    }

    /// Set the back-edge threshold
    pub fn with_back_edge_threshold(mut self, threshold: u32) -> Self {
        self.back_edge_threshold = threshold.max(1);
        self
    }

    /// Set the per-function deopt limit
    pub fn with_deopt_threshold(mut self, threshold: u32) -> Self {
        self.deopt_threshold = threshold.max(1);
        self
    }

    /// Set the per-site exit limit
    pub fn with_site_deopt_limit(mut self, limit: u32) -> Self {
        self.site_deopt_limit = limit.max(1);
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff(mut self, factor: u32, max_shift: u32) -> Self {
        self.backoff_factor = factor.max(1);
        self.max_backoff_shift = max_shift;
        self
    }

    /// Compile on the calling thread
    pub fn synchronous(mut self) -> Self {
        self.background = false;
        self
    }

    /// `base` scaled by the backoff for a function that deopted `deopts` times
    pub fn scaled_threshold(&self, base: u32, deopts: u32) -> u32 {
        let shift = deopts.min(self.max_backoff_shift);
        base.saturating_mul(self.backoff_factor.saturating_pow(shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_parsing() {
        for falsy in ["", "0", "false", "OFF", " no "] {
            assert!(!parse_env_truthy(falsy), "{falsy:?}");
        }
        for truthy in ["1", "yes", "true", "on"] {
            assert!(parse_env_truthy(truthy), "{truthy:?}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = TierConfig::default().with_backoff(2, 3);
        assert_eq!(config.scaled_threshold(10, 0), 10);
        assert_eq!(config.scaled_threshold(10, 1), 20);
        assert_eq!(config.scaled_threshold(10, 3), 80);
        assert_eq!(config.scaled_threshold(10, 9), 80);
        assert_eq!(config.scaled_threshold(u32::MAX, 2), u32::MAX);
    }

    #[test]
    fn builders_clamp_zero() {
        let config = TierConfig::default().with_hot_call_threshold(0).synchronous();
        assert_eq!(config.hot_call_threshold, 1);
        assert!(!config.background);
    }
}
