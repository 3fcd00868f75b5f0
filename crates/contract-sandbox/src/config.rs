//! Sandbox configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constants::limits::{
        DEFAULT_FUEL_LIMIT, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MEMORY_LIMIT, DEFAULT_TIME_LIMIT_MS,
        MAX_STATE_DISCOVERY_ATTEMPTS,
    },
    FeeSchedule, MemoryLimit,
};

/// Process-level configuration of an [`Executor`](crate::Executor) and the
/// [`StateDiscoveryDriver`](crate::StateDiscoveryDriver).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Whether compiled modules are cached by content hash. When disabled, every call compiles
    /// its module on a fresh engine that is dropped afterwards.
    pub cache_enabled: bool,
    /// Limits applied to calls that do not specify their own.
    pub default_limits: ExecutionLimits,
    /// Ceilings of the lazy state-access driver.
    pub discovery: DiscoveryLimits,
    /// Fee accounting parameters.
    pub fees: FeeSchedule,
    /// The maximum nesting depth of `call_program`.
    pub max_call_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            default_limits: ExecutionLimits::default(),
            discovery: DiscoveryLimits::default(),
            fees: FeeSchedule::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl SandboxConfig {
    /// Sets whether compiled modules are cached.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the default execution limits.
    pub fn with_default_limits(mut self, limits: ExecutionLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Sets the state-discovery ceilings.
    pub fn with_discovery(mut self, discovery: DiscoveryLimits) -> Self {
        self.discovery = discovery;
        self
    }

    /// Sets the maximum nesting depth of `call_program`.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

/// The fuel, wall-clock and memory budget of a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// The fuel budget.
    pub fuel_limit: u64,
    /// The wall-clock budget in milliseconds.
    pub time_limit_ms: u64,
    /// The memory limit of a single linear memory in bytes. A negative value disables the limit
    /// and is meant for testing only.
    pub memory_limit_bytes: i64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            fuel_limit: DEFAULT_FUEL_LIMIT,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl ExecutionLimits {
    /// Returns the wall-clock budget.
    pub const fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    /// Returns the memory limit.
    pub fn memory_limit(&self) -> MemoryLimit {
        MemoryLimit::from_signed(self.memory_limit_bytes)
    }
}

/// Ceilings of the lazy state-access driver.
///
/// Each attempt is a full re-execution with its own fuel and time limits. The cumulative ceilings
/// bound the total work spent across attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryLimits {
    /// The maximum number of attempts.
    pub max_attempts: u32,
    /// The maximum fuel consumed across all attempts.
    pub cumulative_fuel_limit: Option<u64>,
    /// The maximum wall time spent across all attempts, in milliseconds.
    pub cumulative_time_limit_ms: Option<u64>,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_attempts: MAX_STATE_DISCOVERY_ATTEMPTS,
            cumulative_fuel_limit: None,
            cumulative_time_limit_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"cache_enabled":false,"default_limits":{"fuel_limit":5}}"#)
                .unwrap();
        assert!(!config.cache_enabled);
        assert_eq!(config.default_limits.fuel_limit, 5);
        assert_eq!(config.default_limits.time_limit_ms, DEFAULT_TIME_LIMIT_MS);
        assert_eq!(config.discovery.max_attempts, MAX_STATE_DISCOVERY_ATTEMPTS);
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn test_negative_memory_limit_is_unlimited() {
        let limits = ExecutionLimits { memory_limit_bytes: -1, ..Default::default() };
        assert_eq!(limits.memory_limit(), MemoryLimit::Unlimited);
    }
}
