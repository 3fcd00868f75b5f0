//! The lazy state-access driver.
//!
//! A contract is never handed the whole state. Each attempt runs against the keys discovered so
//! far. When the contract reads a key the snapshot does not hold, the attempt ends with
//! [`ExecutionOutcome::MissingKey`], the driver fetches that key from the authoritative
//! [`StateProvider`] and the contract is re-executed from its entry point against the extended
//! snapshot.

use std::time::{Duration, Instant};

use alloy_primitives::Bytes;
use auto_impl::auto_impl;
use tracing::{debug, warn};

use crate::{
    DiscoveryLimits, ExecutionOutcome, ExecutionParameters, ExecutionResult, Executor,
    FeeSchedule, KeyPostfix, SandboxError, StallReason, StateSnapshot,
};

/// The authoritative source of contract state.
#[auto_impl(&, Box, Arc)]
pub trait StateProvider: Send + Sync {
    /// The error type of the provider.
    type Error: core::fmt::Display;

    /// Returns the value stored under `key`. Absent state is returned as empty bytes.
    fn fetch(&self, key: &KeyPostfix) -> Result<Bytes, Self::Error>;
}

/// The result of a call driven to completion by a [`StateDiscoveryDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// The result of the final attempt.
    pub result: ExecutionResult,
    /// The number of attempts that ended on a missing key.
    pub retries: u32,
    /// The snapshot the final attempt ran against.
    pub snapshot: StateSnapshot,
    /// The fuel consumed across all attempts.
    pub total_fuel_consumed: u64,
    /// The wall-clock time spent across all attempts.
    pub total_wall_time: Duration,
    /// The compute units charged for the call, derived from the final attempt.
    pub compute_units: u64,
}

/// Drives calls through repeated attempts until every key they read is known.
#[derive(Clone, Debug)]
pub struct StateDiscoveryDriver<P> {
    executor: Executor,
    provider: P,
    limits: DiscoveryLimits,
    fees: FeeSchedule,
}

impl<P: StateProvider> StateDiscoveryDriver<P> {
    /// Creates a driver with the discovery limits and fee schedule of the executor's
    /// configuration.
    pub fn new(executor: Executor, provider: P) -> Self {
        let limits = executor.config().discovery;
        let fees = executor.config().fees;
        Self { executor, provider, limits, fees }
    }

    /// Overrides the discovery limits.
    pub fn with_limits(mut self, limits: DiscoveryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the fee schedule.
    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Returns the executor.
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Returns the state provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Executes `params` starting from `initial_state`, fetching missing keys until the call
    /// completes.
    ///
    /// Every attempt is a full re-execution under the per-attempt limits of `params`. The
    /// snapshot only ever grows between attempts. When `params` carries declared keys, the access
    /// set of the final attempt must be covered by them.
    pub fn run_with_state_discovery(
        &self,
        params: &ExecutionParameters,
        initial_state: StateSnapshot,
    ) -> Result<DiscoveryResult, SandboxError> {
        let mut snapshot = initial_state;
        let mut total_fuel_consumed = 0u64;
        let mut total_wall_time = Duration::ZERO;
        let started = Instant::now();

        for attempt in 0..self.limits.max_attempts {
            let outcome = self.executor.execute(params, &snapshot)?;
            total_fuel_consumed = total_fuel_consumed.saturating_add(outcome.fuel_consumed());
            total_wall_time += outcome.wall_time();

            let key = match outcome {
                ExecutionOutcome::Complete(result) => {
                    if let Some(declared) = &params.declared_keys {
                        declared.verify(&result, &snapshot)?;
                    }
                    let compute_units = self.fees.compute_units(result.fuel_consumed);
                    debug!(
                        retries = attempt,
                        success = result.success,
                        total_fuel_consumed,
                        compute_units,
                        "State discovery finished"
                    );
                    return Ok(DiscoveryResult {
                        result,
                        retries: attempt,
                        snapshot,
                        total_fuel_consumed,
                        total_wall_time,
                        compute_units,
                    });
                }
                ExecutionOutcome::MissingKey { key, .. } => key,
            };

            let value = self.provider.fetch(&key).map_err(|err| SandboxError::StateProvider {
                key: key.clone(),
                message: err.to_string(),
            })?;
            debug!(attempt, %key, len = value.len(), "Fetched missing key");
            if !snapshot.extend_with(key.clone(), value) {
                warn!(attempt, %key, "Contract reported a key the snapshot already holds");
            }
            self.check_cumulative(attempt + 1, total_fuel_consumed, started.elapsed())?;
        }

        warn!(attempts = self.limits.max_attempts, "State discovery stalled");
        Err(SandboxError::ExecutionStalled {
            attempts: self.limits.max_attempts,
            reason: StallReason::AttemptsExhausted,
        })
    }

    /// Builds the initial snapshot from the keys `params` declares readable and runs the call.
    ///
    /// Without declared keys discovery starts from an empty snapshot.
    pub fn run_declared(
        &self,
        params: &ExecutionParameters,
    ) -> Result<DiscoveryResult, SandboxError> {
        let initial_state = match &params.declared_keys {
            Some(declared) => declared.precache(&self.provider)?,
            None => StateSnapshot::new(),
        };
        self.run_with_state_discovery(params, initial_state)
    }

    fn check_cumulative(
        &self,
        attempts: u32,
        consumed: u64,
        elapsed: Duration,
    ) -> Result<(), SandboxError> {
        if let Some(limit) = self.limits.cumulative_fuel_limit {
            if consumed > limit {
                warn!(attempts, consumed, limit, "Cumulative fuel ceiling exceeded");
                return Err(SandboxError::ExecutionStalled {
                    attempts,
                    reason: StallReason::CumulativeFuel { limit, consumed },
                });
            }
        }
        if let Some(limit) = self.limits.cumulative_time_limit_ms.map(Duration::from_millis) {
            if elapsed > limit {
                warn!(attempts, ?elapsed, ?limit, "Cumulative time ceiling exceeded");
                return Err(SandboxError::ExecutionStalled {
                    attempts,
                    reason: StallReason::CumulativeTime { limit },
                });
            }
        }
        Ok(())
    }
}
