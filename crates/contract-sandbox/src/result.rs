use std::{collections::BTreeMap, time::Duration};

use alloy_primitives::Bytes;

use crate::KeyPostfix;

/// The outcome of a call that was evaluated, successfully or not.
///
/// A contract-level failure still consumes fuel and is reported here with `success == false`.
/// A failed result never carries updated keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// The bytes returned by the contract.
    pub output: Bytes,
    /// Whether the contract completed successfully.
    pub success: bool,
    /// The contract-level error text. Empty on success.
    pub error: String,
    /// The keys written by the contract and their new values.
    pub updated_keys: BTreeMap<KeyPostfix, Bytes>,
    /// The keys read by the contract, in first-access order.
    pub read_keys: Vec<KeyPostfix>,
    /// The fuel consumed by the call.
    pub fuel_consumed: u64,
    /// The wall time taken by the call.
    pub wall_time: Duration,
    /// Lines written by the contract through `sandbox.log`.
    pub debug_log: Vec<String>,
}

impl ExecutionResult {
    /// A successful result carrying `output`.
    pub fn success(output: impl Into<Bytes>) -> Self {
        Self { output: output.into(), success: true, ..Default::default() }
    }

    /// A contract-level failure carrying `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: error.into(), ..Default::default() }
    }

    /// Drops the updated keys of a failed result, so a failure never commits partial state.
    pub(crate) fn discard_writes_on_failure(&mut self) {
        if !self.success {
            self.updated_keys.clear();
        }
    }
}

/// The outcome of a single executor invocation in lazy state-access mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The call completed (successfully or with a contract-level failure).
    Complete(ExecutionResult),
    /// The call stopped because it read a key that is not in the snapshot.
    MissingKey {
        /// The key to fetch before retrying.
        key: KeyPostfix,
        /// The fuel consumed by the aborted attempt.
        fuel_consumed: u64,
        /// The wall time taken by the aborted attempt.
        wall_time: Duration,
    },
}

impl ExecutionOutcome {
    /// Returns the fuel consumed by the attempt.
    pub const fn fuel_consumed(&self) -> u64 {
        match self {
            Self::Complete(result) => result.fuel_consumed,
            Self::MissingKey { fuel_consumed, .. } => *fuel_consumed,
        }
    }

    /// Returns the wall time taken by the attempt.
    pub const fn wall_time(&self) -> Duration {
        match self {
            Self::Complete(result) => result.wall_time,
            Self::MissingKey { wall_time, .. } => *wall_time,
        }
    }

    /// Returns the result if the call completed.
    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            Self::Complete(result) => Some(result),
            Self::MissingKey { .. } => None,
        }
    }
}
