//! Per-call execution parameters.

use core::fmt;
use std::{sync::Arc, time::Duration};

use alloy_primitives::Bytes;
use auto_impl::auto_impl;

use crate::{
    constants::{
        abi::ENTRY_POINT,
        limits::{MAX_MEMORY_LIMIT, WASM_PAGE_SIZE},
    },
    DeclaredKeys, ExecutionLimits, HostError, SandboxError,
};

/// The memory limit of a single linear memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Growth beyond this many bytes is denied.
    Bytes(u64),
    /// No limit. For testing only.
    Unlimited,
}

impl MemoryLimit {
    /// Interprets a signed byte count, where a negative value means [`MemoryLimit::Unlimited`].
    pub const fn from_signed(bytes: i64) -> Self {
        if bytes < 0 {
            Self::Unlimited
        } else {
            Self::Bytes(bytes as u64)
        }
    }

    /// A limit of exactly `pages` wasm pages.
    pub const fn pages(pages: u64) -> Self {
        Self::Bytes(pages * WASM_PAGE_SIZE)
    }

    /// Returns the limit in bytes, or `None` when unlimited.
    pub const fn as_bytes(&self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(*bytes),
            Self::Unlimited => None,
        }
    }
}

/// The opaque byte callback reachable from sandboxed code through `env.__callback`.
///
/// A callback is carried on the invocation context of the call that registered it, so concurrent
/// invocations never observe each other's callbacks.
#[auto_impl(&, Box, Arc)]
pub trait HostCallback: Send + Sync {
    /// Handles one callback invocation and returns the bytes handed back to the guest.
    fn call(&self, input: &[u8]) -> Result<Bytes, HostError>;
}

/// Adapts a closure into a [`HostCallback`].
pub struct FnCallback<F>(pub F);

impl<F> HostCallback for FnCallback<F>
where
    F: Fn(&[u8]) -> Result<Bytes, HostError> + Send + Sync,
{
    fn call(&self, input: &[u8]) -> Result<Bytes, HostError> {
        (self.0)(input)
    }
}

impl<F> fmt::Debug for FnCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCallback")
    }
}

/// The parameters of one sandbox invocation.
#[derive(Clone, derive_more::Debug)]
pub struct ExecutionParameters {
    /// The fuel budget. Must be non-zero.
    pub fuel_limit: u64,
    /// The wall-clock budget.
    pub time_limit: Duration,
    /// The memory limit of each linear memory.
    pub memory_limit: MemoryLimit,
    /// The module bytecode.
    pub bytecode: Bytes,
    /// The call payload.
    pub payload: Bytes,
    /// The function to invoke. Falls back to `_start` when the module does not export it.
    pub function_name: String,
    /// The identity of the caller.
    pub actor: Bytes,
    /// The per-call opaque byte callback.
    #[debug(ignore)]
    pub callback: Option<Arc<dyn HostCallback>>,
    /// The declared key permissions. When set, the state-access driver verifies the observed
    /// access set against them.
    pub declared_keys: Option<DeclaredKeys>,
}

impl ExecutionParameters {
    /// Creates parameters for `bytecode` with the default limits.
    pub fn new(bytecode: impl Into<Bytes>) -> Self {
        let limits = ExecutionLimits::default();
        Self {
            fuel_limit: limits.fuel_limit,
            time_limit: limits.time_limit(),
            memory_limit: limits.memory_limit(),
            bytecode: bytecode.into(),
            payload: Bytes::new(),
            function_name: ENTRY_POINT.to_string(),
            actor: Bytes::new(),
            callback: None,
            declared_keys: None,
        }
    }

    /// Applies every limit from `limits`.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.fuel_limit = limits.fuel_limit;
        self.time_limit = limits.time_limit();
        self.memory_limit = limits.memory_limit();
        self
    }

    /// Sets the fuel budget.
    pub fn with_fuel_limit(mut self, fuel_limit: u64) -> Self {
        self.fuel_limit = fuel_limit;
        self
    }

    /// Sets the wall-clock budget.
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    /// Sets the memory limit.
    pub fn with_memory_limit(mut self, memory_limit: MemoryLimit) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the function to invoke.
    pub fn with_function(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = function_name.into();
        self
    }

    /// Sets the caller identity.
    pub fn with_actor(mut self, actor: impl Into<Bytes>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Sets the opaque byte callback.
    pub fn with_callback(mut self, callback: Arc<dyn HostCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the declared key permissions.
    pub fn with_declared_keys(mut self, declared_keys: DeclaredKeys) -> Self {
        self.declared_keys = Some(declared_keys);
        self
    }

    /// Rejects parameters that can never be executed.
    pub fn validate(&self) -> Result<(), SandboxError> {
        validate_limits(self.fuel_limit, self.memory_limit)
    }
}

/// Rejects a zero fuel budget and memory limits beyond what the engine can address.
pub(crate) fn validate_limits(fuel_limit: u64, memory_limit: MemoryLimit) -> Result<(), SandboxError> {
    if fuel_limit == 0 {
        return Err(SandboxError::InvalidParameters("fuel limit must be non-zero".into()));
    }
    if let MemoryLimit::Bytes(bytes) = memory_limit {
        if bytes > MAX_MEMORY_LIMIT {
            return Err(SandboxError::InvalidParameters(format!(
                "memory limit {bytes} exceeds the engine maximum of {MAX_MEMORY_LIMIT}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fuel_is_rejected() {
        let params = ExecutionParameters::new(Bytes::new()).with_fuel_limit(0);
        assert!(matches!(params.validate(), Err(SandboxError::InvalidParameters(_))));
    }

    #[test]
    fn test_memory_limit_bound() {
        let params = ExecutionParameters::new(Bytes::new());
        assert!(params.clone().with_memory_limit(MemoryLimit::pages(65_536)).validate().is_ok());
        assert!(params
            .clone()
            .with_memory_limit(MemoryLimit::Bytes(MAX_MEMORY_LIMIT + 1))
            .validate()
            .is_err());
        assert!(params.with_memory_limit(MemoryLimit::Unlimited).validate().is_ok());
    }

    #[test]
    fn test_fn_callback() {
        let callback = FnCallback(|input: &[u8]| Ok::<_, HostError>(Bytes::copy_from_slice(input)));
        assert_eq!(callback.call(&[1, 2]).unwrap(), Bytes::from(vec![1u8, 2]));
    }
}
