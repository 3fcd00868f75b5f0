//! The invocation context of a single call frame.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::{Address, Bytes};
use tracing::debug;

use crate::{
    executor::{DeadlineFlag, GuestMemory, MemoryLimiter},
    Executor, HostCallback, HostError, MemoryLimit, ProgramLoader, StateView,
};

/// The per-call state visible to host functions.
///
/// A `CallInfo` is exclusively owned by one call frame. A child frame gets its own `CallInfo`
/// carved out of the parent's remaining fuel, and only the fuel the child actually spent flows
/// back into the parent.
#[derive(derive_more::Debug)]
pub struct CallInfo {
    /// The identity of the caller.
    pub actor: Bytes,
    /// The identity of the executing program. State keys of the nested-call runtime are
    /// namespaced by it.
    pub account: Address,
    /// The function being invoked.
    pub function_name: String,
    /// The call payload.
    pub params: Bytes,
    /// The fuel budget of this frame.
    pub fuel_limit: u64,
    /// The fuel left in this frame. Kept in sync with the store around every host call.
    pub remaining_fuel: u64,
    /// The state this frame reads and writes.
    pub state: StateView,
    pub(crate) result: Option<Bytes>,
    pub(crate) output_blob: Option<Bytes>,
    pub(crate) failure: Option<String>,
    pub(crate) debug_log: Vec<String>,
    #[debug(ignore)]
    pub(crate) callback: Option<Arc<dyn HostCallback>>,
    #[debug(ignore)]
    pub(crate) runtime: Option<ProgramRuntime>,
    pub(crate) signal: Option<HostError>,
}

impl CallInfo {
    /// Creates the context of a frame.
    pub fn new(
        account: Address,
        actor: Bytes,
        function_name: String,
        params: Bytes,
        fuel_limit: u64,
        state: StateView,
    ) -> Self {
        Self {
            actor,
            account,
            function_name,
            params,
            fuel_limit,
            remaining_fuel: fuel_limit,
            state,
            result: None,
            output_blob: None,
            failure: None,
            debug_log: Vec::new(),
            callback: None,
            runtime: None,
            signal: None,
        }
    }

    pub(crate) fn with_callback(mut self, callback: Option<Arc<dyn HostCallback>>) -> Self {
        self.callback = callback;
        self
    }

    pub(crate) fn with_runtime(mut self, runtime: ProgramRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Returns the fuel left in this frame.
    pub const fn remaining_fuel(&self) -> u64 {
        self.remaining_fuel
    }

    /// Debits `fuel` from this frame.
    pub fn consume_fuel(&mut self, fuel: u64) {
        self.remaining_fuel = self.remaining_fuel.saturating_sub(fuel);
    }

    /// Stores the result scratch buffer.
    pub fn set_result(&mut self, result: Bytes) {
        self.result = Some(result);
    }

    /// Stores a complete output blob.
    pub fn set_output_blob(&mut self, blob: Bytes) {
        self.output_blob = Some(blob);
    }

    /// Marks the call as a contract-level failure.
    pub fn fail(&mut self, error: String) {
        self.failure = Some(error);
    }

    /// Appends a line to the debug log of this call.
    pub fn log(&mut self, line: String) {
        debug!(account = %self.account, line = %line, "Contract log");
        self.debug_log.push(line);
    }

    /// Returns the depth of this frame, zero for a root call.
    pub fn depth(&self) -> usize {
        self.runtime.as_ref().map_or(0, |runtime| runtime.depth)
    }
}

/// What a frame of the nested-call runtime needs to spawn child frames.
#[derive(Clone)]
pub(crate) struct ProgramRuntime {
    pub(crate) executor: Executor,
    pub(crate) loader: Arc<dyn ProgramLoader>,
    pub(crate) depth: usize,
    pub(crate) memory_limit: MemoryLimit,
    started: Instant,
    time_limit: Duration,
}

impl ProgramRuntime {
    pub(crate) fn root(
        executor: Executor,
        loader: Arc<dyn ProgramLoader>,
        time_limit: Duration,
        memory_limit: MemoryLimit,
    ) -> Self {
        Self { executor, loader, depth: 0, memory_limit, started: Instant::now(), time_limit }
    }

    pub(crate) fn child(&self) -> Self {
        Self { depth: self.depth + 1, ..self.clone() }
    }

    /// Returns what is left of the root call's wall-clock budget.
    pub(crate) fn time_left(&self) -> Duration {
        self.time_limit.saturating_sub(self.started.elapsed())
    }
}

/// The data of a sandbox store.
pub(crate) struct SandboxState {
    pub(crate) call: CallInfo,
    pub(crate) limiter: MemoryLimiter,
    pub(crate) deadline: DeadlineFlag,
    pub(crate) memory: Option<GuestMemory>,
}

impl SandboxState {
    pub(crate) fn new(call: CallInfo, memory_limit: MemoryLimit) -> Self {
        Self {
            call,
            limiter: MemoryLimiter::new(memory_limit),
            deadline: DeadlineFlag::default(),
            memory: None,
        }
    }
}
