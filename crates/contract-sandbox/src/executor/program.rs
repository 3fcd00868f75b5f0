use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes};
use auto_impl::auto_impl;
use tracing::debug;

use super::Frame;
use crate::{
    context::ProgramRuntime, params::validate_limits, CallInfo, ExecutionLimits, ExecutionOutcome,
    ExecutionResult, Executor, HostCallback, HostError, MemoryLimit, ProgramState, SandboxError,
    SharedProgramStore, StateView,
};

/// Resolves a program identity to its bytecode.
#[auto_impl(&, Box, Arc)]
pub trait ProgramLoader: Send + Sync {
    /// Returns the bytecode of `program`.
    fn load(&self, program: Address) -> Result<Bytes, HostError>;
}

/// A root call into the nested-call runtime.
#[derive(Clone, derive_more::Debug)]
pub struct ProgramCall {
    /// The program to execute.
    pub program: Address,
    /// The export to invoke. Falls back to `_start` when the program does not export it.
    pub function_name: String,
    /// The parameters handed to the program.
    pub params: Bytes,
    /// The identity of the caller.
    pub actor: Bytes,
    /// The fuel budget of the whole call tree.
    pub fuel: u64,
    /// The wall-clock budget of the whole call tree.
    pub time_limit: Duration,
    /// The memory limit of each linear memory of each frame.
    pub memory_limit: MemoryLimit,
    /// Resolves program bytecode.
    #[debug(ignore)]
    pub loader: Arc<dyn ProgramLoader>,
    /// The store the call tree reads and, on success, writes.
    #[debug(ignore)]
    pub store: SharedProgramStore,
    /// The opaque byte callback of the call tree.
    #[debug(ignore)]
    pub callback: Option<Arc<dyn HostCallback>>,
}

impl ProgramCall {
    /// Creates a call of `program` with `limits`.
    pub fn new(
        program: Address,
        loader: Arc<dyn ProgramLoader>,
        store: SharedProgramStore,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            program,
            function_name: crate::constants::abi::ENTRY_POINT.to_string(),
            params: Bytes::new(),
            actor: Bytes::new(),
            fuel: limits.fuel_limit,
            time_limit: limits.time_limit(),
            memory_limit: limits.memory_limit(),
            loader,
            store,
            callback: None,
        }
    }

    /// Sets the export to invoke.
    pub fn with_function(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = function_name.into();
        self
    }

    /// Sets the parameters.
    pub fn with_params(mut self, params: impl Into<Bytes>) -> Self {
        self.params = params.into();
        self
    }

    /// Sets the caller identity.
    pub fn with_actor(mut self, actor: impl Into<Bytes>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Sets the fuel budget.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Sets the wall-clock budget.
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    /// Sets the memory limit applied to every frame of the call.
    pub fn with_memory_limit(mut self, memory_limit: MemoryLimit) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Sets the opaque byte callback.
    pub fn with_callback(mut self, callback: Arc<dyn HostCallback>) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl Executor {
    /// Creates a root call of `program` with the configured default limits.
    pub fn program_call(
        &self,
        program: Address,
        loader: Arc<dyn ProgramLoader>,
        store: SharedProgramStore,
    ) -> ProgramCall {
        ProgramCall::new(program, loader, store, self.config().default_limits)
    }

    /// Executes a program in the nested-call runtime.
    ///
    /// Programs reach state through the `state` import module, namespaced by their own identity,
    /// and call each other through `program.call_program`. The buffered writes of the whole call
    /// tree are committed to the store only when the root call succeeds.
    pub fn call_program(&self, call: ProgramCall) -> Result<ExecutionResult, SandboxError> {
        validate_limits(call.fuel, call.memory_limit)?;
        let runtime = ProgramRuntime::root(self.clone(), call.loader, call.time_limit, call.memory_limit);
        let info = CallInfo::new(
            call.program,
            call.actor,
            call.function_name,
            call.params,
            call.fuel,
            StateView::Program(ProgramState::new(call.store)),
        )
        .with_callback(call.callback)
        .with_runtime(runtime);

        let (outcome, info) = self.run_program(info, call.time_limit)?.finish()?;
        let result = match outcome {
            ExecutionOutcome::Complete(result) => result,
            ExecutionOutcome::MissingKey { key, .. } => {
                return Err(SandboxError::Host(HostError::MissingKey(key)))
            }
        };
        if result.success {
            if let StateView::Program(state) = info.state {
                state.commit()?;
            }
        }
        debug!(
            program = %call.program,
            success = result.success,
            fuel_consumed = result.fuel_consumed,
            "Program call finished"
        );
        Ok(result)
    }

    /// Loads the bytecode of the frame's program and runs it.
    pub(crate) fn run_program(
        &self,
        call: CallInfo,
        time_limit: Duration,
    ) -> Result<Frame, SandboxError> {
        let runtime = call
            .runtime
            .as_ref()
            .ok_or(SandboxError::Host(HostError::Unavailable("program frames")))?;
        let bytecode = runtime.loader.load(call.account)?;
        let memory_limit = runtime.memory_limit;
        self.run(&bytecode, call, time_limit, memory_limit)
    }
}
