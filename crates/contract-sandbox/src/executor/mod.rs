//! The sandbox executor.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::{Address, Bytes};
use tracing::{debug, warn};
use wasmtime::{Instance, Linker, Module, Store, Trap, UpdateDeadline};

use crate::{
    cache::PreparedModules,
    constants::abi::{ENTRY_POINT, OUT_OF_MEMORY, SUPPORT_MODULE},
    context::SandboxState,
    host,
    marshal::OutputBlob,
    state::check_capacity,
    CallInfo, ExecutionOutcome, ExecutionParameters, ExecutionResult, HostError, HostRegistry,
    ImportModule, KeyPostfix, MemoryLimit, ModuleCache, SandboxConfig, SandboxError, SnapshotState,
    StateSnapshot, StateView,
};

mod guest;
pub(crate) use guest::GuestMemory;

mod limiter;
pub(crate) use limiter::MemoryLimiter;

mod program;
pub use program::*;

mod support;
pub use support::DEFAULT_SUPPORT_MODULE;

mod watchdog;
pub(crate) use watchdog::{DeadlineFlag, Watchdog};

/// Runs sandboxed modules under fuel, wall-clock and memory limits.
///
/// An executor is cheap to clone and safe to share between threads. Concurrent invocations run on
/// independent stores and share only the read-only module cache and host registry.
#[derive(Clone, Debug)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

#[derive(Debug)]
struct ExecutorInner {
    config: SandboxConfig,
    cache: ModuleCache,
    registry: HostRegistry,
}

/// Builds an [`Executor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    config: SandboxConfig,
    support: Option<Bytes>,
    modules: Vec<ImportModule>,
}

impl ExecutorBuilder {
    /// Sets the configuration.
    pub fn with_config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the built-in runtime-support module.
    pub fn with_support_module(mut self, bytecode: impl Into<Bytes>) -> Self {
        self.support = Some(bytecode.into());
        self
    }

    /// Links an additional import module next to the standard ones.
    pub fn with_import_module(mut self, module: ImportModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Compiles the support module and builds the executor.
    ///
    /// Fails if the support module does not compile.
    pub fn build(self) -> Result<Executor, SandboxError> {
        let support = match &self.support {
            Some(bytecode) => bytecode.as_ref(),
            None => DEFAULT_SUPPORT_MODULE.as_bytes(),
        };
        let cache = ModuleCache::new(self.config.cache_enabled, support)?;
        let registry = host::extended(self.modules);
        Ok(Executor { inner: Arc::new(ExecutorInner { config: self.config, cache, registry }) })
    }
}

impl Executor {
    /// Creates an executor with the built-in support module.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        Self::builder().with_config(config).build()
    }

    /// Returns a builder.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    /// Returns the module cache.
    pub fn cache(&self) -> &ModuleCache {
        &self.inner.cache
    }

    /// Returns the host registry linked into every instance.
    pub fn registry(&self) -> &HostRegistry {
        &self.inner.registry
    }

    /// Creates parameters for `bytecode` with the configured default limits.
    pub fn parameters(&self, bytecode: impl Into<Bytes>) -> ExecutionParameters {
        ExecutionParameters::new(bytecode).with_limits(self.config().default_limits)
    }

    /// Executes one attempt against `snapshot`.
    ///
    /// A contract-level failure is returned as a complete result with `success == false`. A read
    /// of a key absent from `snapshot` ends the attempt with [`ExecutionOutcome::MissingKey`].
    pub fn execute(
        &self,
        params: &ExecutionParameters,
        snapshot: &StateSnapshot,
    ) -> Result<ExecutionOutcome, SandboxError> {
        params.validate()?;
        if params.memory_limit == MemoryLimit::Unlimited {
            warn!("Executing without a memory limit");
        }
        let call = CallInfo::new(
            Address::ZERO,
            params.actor.clone(),
            params.function_name.clone(),
            params.payload.clone(),
            params.fuel_limit,
            StateView::Snapshot(SnapshotState::new(snapshot.clone())),
        )
        .with_callback(params.callback.clone());

        let frame = self.run(&params.bytecode, call, params.time_limit, params.memory_limit)?;
        let (outcome, _) = frame.finish()?;
        debug!(
            fuel_consumed = outcome.fuel_consumed(),
            wall_time = ?outcome.wall_time(),
            missing_key = matches!(outcome, ExecutionOutcome::MissingKey { .. }),
            "Execution finished"
        );
        Ok(outcome)
    }

    /// Instantiates `bytecode` next to the support module and runs its entry point.
    pub(crate) fn run(
        &self,
        bytecode: &[u8],
        call: CallInfo,
        time_limit: Duration,
        memory_limit: MemoryLimit,
    ) -> Result<Frame, SandboxError> {
        let fuel_limit = call.fuel_limit;
        let PreparedModules { engine, user, support } = self.inner.cache.prepare(bytecode)?;

        let mut linker = Linker::new(&engine);
        self.inner.registry.link(&mut linker)?;

        let mut store = Store::new(&engine, SandboxState::new(call, memory_limit));
        store.limiter(|state| &mut state.limiter);
        store.set_fuel(fuel_limit).map_err(engine_error)?;
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            if ctx.data().deadline.fired() {
                Err(Trap::Interrupt.into())
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let started = Instant::now();
        let watchdog = Watchdog::start(&engine, time_limit, store.data().deadline.clone());
        let called = instantiate_and_call(&mut store, &mut linker, &user, &support);
        let fired = watchdog.finish();
        let wall_time = started.elapsed();

        let remaining = store.get_fuel().map_err(engine_error)?;
        let fuel_consumed = fuel_limit.saturating_sub(remaining);
        let exit = classify(&mut store, called, fired, time_limit, fuel_consumed, fuel_limit)?;
        Ok(Frame { call: store.into_data().call, fuel_consumed, wall_time, exit })
    }
}

/// How a frame's entry point ended, short of a hard error.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// The entry point returned.
    Returned,
    /// Memory growth was denied and the guest failed as a consequence.
    OutOfMemory,
    /// The guest trapped.
    Trapped(String),
    /// A host function raised [`HostError::MissingKey`].
    MissingKey(KeyPostfix),
    /// A host function raised [`HostError::ContractFailure`].
    ContractFailure(String),
}

/// A finished frame.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) call: CallInfo,
    pub(crate) fuel_consumed: u64,
    pub(crate) wall_time: Duration,
    pub(crate) exit: FrameExit,
}

impl Frame {
    /// Assembles the outcome of the frame.
    ///
    /// An output blob written by the guest takes precedence for the output and the success flag.
    /// The access set tracked by the state view is always part of the result, and every write is
    /// held to the chunk capacity of its key.
    pub(crate) fn finish(self) -> Result<(ExecutionOutcome, CallInfo), SandboxError> {
        let Self { mut call, fuel_consumed, wall_time, exit } = self;
        let (read_keys, updated_keys) = match &call.state {
            StateView::Snapshot(state) => (state.read_keys().to_vec(), state.updated_keys().clone()),
            StateView::Program(_) => Default::default(),
        };
        let missing = |key| ExecutionOutcome::MissingKey { key, fuel_consumed, wall_time };

        let mut result = match exit {
            FrameExit::MissingKey(key) => return Ok((missing(key), call)),
            FrameExit::OutOfMemory => {
                ExecutionResult { read_keys, ..ExecutionResult::failure(OUT_OF_MEMORY) }
            }
            FrameExit::Trapped(error) | FrameExit::ContractFailure(error) => {
                ExecutionResult { read_keys, ..ExecutionResult::failure(error) }
            }
            FrameExit::Returned => match call.output_blob.take() {
                Some(blob) => {
                    let blob = OutputBlob::decode(&blob)?;
                    if let Some(key) = blob.missing_key {
                        return Ok((missing(key), call));
                    }
                    merge_observed(blob.into_result(), read_keys, updated_keys)?
                }
                None => ExecutionResult {
                    output: call.result.take().unwrap_or_default(),
                    success: call.failure.is_none(),
                    error: call.failure.take().unwrap_or_default(),
                    updated_keys,
                    read_keys,
                    ..Default::default()
                },
            },
        };
        if result.success {
            let oversize = result
                .updated_keys
                .iter()
                .find_map(|(key, value)| check_capacity(key, value).err());
            if let Some(error) = oversize {
                result =
                    ExecutionResult { read_keys: result.read_keys, ..ExecutionResult::failure(error) };
            }
        }
        result.fuel_consumed = fuel_consumed;
        result.wall_time = wall_time;
        result.debug_log = std::mem::take(&mut call.debug_log);
        result.discard_writes_on_failure();
        Ok((ExecutionOutcome::Complete(result), call))
    }
}

/// Folds the access set observed through `state.*` into a result taken from an output blob.
///
/// Observed reads the blob does not list are appended in first-access order. Observed writes are
/// added to the blob's writes. A blob that reports a different value for an observed write is
/// rejected.
fn merge_observed(
    mut result: ExecutionResult,
    read_keys: Vec<KeyPostfix>,
    updated_keys: BTreeMap<KeyPostfix, Bytes>,
) -> Result<ExecutionResult, SandboxError> {
    let mut listed: BTreeSet<KeyPostfix> = result.read_keys.iter().cloned().collect();
    for key in read_keys {
        if listed.insert(key.clone()) {
            result.read_keys.push(key);
        }
    }
    if !result.success {
        return Ok(result);
    }
    for (key, value) in updated_keys {
        match result.updated_keys.get(&key) {
            Some(reported) if *reported != value => {
                return Err(SandboxError::MalformedOutput(format!(
                    "output blob reports a different value for {key} than was written"
                )))
            }
            Some(_) => {}
            None => {
                result.updated_keys.insert(key, value);
            }
        }
    }
    Ok(result)
}

enum CallError {
    Instantiate(wasmtime::Error),
    NoEntryPoint(String),
    Call(wasmtime::Error),
}

fn instantiate_and_call(
    store: &mut Store<SandboxState>,
    linker: &mut Linker<SandboxState>,
    user: &Module,
    support: &Module,
) -> Result<(), CallError> {
    let support_instance = linker.instantiate(&mut *store, support).map_err(CallError::Instantiate)?;
    linker
        .instance(&mut *store, SUPPORT_MODULE, support_instance)
        .map_err(CallError::Instantiate)?;
    let instance: Instance = linker.instantiate(&mut *store, user).map_err(CallError::Instantiate)?;

    let memory = GuestMemory::resolve(&mut *store, &[instance, support_instance]);
    store.data_mut().memory = memory;

    let function_name = store.data().call.function_name.clone();
    let entry = instance
        .get_typed_func::<(), ()>(&mut *store, &function_name)
        .or_else(|_| instance.get_typed_func::<(), ()>(&mut *store, ENTRY_POINT))
        .map_err(|_| CallError::NoEntryPoint(function_name))?;
    entry.call(&mut *store, ()).map_err(CallError::Call)
}

/// Maps the way a frame ended onto a [`FrameExit`] or a hard error.
///
/// A fired watchdog wins over everything else. Control signals recorded by host functions come
/// next, then fuel exhaustion, then denied memory growth.
fn classify(
    store: &mut Store<SandboxState>,
    called: Result<(), CallError>,
    fired: bool,
    time_limit: Duration,
    fuel_consumed: u64,
    fuel_limit: u64,
) -> Result<FrameExit, SandboxError> {
    if fired {
        warn!(?time_limit, "Execution timed out");
        return Err(SandboxError::Timeout { limit: time_limit });
    }
    let (err, instantiating) = match called {
        Ok(()) => return Ok(FrameExit::Returned),
        Err(CallError::NoEntryPoint(name)) => {
            return Err(SandboxError::Instantiation(format!(
                "module exports neither `{name}` nor `{ENTRY_POINT}`"
            )))
        }
        Err(CallError::Instantiate(err)) => (err, true),
        Err(CallError::Call(err)) => (err, false),
    };

    let signal = store.data_mut().call.signal.take();
    match signal {
        Some(HostError::MissingKey(key)) => return Ok(FrameExit::MissingKey(key)),
        Some(HostError::ContractFailure(error)) => return Ok(FrameExit::ContractFailure(error)),
        _ => {}
    }
    let trap = err.downcast_ref::<Trap>().copied();
    if trap == Some(Trap::OutOfFuel) || (signal.is_some() && fuel_consumed == fuel_limit) {
        return Err(SandboxError::FuelExhausted { limit: fuel_limit, consumed: fuel_consumed });
    }
    if trap == Some(Trap::Interrupt) {
        return Err(SandboxError::Timeout { limit: time_limit });
    }
    // A denied growth only explains failures that touch guest memory. Any other signal is a hard
    // error even if the guest saw `memory.grow` fail earlier.
    let denied = store.data().limiter.denied();
    match signal {
        Some(HostError::Allocation(_) | HostError::MemoryAccess { .. }) | None if denied => {
            return Ok(FrameExit::OutOfMemory)
        }
        Some(signal) => return Err(signal.into()),
        None => {}
    }
    match trap {
        Some(trap) if !instantiating => Ok(FrameExit::Trapped(trap.to_string())),
        _ if instantiating => Err(SandboxError::Instantiation(format!("{err:#}"))),
        _ => Err(engine_error(err)),
    }
}

fn engine_error(err: wasmtime::Error) -> SandboxError {
    SandboxError::Engine(format!("{err:#}"))
}
