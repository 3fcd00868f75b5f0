//! Named groups of host functions exposed to sandboxed code.

use std::{collections::BTreeMap, fmt, sync::Arc};

use alloy_primitives::Bytes;
use tracing::trace;
use wasmtime::{Caller, Linker};

use crate::{context::SandboxState, marshal::pack_region, CallInfo, HostError, SandboxError};

/// A host function returning bytes to the guest.
pub type OutputHandler = dyn Fn(&mut CallInfo, &[u8]) -> Result<Bytes, HostError> + Send + Sync;

/// A host function with side effects only.
pub type NoOutputHandler = dyn Fn(&mut CallInfo, &[u8]) -> Result<(), HostError> + Send + Sync;

/// A host function callable from sandboxed code.
///
/// Both shapes receive their input as a `(ptr, len)` region of guest memory. A
/// [`HostFunction::WithOutput`] function returns its result as a single `i64` packing the
/// `(ptr, len)` of bytes the host allocated in guest memory. A [`HostFunction::NoOutput`] function
/// returns nothing.
#[derive(Clone)]
pub enum HostFunction {
    /// `(ptr: i32, len: i32) -> i64`
    WithOutput(Arc<OutputHandler>),
    /// `(ptr: i32, len: i32) -> ()`
    NoOutput(Arc<NoOutputHandler>),
}

impl HostFunction {
    /// Wraps a handler returning bytes to the guest.
    pub fn with_output<F>(handler: F) -> Self
    where
        F: Fn(&mut CallInfo, &[u8]) -> Result<Bytes, HostError> + Send + Sync + 'static,
    {
        Self::WithOutput(Arc::new(handler))
    }

    /// Wraps a side-effect-only handler.
    pub fn no_output<F>(handler: F) -> Self
    where
        F: Fn(&mut CallInfo, &[u8]) -> Result<(), HostError> + Send + Sync + 'static,
    {
        Self::NoOutput(Arc::new(handler))
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithOutput(_) => f.write_str("HostFunction::WithOutput"),
            Self::NoOutput(_) => f.write_str("HostFunction::NoOutput"),
        }
    }
}

/// A named set of host functions, linked as one import namespace.
#[derive(Clone, Debug)]
pub struct ImportModule {
    name: String,
    functions: BTreeMap<String, HostFunction>,
}

impl ImportModule {
    /// Creates an empty import module.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), functions: BTreeMap::new() }
    }

    /// Adds a function to the module, replacing any function with the same name.
    pub fn with_function(mut self, name: impl Into<String>, function: HostFunction) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Returns the import namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the function registered under `name`.
    pub fn function(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    /// Iterates over the function names.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// The set of import modules linked into every sandbox instance.
///
/// A registry is built once and read-only afterwards. It holds no per-call state: everything a
/// handler mutates lives on the [`CallInfo`] of the call being served.
#[derive(Clone, Debug, Default)]
pub struct HostRegistry {
    modules: BTreeMap<String, ImportModule>,
}

impl HostRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` as `module.name`.
    pub fn register(&mut self, module: &str, name: &str, function: HostFunction) {
        self.modules
            .entry(module.to_string())
            .or_insert_with(|| ImportModule::new(module))
            .functions
            .insert(name.to_string(), function);
    }

    /// Adds every function of `module`, replacing functions with the same name.
    pub fn with_module(mut self, module: ImportModule) -> Self {
        for (name, function) in module.functions {
            self.register(&module.name, &name, function);
        }
        self
    }

    /// Returns the import module named `name`.
    pub fn module(&self, name: &str) -> Option<&ImportModule> {
        self.modules.get(name)
    }

    /// Iterates over the import modules.
    pub fn modules(&self) -> impl Iterator<Item = &ImportModule> {
        self.modules.values()
    }

    /// Defines every registered function in `linker`.
    pub(crate) fn link(&self, linker: &mut Linker<SandboxState>) -> Result<(), SandboxError> {
        for module in self.modules.values() {
            for (name, function) in &module.functions {
                let import = (module.name.clone(), name.clone());
                let defined = match function {
                    HostFunction::WithOutput(handler) => {
                        let handler = Arc::clone(handler);
                        linker.func_wrap(
                            &module.name,
                            name,
                            move |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| {
                                call_with_output(&mut caller, &import, &*handler, ptr, len)
                            },
                        )
                    }
                    HostFunction::NoOutput(handler) => {
                        let handler = Arc::clone(handler);
                        linker.func_wrap(
                            &module.name,
                            name,
                            move |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| {
                                call_no_output(&mut caller, &import, &*handler, ptr, len)
                            },
                        )
                    }
                };
                defined.map_err(|err| {
                    SandboxError::Engine(format!("failed to link {}.{name}: {err:#}", module.name))
                })?;
            }
        }
        Ok(())
    }
}

fn call_with_output(
    caller: &mut Caller<'_, SandboxState>,
    import: &(String, String),
    handler: &OutputHandler,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i64> {
    let output = dispatch(caller, import, ptr, len, handler).and_then(|bytes| {
        let memory = caller.data().memory.clone().ok_or(HostError::MemoryUnavailable)?;
        let (ptr, len) = memory.write(&mut *caller, &bytes)?;
        Ok(pack_region(ptr, len))
    });
    output.map_err(|err| raise(caller, err))
}

fn call_no_output(
    caller: &mut Caller<'_, SandboxState>,
    import: &(String, String),
    handler: &NoOutputHandler,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<()> {
    dispatch(caller, import, ptr, len, handler).map_err(|err| raise(caller, err))
}

/// Runs `handler` with the store's fuel mirrored into the call context.
fn dispatch<R>(
    caller: &mut Caller<'_, SandboxState>,
    (module, name): &(String, String),
    ptr: i32,
    len: i32,
    handler: impl FnOnce(&mut CallInfo, &[u8]) -> Result<R, HostError>,
) -> Result<R, HostError> {
    let input = match (ptr, len) {
        (_, 0) => Vec::new(),
        _ => {
            let memory = caller.data().memory.clone().ok_or(HostError::MemoryUnavailable)?;
            memory.read(&*caller, ptr, len)?
        }
    };
    trace!(%module, %name, input_len = input.len(), "Host call");

    let fuel = caller.get_fuel().map_err(|err| HostError::Store(format!("{err:#}")))?;
    caller.data_mut().call.remaining_fuel = fuel;
    let output = handler(&mut caller.data_mut().call, &input);
    let remaining = caller.data().call.remaining_fuel;
    caller.set_fuel(remaining).map_err(|err| HostError::Store(format!("{err:#}")))?;
    output
}

/// Records `err` on the call context and turns it into a trap.
fn raise(caller: &mut Caller<'_, SandboxState>, err: HostError) -> wasmtime::Error {
    caller.data_mut().call.signal = Some(err.clone());
    wasmtime::Error::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_replace() {
        let mut registry = HostRegistry::new()
            .with_module(ImportModule::new("m").with_function(
                "f",
                HostFunction::with_output(|_, input| Ok(Bytes::copy_from_slice(input))),
            ));
        registry.register("m", "g", HostFunction::no_output(|_, _| Ok(())));
        registry.register("m", "f", HostFunction::no_output(|_, _| Ok(())));

        let module = registry.module("m").unwrap();
        assert_eq!(module.function_names().collect::<Vec<_>>(), vec!["f", "g"]);
        assert!(matches!(module.function("f"), Some(HostFunction::NoOutput(_))));
    }
}
