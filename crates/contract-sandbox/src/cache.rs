//! Content-addressed cache of compiled modules.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use wasmtime::{Config, Engine, Module};

use crate::SandboxError;

/// Returns the cache key of `bytecode`: the first 8 bytes of its SHA-256 digest, little-endian.
pub fn content_hash(bytecode: &[u8]) -> u64 {
    let digest = Sha256::digest(bytecode);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Returns the engine configuration every sandbox engine is created with: fuel metering and
/// epoch-based interruption enabled.
pub(crate) fn engine_config() -> Config {
    let mut config = Config::new();
    config.consume_fuel(true);
    config.epoch_interruption(true);
    config
}

pub(crate) fn new_engine() -> Result<Engine, SandboxError> {
    Engine::new(&engine_config()).map_err(|err| SandboxError::Engine(format!("{err:#}")))
}

fn compile(engine: &Engine, bytecode: &[u8]) -> Result<Module, SandboxError> {
    Module::new(engine, bytecode).map_err(|err| SandboxError::Compile(format!("{err:#}")))
}

/// The modules one invocation is instantiated from, together with the engine that compiled them.
#[derive(Clone)]
pub(crate) struct PreparedModules {
    pub(crate) engine: Engine,
    pub(crate) user: Module,
    pub(crate) support: Module,
}

/// A content-addressed cache of compiled modules plus the shared runtime-support module.
///
/// Each content hash owns its own [`OnceCell`], so concurrent callers wanting the same uncached
/// module wait for a single compilation while callers wanting different modules compile in
/// parallel. The map lock is only held to look up or insert a cell, never across a compilation.
///
/// When caching is disabled, [`Self::prepare`] compiles on a fresh engine for every call and the
/// support module is rebuilt from its serialized artifact, so no compiled state outlives the call.
pub struct ModuleCache {
    engine: Engine,
    enabled: bool,
    modules: RwLock<HashMap<u64, Arc<OnceCell<Module>>>>,
    support: Module,
    support_artifact: Arc<[u8]>,
}

impl core::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("enabled", &self.enabled)
            .field("cached_modules", &self.len())
            .finish_non_exhaustive()
    }
}

impl ModuleCache {
    /// Creates a cache and compiles the runtime-support module.
    ///
    /// A support module that does not compile is fatal: no invocation can run without it.
    pub fn new(enabled: bool, support_bytecode: &[u8]) -> Result<Self, SandboxError> {
        let engine = new_engine()?;
        let support = compile(&engine, support_bytecode)?;
        let support_artifact = support
            .serialize()
            .map_err(|err| SandboxError::Engine(format!("failed to serialize support module: {err:#}")))?
            .into();
        debug!(enabled, "Module cache initialized");
        Ok(Self { engine, enabled, modules: RwLock::default(), support, support_artifact })
    }

    /// Returns whether compiled modules are retained.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the shared engine of the cache.
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the shared runtime-support module.
    pub const fn get_support_module(&self) -> &Module {
        &self.support
    }

    /// Returns the compiled module for `bytecode`, compiling it on a miss.
    ///
    /// With caching disabled the module is compiled on every call and not retained.
    pub fn get_or_compile(&self, bytecode: &[u8]) -> Result<Module, SandboxError> {
        if !self.enabled {
            return compile(&self.engine, bytecode);
        }

        let hash = content_hash(bytecode);
        let cached =
            self.modules.read().unwrap_or_else(PoisonError::into_inner).get(&hash).cloned();
        let cell = match cached {
            Some(cell) => cell,
            None => self
                .modules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(hash)
                .or_default()
                .clone(),
        };

        if let Some(module) = cell.get() {
            trace!(hash, "Module cache hit");
            return Ok(module.clone());
        }
        cell.get_or_try_init(|| {
            debug!(hash, len = bytecode.len(), "Compiling module");
            compile(&self.engine, bytecode)
        })
        .cloned()
    }

    /// Returns the number of modules retained by the cache.
    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// Returns `true` if no module is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the engine and modules for one invocation of `bytecode`.
    pub(crate) fn prepare(&self, bytecode: &[u8]) -> Result<PreparedModules, SandboxError> {
        if self.enabled {
            return Ok(PreparedModules {
                engine: self.engine.clone(),
                user: self.get_or_compile(bytecode)?,
                support: self.support.clone(),
            });
        }

        let engine = new_engine()?;
        let user = compile(&engine, bytecode)?;
        // SAFETY: the artifact was produced by `Module::serialize` in `Self::new` with the same
        // engine configuration and is never exposed outside of the cache.
        let support = unsafe { Module::deserialize(&engine, &self.support_artifact) }
            .map_err(|err| SandboxError::Engine(format!("failed to load support module: {err:#}")))?;
        Ok(PreparedModules { engine, user, support })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::contracts;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(content_hash(b"abc"), u64::from_le_bytes([0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea]));
    }

    #[test]
    fn test_cache_compiles_once() {
        let cache = ModuleCache::new(true, contracts::SUPPORT.as_bytes()).unwrap();
        assert!(cache.is_empty());
        cache.get_or_compile(contracts::ECHO.as_bytes()).unwrap();
        cache.get_or_compile(contracts::ECHO.as_bytes()).unwrap();
        assert_eq!(cache.len(), 1);
        cache.get_or_compile(contracts::NOOP.as_bytes()).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_disabled_cache_retains_nothing() {
        let cache = ModuleCache::new(false, contracts::SUPPORT.as_bytes()).unwrap();
        let prepared = cache.prepare(contracts::ECHO.as_bytes()).unwrap();
        assert!(!Engine::same(&prepared.engine, cache.engine()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compile_error() {
        let cache = ModuleCache::new(true, contracts::SUPPORT.as_bytes()).unwrap();
        assert!(matches!(cache.get_or_compile(b"\0asm garbage"), Err(SandboxError::Compile(_))));
        // A failed compilation leaves the cell empty.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_support_module_is_fatal() {
        assert!(matches!(ModuleCache::new(true, b"not wasm"), Err(SandboxError::Compile(_))));
    }
}
