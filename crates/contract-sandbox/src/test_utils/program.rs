use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use alloy_primitives::{Address, Bytes};

use crate::{HostError, ProgramLoader, ProgramStore, SharedProgramStore};

/// An in-memory program store for testing purposes.
#[derive(Debug, Default, Clone)]
pub struct MemoryProgramStore {
    values: HashMap<Vec<u8>, Bytes>,
}

impl MemoryProgramStore {
    /// Sets the value of a full key.
    pub fn with_value(mut self, key: impl AsRef<[u8]>, value: impl Into<Bytes>) -> Self {
        self.values.insert(key.as_ref().to_vec(), value.into());
        self
    }

    /// Returns the value of a full key.
    pub fn value(&self, key: &[u8]) -> Option<Bytes> {
        self.values.get(key).cloned()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Wraps the store for use by the nested-call runtime, returning the concrete handle next to
    /// the shared one.
    pub fn shared(self) -> (Arc<Mutex<Self>>, SharedProgramStore) {
        let store = Arc::new(Mutex::new(self));
        let shared: SharedProgramStore = store.clone();
        (store, shared)
    }
}

impl ProgramStore for MemoryProgramStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, HostError> {
        Ok(self.values.get(key).cloned())
    }

    fn insert(&mut self, key: &[u8], value: Bytes) -> Result<(), HostError> {
        self.values.insert(key.to_vec(), value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), HostError> {
        self.values.remove(key);
        Ok(())
    }
}

/// A program loader that counts how often it was asked for bytecode.
#[derive(Debug, Default)]
pub struct CountingLoader {
    programs: HashMap<Address, Bytes>,
    loads: AtomicUsize,
}

impl CountingLoader {
    /// Registers the bytecode of a program.
    pub fn with_program(mut self, program: Address, code: impl AsRef<[u8]>) -> Self {
        self.programs.insert(program, Bytes::copy_from_slice(code.as_ref()));
        self
    }

    /// Returns how many times bytecode was loaded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl ProgramLoader for CountingLoader {
    fn load(&self, program: Address) -> Result<Bytes, HostError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.programs.get(&program).cloned().ok_or(HostError::UnknownProgram(program))
    }
}
