use core::convert::Infallible;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use alloy_primitives::Bytes;

use crate::{KeyPostfix, StateProvider};

/// An in-memory state provider for testing purposes.
///
/// Absent keys are served as empty values, the way an authoritative state source reports state
/// that was never written.
#[derive(Debug, Default)]
pub struct MemoryStateProvider {
    values: BTreeMap<KeyPostfix, Bytes>,
    fetches: AtomicUsize,
}

impl MemoryStateProvider {
    /// Sets the value of a key.
    pub fn set_value(&mut self, key: impl Into<KeyPostfix>, value: impl Into<Bytes>) {
        self.values.insert(key.into(), value.into());
    }

    /// Sets the value of a key.
    pub fn with_value(mut self, key: impl Into<KeyPostfix>, value: impl Into<Bytes>) -> Self {
        self.set_value(key, value);
        self
    }

    /// Returns the stored value of a key.
    pub fn value(&self, key: &KeyPostfix) -> Option<&Bytes> {
        self.values.get(key)
    }

    /// Applies the writes of a successful call.
    pub fn commit(&mut self, updated_keys: &BTreeMap<KeyPostfix, Bytes>) {
        self.values.extend(updated_keys.iter().map(|(key, value)| (key.clone(), value.clone())));
    }

    /// Returns how many keys were fetched so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl StateProvider for MemoryStateProvider {
    type Error = Infallible;

    fn fetch(&self, key: &KeyPostfix) -> Result<Bytes, Self::Error> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.values.get(key).cloned().unwrap_or_default())
    }
}

/// A state provider that fails every fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStateProvider;

impl StateProvider for FailingStateProvider {
    type Error = &'static str;

    fn fetch(&self, _key: &KeyPostfix) -> Result<Bytes, Self::Error> {
        Err("state source unavailable")
    }
}
