//! State views handed to host functions.
//!
//! A call sees state through a [`StateView`]. In lazy state-access mode the view is a
//! [`SnapshotState`] over the keys discovered so far, and reading anything else raises
//! [`HostError::MissingKey`]. In the nested-call runtime the view is a [`ProgramState`] that buffers
//! writes over a [`ProgramStore`] and namespaces every key by the executing program.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use alloy_primitives::{Address, Bytes};
use auto_impl::auto_impl;

use crate::{constants::keys::RELATIVE_KEY_SEPARATOR, HostError, KeyPostfix, StateSnapshot};

/// Mutable key/value storage backing the nested-call runtime.
#[auto_impl(&mut, Box)]
pub trait ProgramStore: Send {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, HostError>;

    /// Stores `value` under `key`.
    fn insert(&mut self, key: &[u8], value: Bytes) -> Result<(), HostError>;

    /// Removes `key`.
    fn remove(&mut self, key: &[u8]) -> Result<(), HostError>;
}

/// A [`ProgramStore`] shared between the frames of one call tree and its owner.
pub type SharedProgramStore = Arc<Mutex<dyn ProgramStore>>;

/// Returns the program-relative key `account || "/" || key`.
pub fn relative_key(account: Address, key: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(account.len() + 1 + key.len());
    out.extend_from_slice(account.as_slice());
    out.push(RELATIVE_KEY_SEPARATOR);
    out.extend_from_slice(key);
    out.into()
}

/// The state a call reads and writes.
#[derive(Debug)]
pub enum StateView {
    /// Lazy state-access mode.
    Snapshot(SnapshotState),
    /// Nested-call runtime.
    Program(ProgramState),
}

impl StateView {
    /// Reads `key` on behalf of `account`.
    pub fn get(&mut self, account: Address, key: &[u8]) -> Result<Bytes, HostError> {
        match self {
            Self::Snapshot(state) => state.get(&KeyPostfix::from(key)),
            Self::Program(state) => state.get(&relative_key(account, key)),
        }
    }

    /// Writes `value` under `key` on behalf of `account`.
    pub fn put(&mut self, account: Address, key: &[u8], value: Bytes) -> Result<(), HostError> {
        match self {
            Self::Snapshot(state) => state.put(KeyPostfix::from(key), value),
            Self::Program(state) => {
                state.put(relative_key(account, key), value);
                Ok(())
            }
        }
    }

    /// Deletes `key` on behalf of `account`.
    pub fn delete(&mut self, account: Address, key: &[u8]) -> Result<(), HostError> {
        match self {
            Self::Snapshot(state) => state.put(KeyPostfix::from(key), Bytes::new()),
            Self::Program(state) => {
                state.delete(relative_key(account, key));
                Ok(())
            }
        }
    }

    /// Returns the snapshot of a lazy state-access view.
    pub fn snapshot(&self) -> Option<&StateSnapshot> {
        match self {
            Self::Snapshot(state) => Some(&state.snapshot),
            Self::Program(_) => None,
        }
    }
}

/// The state view of one lazy state-access attempt.
#[derive(Debug, Default)]
pub struct SnapshotState {
    snapshot: StateSnapshot,
    read_keys: Vec<KeyPostfix>,
    seen: BTreeSet<KeyPostfix>,
    updated_keys: BTreeMap<KeyPostfix, Bytes>,
}

impl SnapshotState {
    /// Creates a view over `snapshot`.
    pub fn new(snapshot: StateSnapshot) -> Self {
        Self { snapshot, ..Default::default() }
    }

    /// Reads `key`, recording the access even when the key is missing.
    pub fn get(&mut self, key: &KeyPostfix) -> Result<Bytes, HostError> {
        if self.seen.insert(key.clone()) {
            self.read_keys.push(key.clone());
        }
        if let Some(value) = self.updated_keys.get(key) {
            return Ok(value.clone());
        }
        self.snapshot.get(key).cloned().ok_or_else(|| HostError::MissingKey(key.clone()))
    }

    /// Writes `value` under `key`.
    ///
    /// Writing the current value is a no-op. A value larger than the key's chunk capacity is a
    /// contract-level failure.
    pub fn put(&mut self, key: KeyPostfix, value: Bytes) -> Result<(), HostError> {
        check_capacity(&key, &value).map_err(HostError::ContractFailure)?;
        let current = self.updated_keys.get(&key).or_else(|| self.snapshot.get(&key));
        if current == Some(&value) {
            return Ok(());
        }
        self.updated_keys.insert(key, value);
        Ok(())
    }

    /// Returns the keys read so far, in first-access order.
    pub fn read_keys(&self) -> &[KeyPostfix] {
        &self.read_keys
    }

    /// Returns the keys written so far.
    pub const fn updated_keys(&self) -> &BTreeMap<KeyPostfix, Bytes> {
        &self.updated_keys
    }
}

/// Fails with the contract-level error text when `value` does not fit the chunks of `key`.
pub(crate) fn check_capacity(key: &KeyPostfix, value: &[u8]) -> Result<(), String> {
    if value.len() > key.capacity() {
        return Err(format!(
            "value of {} bytes exceeds the {} byte capacity of key {key}",
            value.len(),
            key.capacity()
        ));
    }
    Ok(())
}

/// The state view of one frame of the nested-call runtime.
///
/// Writes are buffered in an overlay. A child frame starts from a copy of its parent's overlay,
/// and the parent adopts the child's overlay only when the child succeeds. The root frame's
/// overlay reaches the store only through [`ProgramState::commit`].
pub struct ProgramState {
    store: SharedProgramStore,
    overlay: BTreeMap<Bytes, Option<Bytes>>,
}

impl fmt::Debug for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramState").field("overlay", &self.overlay).finish_non_exhaustive()
    }
}

impl ProgramState {
    /// Creates a root view over `store`.
    pub fn new(store: SharedProgramStore) -> Self {
        Self { store, overlay: BTreeMap::new() }
    }

    /// Reads a full key. Absent keys read as empty bytes.
    pub fn get(&self, key: &[u8]) -> Result<Bytes, HostError> {
        if let Some(value) = self.overlay.get(&Bytes::copy_from_slice(key)) {
            return Ok(value.clone().unwrap_or_default());
        }
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(store.get(key)?.unwrap_or_default())
    }

    /// Buffers a write of a full key.
    pub fn put(&mut self, key: Bytes, value: Bytes) {
        self.overlay.insert(key, Some(value));
    }

    /// Buffers a deletion of a full key.
    pub fn delete(&mut self, key: Bytes) {
        self.overlay.insert(key, None);
    }

    /// Creates the view of a child frame.
    pub fn fork(&self) -> Self {
        Self { store: Arc::clone(&self.store), overlay: self.overlay.clone() }
    }

    /// Takes over the writes of a successful child frame.
    pub fn adopt(&mut self, child: Self) {
        self.overlay = child.overlay;
    }

    /// Applies the buffered writes to the store.
    pub fn commit(self) -> Result<(), HostError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in self.overlay {
            match value {
                Some(value) => store.insert(&key, value)?,
                None => store.remove(&key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryProgramStore;

    #[test]
    fn test_snapshot_reads_are_ordered_and_recorded_on_miss() {
        let present = KeyPostfix::slot(2, 1);
        let missing = KeyPostfix::slot(1, 1);
        let mut state =
            SnapshotState::new(StateSnapshot::new().with_entry(present.clone(), vec![5u8]));

        assert_eq!(state.get(&missing), Err(HostError::MissingKey(missing.clone())));
        assert_eq!(state.get(&present).unwrap(), Bytes::from(vec![5u8]));
        assert_eq!(state.get(&present).unwrap(), Bytes::from(vec![5u8]));
        assert_eq!(state.read_keys(), &[missing, present]);
    }

    #[test]
    fn test_snapshot_skips_same_value_writes() {
        let key = KeyPostfix::slot(1, 1);
        let mut state = SnapshotState::new(StateSnapshot::new().with_entry(key.clone(), vec![1u8]));
        state.put(key.clone(), Bytes::from(vec![1u8])).unwrap();
        assert!(state.updated_keys().is_empty());
        state.put(key.clone(), Bytes::from(vec![2u8])).unwrap();
        assert_eq!(state.get(&key).unwrap(), Bytes::from(vec![2u8]));
        assert_eq!(state.updated_keys().len(), 1);
    }

    #[test]
    fn test_snapshot_write_capacity() {
        let mut state = SnapshotState::default();
        assert!(state.put(KeyPostfix::slot(1, 1), Bytes::from(vec![0u8; 64])).is_ok());
        assert!(matches!(
            state.put(KeyPostfix::slot(2, 1), Bytes::from(vec![0u8; 65])),
            Err(HostError::ContractFailure(_))
        ));
        assert!(state.put(KeyPostfix::slot(2, 2), Bytes::from(vec![0u8; 65])).is_ok());
    }

    #[test]
    fn test_snapshot_delete_records_empty_value() {
        let key = KeyPostfix::slot(1, 1);
        let mut view = StateView::Snapshot(SnapshotState::new(
            StateSnapshot::new().with_entry(key.clone(), vec![1u8]),
        ));
        view.delete(Address::ZERO, key.as_bytes()).unwrap();
        let StateView::Snapshot(state) = view else { unreachable!() };
        assert_eq!(state.updated_keys().get(&key), Some(&Bytes::new()));
    }

    #[test]
    fn test_program_state_overlay() {
        let store = Arc::new(Mutex::new(MemoryProgramStore::default()));
        let account = Address::repeat_byte(0x11);
        let mut root = StateView::Program(ProgramState::new(store.clone()));

        root.put(account, b"a", Bytes::from_static(b"1")).unwrap();
        assert_eq!(root.get(account, b"a").unwrap(), Bytes::from_static(b"1"));
        assert_eq!(root.get(Address::repeat_byte(0x22), b"a").unwrap(), Bytes::new());

        let StateView::Program(root) = root else { unreachable!() };
        let mut child = root.fork();
        child.put(relative_key(account, b"b"), Bytes::from_static(b"2"));
        // Dropping the child discards its writes.
        drop(child);
        assert_eq!(root.get(&relative_key(account, b"b")).unwrap(), Bytes::new());

        root.commit().unwrap();
        let store = store.lock().unwrap();
        assert_eq!(store.value(&relative_key(account, b"a")), Some(Bytes::from_static(b"1")));
        assert_eq!(store.len(), 1);
    }
}
