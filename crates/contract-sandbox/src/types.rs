//! Core value types shared by the executor, the state-access driver and the marshaling layer.

use std::collections::{btree_map, BTreeMap};

use alloy_primitives::Bytes;
use delegate::delegate;
use serde::{Deserialize, Serialize};

use crate::constants::keys::{CHUNK_SIZE, SLOT_KEY_POSTFIX_LEN};

/// The contract-relative suffix of a state key.
///
/// A `KeyPostfix` is combined with a prefix byte and a contract address to form a globally unique
/// state key (see [`contract_state_key`](crate::contract_state_key)). The last two bytes of a
/// postfix carry the big-endian max-chunks hint used for size bounds and fee estimation.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Deref,
    derive_more::From,
    derive_more::Display,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct KeyPostfix(Bytes);

impl KeyPostfix {
    /// Creates a postfix from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates the fixed-size 4-byte postfix `u16be(slot) || u16be(max_chunks)`.
    pub fn slot(slot: u16, max_chunks: u16) -> Self {
        let mut buf = [0u8; SLOT_KEY_POSTFIX_LEN];
        buf[..2].copy_from_slice(&slot.to_be_bytes());
        buf[2..].copy_from_slice(&max_chunks.to_be_bytes());
        Self(Bytes::copy_from_slice(&buf))
    }

    /// Returns the max-chunks hint carried in the last two bytes of the postfix.
    ///
    /// Postfixes shorter than two bytes carry no hint and are treated as a single chunk.
    pub fn max_chunks(&self) -> u16 {
        match self.0.len() {
            len if len < 2 => 1,
            len => u16::from_be_bytes([self.0[len - 2], self.0[len - 1]]),
        }
    }

    /// Returns the maximum number of value bytes this key may hold.
    pub fn capacity(&self) -> usize {
        self.max_chunks() as usize * CHUNK_SIZE
    }

    /// Returns the raw postfix bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the postfix, returning the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for KeyPostfix {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl From<&[u8]> for KeyPostfix {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for KeyPostfix {
    fn from(value: [u8; N]) -> Self {
        Self(Bytes::copy_from_slice(&value))
    }
}

impl AsRef<[u8]> for KeyPostfix {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

bitflags::bitflags! {
    /// The access permissions a caller declares for a state key before committing a transaction.
    ///
    /// The access set observed while running the contract must be covered by the declared
    /// permissions, else the call is rejected (see [`DeclaredKeys::verify`](crate::DeclaredKeys::verify)).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u8 {
        /// The key may be read.
        const READ = 1 << 0;
        /// The key may be created.
        const ALLOCATE = 1 << 1;
        /// The key may be written.
        const WRITE = 1 << 2;
        /// Every permission.
        const ALL = Self::READ.bits() | Self::ALLOCATE.bits() | Self::WRITE.bits();
    }
}

/// The partial view of state fed into one sandbox invocation.
///
/// A snapshot is append-only: within one logical call it only ever gains keys, so each retry of
/// the state-access driver sees a superset of what the previous attempt saw.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    entries: BTreeMap<KeyPostfix, Bytes>,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    delegate! {
        to self.entries {
            /// Returns the number of keys in the snapshot.
            pub fn len(&self) -> usize;
            /// Returns `true` if the snapshot holds no keys.
            pub fn is_empty(&self) -> bool;
            /// Returns `true` if the snapshot holds `key`.
            pub fn contains_key(&self, key: &KeyPostfix) -> bool;
            /// Returns the value stored under `key`.
            pub fn get(&self, key: &KeyPostfix) -> Option<&Bytes>;
            /// Iterates over the entries in key order.
            pub fn iter(&self) -> btree_map::Iter<'_, KeyPostfix, Bytes>;
            /// Iterates over the keys in key order.
            pub fn keys(&self) -> btree_map::Keys<'_, KeyPostfix, Bytes>;
        }
    }

    /// Adds `key` with `value` unless the key is already present.
    ///
    /// Returns `true` if the key was added. Existing entries are never overwritten.
    pub fn extend_with(&mut self, key: KeyPostfix, value: Bytes) -> bool {
        match self.entries.entry(key) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Builder-style variant of [`Self::extend_with`].
    pub fn with_entry(mut self, key: impl Into<KeyPostfix>, value: impl Into<Bytes>) -> Self {
        self.extend_with(key.into(), value.into());
        self
    }
}

impl FromIterator<(KeyPostfix, Bytes)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (KeyPostfix, Bytes)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (key, value) in iter {
            snapshot.extend_with(key, value);
        }
        snapshot
    }
}

impl<'a> IntoIterator for &'a StateSnapshot {
    type Item = (&'a KeyPostfix, &'a Bytes);
    type IntoIter = btree_map::Iter<'a, KeyPostfix, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_postfix_layout() {
        let key = KeyPostfix::slot(0x0102, 3);
        assert_eq!(key.as_bytes(), &[0x01, 0x02, 0x00, 0x03]);
        assert_eq!(key.max_chunks(), 3);
        assert_eq!(key.capacity(), 3 * CHUNK_SIZE);
    }

    #[test]
    fn test_short_postfix_is_one_chunk() {
        assert_eq!(KeyPostfix::from([7u8]).max_chunks(), 1);
        assert_eq!(KeyPostfix::default().max_chunks(), 1);
        assert_eq!(KeyPostfix::from(vec![0xaa, 0xbb, 0x00, 0x02]).max_chunks(), 2);
    }

    #[test]
    fn test_snapshot_is_append_only() {
        let key = KeyPostfix::slot(1, 1);
        let mut snapshot = StateSnapshot::new().with_entry(key.clone(), vec![1u8]);
        assert!(!snapshot.extend_with(key.clone(), Bytes::from(vec![2u8])));
        assert_eq!(snapshot.get(&key), Some(&Bytes::from(vec![1u8])));
        assert!(snapshot.extend_with(KeyPostfix::slot(2, 1), Bytes::new()));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_permissions_all() {
        assert_eq!(Permissions::ALL.bits(), 7);
        assert!(Permissions::ALL.contains(Permissions::ALLOCATE | Permissions::WRITE));
    }
}
