//! Declared state-key permissions and the on-chain key records they expand to.

use std::collections::{btree_map, BTreeMap};

use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    constants::keys::{CONTRACT_BYTECODE_CHUNKS, CONTRACT_BYTECODE_PREFIX, CONTRACT_STATE_PREFIX},
    ExecutionResult, KeyPostfix, Permissions, SandboxError, StateProvider, StateSnapshot,
};

/// Returns the state record key `0x01 || contract || postfix`.
pub fn contract_state_key(contract: Address, postfix: &KeyPostfix) -> Bytes {
    let mut key = Vec::with_capacity(1 + contract.len() + postfix.len());
    key.push(CONTRACT_STATE_PREFIX);
    key.extend_from_slice(contract.as_slice());
    key.extend_from_slice(postfix.as_bytes());
    key.into()
}

/// Returns the bytecode record key `0x00 || contract || u16be(bytecode_chunks)`.
pub fn contract_bytecode_key(contract: Address) -> Bytes {
    let mut key = Vec::with_capacity(1 + contract.len() + 2);
    key.push(CONTRACT_BYTECODE_PREFIX);
    key.extend_from_slice(contract.as_slice());
    key.extend_from_slice(&CONTRACT_BYTECODE_CHUNKS.to_be_bytes());
    key.into()
}

/// The key permissions a caller declares before the call is committed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredKeys {
    keys: BTreeMap<KeyPostfix, Permissions>,
}

impl DeclaredKeys {
    /// Creates an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `permissions` for `key`, in addition to anything already declared for it.
    pub fn declare(&mut self, key: KeyPostfix, permissions: Permissions) {
        *self.keys.entry(key).or_default() |= permissions;
    }

    /// Builder-style variant of [`Self::declare`].
    pub fn with_key(mut self, key: impl Into<KeyPostfix>, permissions: Permissions) -> Self {
        self.declare(key.into(), permissions);
        self
    }

    /// Returns the permissions declared for `key`, empty when undeclared.
    pub fn permissions(&self, key: &KeyPostfix) -> Permissions {
        self.keys.get(key).copied().unwrap_or_default()
    }

    /// Iterates over the declared keys in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, KeyPostfix, Permissions> {
        self.keys.iter()
    }

    /// Returns the max-chunks hint of every declared key, in key order.
    pub fn max_chunks(&self) -> Vec<u16> {
        self.keys.keys().map(KeyPostfix::max_chunks).collect()
    }

    /// Expands the declaration into full state records for `contract`, plus a read of the
    /// contract's bytecode record.
    pub fn state_keys(&self, contract: Address) -> BTreeMap<Bytes, Permissions> {
        let mut records: BTreeMap<_, _> = self
            .keys
            .iter()
            .map(|(postfix, permissions)| (contract_state_key(contract, postfix), *permissions))
            .collect();
        records.insert(contract_bytecode_key(contract), Permissions::READ);
        records
    }

    /// Builds the initial snapshot from every key declared readable.
    pub fn precache<P: StateProvider>(&self, provider: &P) -> Result<StateSnapshot, SandboxError> {
        let mut snapshot = StateSnapshot::new();
        for (key, permissions) in &self.keys {
            if !permissions.contains(Permissions::READ) {
                continue;
            }
            let value = provider.fetch(key).map_err(|err| SandboxError::StateProvider {
                key: key.clone(),
                message: err.to_string(),
            })?;
            snapshot.extend_with(key.clone(), value);
        }
        Ok(snapshot)
    }

    /// Checks that the access set observed in `result` is covered by this declaration.
    ///
    /// Reads require [`Permissions::READ`]. Writes to a key holding a non-empty value in
    /// `snapshot` require [`Permissions::WRITE`], and writes to any other key require
    /// [`Permissions::ALLOCATE`] and [`Permissions::WRITE`].
    pub fn verify(
        &self,
        result: &ExecutionResult,
        snapshot: &StateSnapshot,
    ) -> Result<(), SandboxError> {
        for key in &result.read_keys {
            self.require(key, Permissions::READ)?;
        }
        for key in result.updated_keys.keys() {
            let exists = snapshot.get(key).is_some_and(|value| !value.is_empty());
            let required =
                if exists { Permissions::WRITE } else { Permissions::ALLOCATE | Permissions::WRITE };
            self.require(key, required)?;
        }
        Ok(())
    }

    fn require(&self, key: &KeyPostfix, required: Permissions) -> Result<(), SandboxError> {
        let declared = self.permissions(key);
        if declared.contains(required) {
            Ok(())
        } else {
            Err(SandboxError::UndeclaredAccess { key: key.clone(), required, declared })
        }
    }
}

impl FromIterator<(KeyPostfix, Permissions)> for DeclaredKeys {
    fn from_iter<I: IntoIterator<Item = (KeyPostfix, Permissions)>>(iter: I) -> Self {
        let mut declared = Self::new();
        for (key, permissions) in iter {
            declared.declare(key, permissions);
        }
        declared
    }
}
