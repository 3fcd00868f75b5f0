//! Encoding of the data exchanged with sandboxed code.
//!
//! Two encodings are in use. The input and output blobs are self-describing JSON documents with
//! base64 binary fields. Host-function parameters of the `state` and `program` import modules are
//! borsh-encoded structs.

use std::collections::BTreeMap;

use alloy_primitives::Bytes;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{ExecutionResult, KeyPostfix, SandboxError, StateSnapshot};

/// The input blob handed to sandboxed code through `sandbox.input`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBlob {
    /// The partial state snapshot of this attempt.
    #[serde(with = "b64_map")]
    pub current_state: BTreeMap<KeyPostfix, Bytes>,
    /// The call payload.
    #[serde(with = "b64")]
    pub payload: Bytes,
    /// The function to invoke.
    pub function_name: String,
    /// The caller identity.
    #[serde(with = "b64")]
    pub actor: Bytes,
}

impl InputBlob {
    /// Builds the input blob of one attempt.
    pub fn new(snapshot: &StateSnapshot, payload: Bytes, function_name: String, actor: Bytes) -> Self {
        let current_state = snapshot.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self { current_state, payload, function_name, actor }
    }

    /// Encodes the blob as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, SandboxError> {
        serde_json::to_vec(self).map_err(|err| SandboxError::Engine(err.to_string()))
    }
}

/// The output blob written by sandboxed code through `sandbox.output`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputBlob {
    /// The bytes returned by the contract.
    #[serde(with = "b64")]
    pub result: Bytes,
    /// Whether the contract completed successfully.
    pub success: bool,
    /// The keys written by the contract.
    #[serde(with = "b64_map")]
    pub updated_keys: BTreeMap<KeyPostfix, Bytes>,
    /// The keys read by the contract, in first-access order.
    #[serde(with = "b64_keys")]
    pub read_keys: Vec<KeyPostfix>,
    /// The contract-level error text.
    pub error: String,
    /// Set when the contract stopped because it read a key absent from the snapshot.
    #[serde(with = "b64_opt_key", skip_serializing_if = "Option::is_none")]
    pub missing_key: Option<KeyPostfix>,
}

impl OutputBlob {
    /// Decodes a blob written by the guest.
    pub fn decode(bytes: &[u8]) -> Result<Self, SandboxError> {
        serde_json::from_slice(bytes).map_err(|err| SandboxError::MalformedOutput(err.to_string()))
    }

    /// Encodes the blob as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, SandboxError> {
        serde_json::to_vec(self).map_err(|err| SandboxError::Engine(err.to_string()))
    }

    /// Converts the blob into a result. A failed blob never carries updated keys.
    pub fn into_result(self) -> ExecutionResult {
        let mut result = ExecutionResult {
            output: self.result,
            success: self.success,
            error: self.error,
            updated_keys: self.updated_keys,
            read_keys: self.read_keys,
            ..Default::default()
        };
        result.discard_writes_on_failure();
        result
    }
}

impl From<&ExecutionResult> for OutputBlob {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            result: result.output.clone(),
            success: result.success,
            updated_keys: result.updated_keys.clone(),
            read_keys: result.read_keys.clone(),
            error: result.error.clone(),
            missing_key: None,
        }
    }
}

/// Input of `state.get` and `state.delete`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KeyInput {
    /// The logical key, relative to the executing program.
    pub key: Vec<u8>,
}

/// Input of `state.put`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KeyValueInput {
    /// The logical key, relative to the executing program.
    pub key: Vec<u8>,
    /// The value to store.
    pub value: Vec<u8>,
}

/// Input of `program.call_program`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CallProgramInput {
    /// The 20-byte identity of the target program.
    pub program_id: Vec<u8>,
    /// The export to invoke on the target.
    pub function_name: String,
    /// The parameters handed to the target.
    pub params: Vec<u8>,
    /// The fuel granted to the child frame.
    pub fuel: u64,
}

/// Decodes a borsh-encoded host-function input.
pub(crate) fn decode_borsh<T: BorshDeserialize>(input: &[u8]) -> Result<T, crate::HostError> {
    borsh::from_slice(input).map_err(|err| crate::HostError::Decode(err.to_string()))
}

/// Packs a guest memory region into the single 64-bit value returned to the guest.
pub const fn pack_region(ptr: u32, len: u32) -> i64 {
    (((ptr as u64) << 32) | len as u64) as i64
}

/// Splits a packed region into `(ptr, len)`.
pub const fn unpack_region(packed: i64) -> (u32, u32) {
    let packed = packed as u64;
    ((packed >> 32) as u32, packed as u32)
}

mod b64 {
    use alloy_primitives::Bytes;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        BASE64_STANDARD.decode(s).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}

mod b64_map {
    use std::collections::BTreeMap;

    use alloy_primitives::Bytes;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use serde::{ser::SerializeMap, Deserialize, Deserializer, Serializer};

    use crate::KeyPostfix;

    pub(super) fn serialize<S>(
        map: &BTreeMap<KeyPostfix, Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map {
            out.serialize_entry(&BASE64_STANDARD.encode(key), &BASE64_STANDARD.encode(value))?;
        }
        out.end()
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<KeyPostfix, Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default();
        raw.into_iter()
            .map(|(key, value)| {
                let key = BASE64_STANDARD.decode(key).map_err(serde::de::Error::custom)?;
                let value = BASE64_STANDARD.decode(value).map_err(serde::de::Error::custom)?;
                Ok((KeyPostfix::from(key), Bytes::from(value)))
            })
            .collect()
    }
}

mod b64_keys {
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::KeyPostfix;

    pub(super) fn serialize<S>(keys: &[KeyPostfix], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(keys.iter().map(|key| BASE64_STANDARD.encode(key)))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<KeyPostfix>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
        raw.into_iter()
            .map(|key| {
                BASE64_STANDARD.decode(key).map(KeyPostfix::from).map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

mod b64_opt_key {
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::KeyPostfix;

    pub(super) fn serialize<S>(key: &Option<KeyPostfix>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            Some(key) => serializer.serialize_some(&BASE64_STANDARD.encode(key)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<KeyPostfix>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|key| {
                BASE64_STANDARD.decode(key).map(KeyPostfix::from).map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_blob_preserves_keys_and_result() {
        let mut result = ExecutionResult::success(vec![1u8, 2, 3]);
        result.updated_keys.insert(KeyPostfix::slot(1, 1), Bytes::from(vec![9u8; 70]));
        result.updated_keys.insert(KeyPostfix::slot(2, 1), Bytes::new());
        result.read_keys = vec![KeyPostfix::slot(3, 1), KeyPostfix::slot(1, 1)];

        let encoded = OutputBlob::from(&result).encode().unwrap();
        let decoded = OutputBlob::decode(&encoded).unwrap().into_result();
        assert_eq!(decoded.output, result.output);
        assert_eq!(decoded.updated_keys, result.updated_keys);
        assert_eq!(decoded.read_keys, result.read_keys);
        assert!(decoded.success);
    }

    #[test]
    fn test_failed_output_drops_updated_keys() {
        let json = br#"{"success":false,"error":"boom","updatedKeys":{"AAEAAQ==":"AQ=="}}"#;
        let result = OutputBlob::decode(json).unwrap().into_result();
        assert!(!result.success);
        assert_eq!(result.error, "boom");
        assert!(result.updated_keys.is_empty());
    }

    #[test]
    fn test_output_blob_missing_key() {
        let json = br#"{"missingKey":"AAEAAQ==","readKeys":null}"#;
        let blob = OutputBlob::decode(json).unwrap();
        assert_eq!(blob.missing_key, Some(KeyPostfix::slot(1, 1)));
        assert!(blob.read_keys.is_empty());
    }

    #[test]
    fn test_input_blob_shape() {
        let snapshot = StateSnapshot::new().with_entry(KeyPostfix::slot(1, 1), vec![0xffu8]);
        let blob = InputBlob::new(&snapshot, vec![1u8].into(), "run".into(), vec![2u8].into());
        let json: serde_json::Value = serde_json::from_slice(&blob.encode().unwrap()).unwrap();
        assert_eq!(json["functionName"], "run");
        assert_eq!(json["payload"], "AQ==");
        assert_eq!(json["actor"], "Ag==");
        assert_eq!(json["currentState"]["AAEAAQ=="], "/w==");
    }

    #[test]
    fn test_region_packing() {
        let packed = pack_region(0x1234, 0xffff_ffff);
        assert_eq!(unpack_region(packed), (0x1234, 0xffff_ffff));
        assert_eq!(pack_region(0, 0), 0);
    }

    #[test]
    fn test_malformed_output() {
        assert!(matches!(OutputBlob::decode(b"not json"), Err(SandboxError::MalformedOutput(_))));
    }
}
