//! Core data types shared across the relay.
//!
//! - Health-check payloads reported by every beacon node (`SyncingStatus`, `ForkInfo`,
//!   `GenesisInfo`) and the `Envelope` wrapper the Beacon API puts around them.
//! - [`CanonicalJson`], a JSON value with structural, key-order-insensitive equality and a
//!   matching `Hash` implementation, so upstream responses can be tallied for consensus.
//! - [`ApiResponse`], the hashable success value of a proxied operation.

use ahash::AHasher;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

/// Standard `{"data": ...}` wrapper used by most Beacon API responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Response of `GET /eth/v1/node/syncing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncingStatus {
    /// Head slot as reported by the node. Kept as the raw decimal string; see
    /// [`SyncingStatus::head_slot_number`].
    pub head_slot: String,
    pub sync_distance: String,
    pub is_syncing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_optimistic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub el_offline: Option<bool>,
}

impl SyncingStatus {
    /// Parses the reported head slot. Returns `None` for malformed values.
    #[must_use]
    pub fn head_slot_number(&self) -> Option<u64> {
        self.head_slot.trim().parse().ok()
    }
}

/// Response of `GET /eth/v1/beacon/states/{state_id}/fork`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkInfo {
    pub previous_version: String,
    pub current_version: String,
    pub epoch: String,
}

impl ForkInfo {
    /// Normalized fork identifier used for majority voting.
    ///
    /// Fork versions are 4-byte hex strings; casing and an optional `0x` prefix are not
    /// significant.
    #[must_use]
    pub fn fork_id(&self) -> String {
        let version = self.current_version.trim().to_ascii_lowercase();
        match version.strip_prefix("0x") {
            Some(stripped) => stripped.to_string(),
            None => version,
        }
    }
}

/// Response of `GET /eth/v1/beacon/genesis`.
///
/// Equality over all three fields is the chain identity used for majority voting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenesisInfo {
    pub genesis_time: String,
    pub genesis_validators_root: String,
    pub genesis_fork_version: String,
}

impl GenesisInfo {
    /// Copy with hex fields normalized, so two nodes reporting the same chain compare equal
    /// regardless of hex casing.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            genesis_time: self.genesis_time.trim().to_string(),
            genesis_validators_root: self.genesis_validators_root.trim().to_ascii_lowercase(),
            genesis_fork_version: self.genesis_fork_version.trim().to_ascii_lowercase(),
        }
    }
}

/// A JSON document with structural equality and a consistent hash.
///
/// `serde_json::Value` compares objects independently of key order but does not implement
/// `Hash`. This wrapper hashes the value recursively with sorted object keys and a
/// discriminant byte per JSON type, which keeps `Hash` consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(transparent)]
pub struct CanonicalJson(pub Value);

impl CanonicalJson {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Stable 64-bit digest of the document.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl<'de> Deserialize<'de> for CanonicalJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self)
    }
}

impl From<Value> for CanonicalJson {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl Hash for CanonicalJson {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_json_value(&self.0, state);
    }
}

impl fmt::Display for CanonicalJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hashes a JSON value without serializing it.
///
/// Object keys are visited in sorted order. Numbers are hashed by their integer or float
/// representation, mirroring how `serde_json::Number` equality distinguishes them.
pub fn hash_json_value<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            if let Some(i) = n.as_i64() {
                0u8.hash(hasher);
                i.hash(hasher);
            } else if let Some(u) = n.as_u64() {
                1u8.hash(hasher);
                u.hash(hasher);
            } else if let Some(f) = n.as_f64() {
                2u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_json_value(item, hasher);
            }
        }
        Value::Object(map) => {
            5u8.hash(hasher);
            map.len().hash(hasher);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                key.hash(hasher);
                if let Some(value) = map.get(key) {
                    hash_json_value(value, hasher);
                }
            }
        }
    }
}

/// Successful answer of a proxied operation.
///
/// Two responses are a consensus match when status, `eth-*` metadata headers and the canonical
/// body all agree. Empty bodies (e.g. `200 OK` on pool submissions) are `Value::Null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    /// Lowercased `eth-*` response headers, such as `eth-consensus-version`.
    pub headers: BTreeMap<String, String>,
    pub body: CanonicalJson,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, headers: BTreeMap::new(), body: CanonicalJson(body) }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.0.is_null()
    }
}
