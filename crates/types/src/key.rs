//! Key lifecycle records and the two state machines they move through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeyOpsError, KeyOpsResult};

/// Hex length of a BLS public key (48 bytes, unprefixed).
pub const PUBLIC_KEY_HEX_LEN: usize = 96;

/// Application-level state of a validator key.
///
/// Keys are created `unused`, become `active` only through pool activation,
/// and end up `retired` through explicit operator action or reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Generated and stored, not yet assigned to any validator client.
    #[default]
    Unused,
    /// Exported to the remote signer and eligible for deposit generation.
    Active,
    /// Permanently out of rotation (exited, cleaned, or store-destroyed).
    Retired,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStatus::Unused => write!(f, "unused"),
            KeyStatus::Active => write!(f, "active"),
            KeyStatus::Retired => write!(f, "retired"),
        }
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unused" => Ok(KeyStatus::Unused),
            "active" => Ok(KeyStatus::Active),
            "retired" => Ok(KeyStatus::Retired),
            _ => Err(format!("Unknown key status: {}", s)),
        }
    }
}

/// Physical state of a key's material inside the secret store.
///
/// This is the store's own deletion model, kept separate from [`KeyStatus`]:
/// a soft-deleted key is recoverable, a destroyed one is not, and neither
/// implies anything about the application-level status on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreLifecycle {
    /// Material readable at the current version.
    #[default]
    Present,
    /// Current version deleted but recoverable via undelete.
    SoftDeleted,
    /// Current version permanently erased.
    Destroyed,
}

impl std::fmt::Display for StoreLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLifecycle::Present => write!(f, "present"),
            StoreLifecycle::SoftDeleted => write!(f, "soft_deleted"),
            StoreLifecycle::Destroyed => write!(f, "destroyed"),
        }
    }
}

impl std::str::FromStr for StoreLifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "present" => Ok(StoreLifecycle::Present),
            "soft_deleted" | "soft-deleted" => Ok(StoreLifecycle::SoftDeleted),
            "destroyed" => Ok(StoreLifecycle::Destroyed),
            _ => Err(format!("Unknown store lifecycle: {}", s)),
        }
    }
}

/// One validator key's lifecycle record.
///
/// Carries no private material; secrets surface only through the store
/// adapter's `get`, never through listings or reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// BLS public key, unprefixed lowercase hex. Globally unique.
    pub public_key: String,
    /// Derivation index under the pool seed. Immutable.
    pub mnemonic_index: u32,
    /// Bulk-generation run that created this key.
    pub batch_id: String,
    /// Application-level state.
    pub status: KeyStatus,
    /// Store-level physical state.
    #[serde(default)]
    pub store_lifecycle: StoreLifecycle,
    /// Validator-client software this key is earmarked for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Store version of the record, used as an optimistic-concurrency
    /// precondition on guarded transitions.
    #[serde(default)]
    pub version: u64,
}

impl KeyRecord {
    /// Whether the record's material is readable from the store.
    pub fn is_available(&self) -> bool {
        self.store_lifecycle == StoreLifecycle::Present
    }

    /// Operator-facing short form of the public key.
    pub fn short_public_key(&self) -> String {
        if self.public_key.len() > 16 {
            format!("0x{}...", &self.public_key[..16])
        } else {
            format!("0x{}", self.public_key)
        }
    }
}

/// Metadata filter for store listings. Material is never part of a listing.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub status: Option<KeyStatus>,
    pub batch_id: Option<String>,
    pub client_type: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    /// Include records whose material is soft-deleted or destroyed.
    /// Off by default: pool operations only ever see present records.
    pub include_unavailable: bool,
}

impl KeyFilter {
    pub fn with_status(mut self, status: KeyStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_client_type(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = Some(client_type.into());
        self
    }

    pub fn with_created_after(mut self, ts: DateTime<Utc>) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn including_unavailable(mut self) -> Self {
        self.include_unavailable = true;
        self
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &KeyRecord) -> bool {
        if !self.include_unavailable && !record.is_available() {
            return false;
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(batch_id) = &self.batch_id {
            if &record.batch_id != batch_id {
                return false;
            }
        }
        if let Some(client_type) = &self.client_type {
            if record.client_type.as_deref() != Some(client_type.as_str()) {
                return false;
            }
        }
        if let Some(created_after) = self.created_after {
            if record.created_at <= created_after {
                return false;
            }
        }
        true
    }
}

/// A named group of keys created by one bulk-generation run.
///
/// Immutable once created; only member statuses change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub count: usize,
}

/// Normalize a public key to canonical form: unprefixed lowercase hex,
/// exactly 48 bytes.
pub fn normalize_public_key(input: &str) -> KeyOpsResult<String> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != PUBLIC_KEY_HEX_LEN {
        return Err(KeyOpsError::Serialization(format!(
            "public key must be {} hex chars, got {}",
            PUBLIC_KEY_HEX_LEN,
            stripped.len()
        )));
    }
    if hex::decode(stripped).is_err() {
        return Err(KeyOpsError::Serialization(format!(
            "public key is not valid hex: {}",
            input
        )));
    }
    Ok(stripped.to_lowercase())
}
