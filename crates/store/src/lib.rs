//! Secret store adapter: the only component that touches key material.
//!
//! The [`SecretStore`] trait narrows the backing store's API to the
//! operations the key pool needs. Records and material are stored together
//! as one versioned payload; listings return records only, and every
//! material read round-trips to the store (nothing is cached).
//!
//! [`VaultClient`] speaks the KV v2 dialect over HTTP. [`MemoryStore`]
//! reproduces the same versioning and deletion semantics in memory for
//! tests.

pub mod memory;
pub mod vault;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stakeops_types::{KeyFilter, KeyOpsResult, KeyRecord};
use zeroize::Zeroizing;

pub use memory::MemoryStore;
pub use vault::VaultClient;

/// Private material for one key. Returned only by [`SecretStore::get`],
/// never by listings, and dropped (with the secret bytes zeroized) as soon
/// as the caller is done with it.
#[derive(Clone)]
pub struct SecretMaterial {
    /// Raw BLS secret scalar, 32 bytes.
    pub secret_key: Zeroizing<Vec<u8>>,
    /// Password-encrypted keystore, serialized JSON.
    pub keystore_json: String,
    /// Password for the keystore.
    pub keystore_password: String,
}

impl std::fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretMaterial(..)")
    }
}

/// One key as read back from the store: lifecycle record plus material.
#[derive(Debug)]
pub struct StoredKey {
    pub record: KeyRecord,
    pub material: SecretMaterial,
}

/// Result of a store health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub initialized: bool,
    pub sealed: bool,
    pub version: String,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.initialized && !self.sealed
    }
}

/// Narrow interface over the secret store.
///
/// Identity is always the key's canonical public key hex; implementations
/// decide how that maps to storage paths. Writes are versioned: `put` with
/// `cas: Some(n)` succeeds only while the record is still at version `n`
/// and fails with `VersionConflict` otherwise, which is the sole
/// concurrency primitive the pool relies on.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Write a record and its material as a new version. `cas: None` writes
    /// unconditionally (first write); `cas: Some(n)` is a guarded
    /// transition. Returns the new version.
    async fn put(
        &self,
        record: &KeyRecord,
        material: &SecretMaterial,
        cas: Option<u64>,
    ) -> KeyOpsResult<u64>;

    /// Read the current version. `NotFound` when no record exists, `Gone`
    /// when the record exists but its material is soft-deleted or
    /// destroyed, `CorruptedRecord` when the payload does not decode.
    async fn get(&self, public_key: &str) -> KeyOpsResult<StoredKey>;

    /// List records matching `filter`, material-free, sorted by
    /// (`created_at`, `public_key`) so repeated invocations see a stable
    /// order.
    async fn list(&self, filter: &KeyFilter) -> KeyOpsResult<Vec<KeyRecord>>;

    /// Soft-delete the current version. Recoverable via [`Self::undelete`].
    async fn soft_delete(&self, public_key: &str) -> KeyOpsResult<()>;

    /// Permanently destroy all versions' material. Destroying an
    /// already-destroyed key is a no-op success.
    async fn destroy(&self, public_key: &str) -> KeyOpsResult<()>;

    /// Recover a soft-deleted current version. Fails with
    /// `Gone { destroyed: true }` once the material has been destroyed.
    async fn undelete(&self, public_key: &str) -> KeyOpsResult<()>;

    /// Remove the record entirely: all versions and metadata. Used only by
    /// confirmed corrupted-record removal. Removing an absent record is a
    /// no-op success.
    async fn delete_all_versions(&self, public_key: &str) -> KeyOpsResult<()>;

    /// Probe the store's availability.
    async fn health(&self) -> KeyOpsResult<StoreHealth>;
}
