//! Remote signer client: loads activated keys into the signing service.
//!
//! The signer only ever receives password-encrypted keystores; raw secret
//! scalars stay between the store and the crypto layer. Every import must
//! be positively acknowledged per keystore before the pool treats an
//! activation as exported.

pub mod memory;
pub mod web3signer;

use async_trait::async_trait;
use stakeops_types::KeyOpsResult;

pub use memory::MemorySigner;
pub use web3signer::Web3SignerClient;

/// One keystore handed to the signer.
#[derive(Debug, Clone)]
pub struct KeystoreImport {
    /// Serialized keystore JSON.
    pub keystore_json: String,
    pub password: String,
}

/// Per-keystore acknowledgement from an import call, order-aligned with
/// the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatus {
    Imported,
    /// Already loaded. Counts as a positive acknowledgement: re-exporting
    /// an activated key is not an error.
    Duplicate,
    Rejected(String),
}

impl ImportStatus {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, ImportStatus::Imported | ImportStatus::Duplicate)
    }
}

/// Client interface to the remote signing service.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Liveness probe. `Ok` means the signer answers requests.
    async fn upcheck(&self) -> KeyOpsResult<()>;

    /// Public keys currently loaded, canonical unprefixed lowercase hex,
    /// sorted.
    async fn list_public_keys(&self) -> KeyOpsResult<Vec<String>>;

    /// Import keystores. Returns one status per keystore in request order;
    /// transport-level failures are errors, per-keystore rejections are
    /// statuses so the caller can see which keys were affected.
    async fn import_keystores(&self, imports: &[KeystoreImport]) -> KeyOpsResult<Vec<ImportStatus>>;

    /// Remove keys from the signer. Removing a key that is not loaded is a
    /// no-op success, so rollback after a partial import is idempotent.
    async fn remove_keys(&self, public_keys: &[String]) -> KeyOpsResult<()>;
}
