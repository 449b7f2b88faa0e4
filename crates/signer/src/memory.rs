//! In-memory signer double for tests: same acknowledgement semantics as
//! the HTTP client, with injectable outages and per-key rejections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use async_trait::async_trait;
use stakeops_types::{normalize_public_key, KeyOpsError, KeyOpsResult};

use crate::{ImportStatus, KeystoreImport, RemoteSigner};

/// In-memory [`RemoteSigner`]. Keys are identified by the `pubkey` field
/// of the imported keystore JSON.
#[derive(Clone, Default)]
pub struct MemorySigner {
    loaded: Arc<Mutex<HashMap<String, String>>>,
    unavailable: Arc<Mutex<bool>>,
    rejected: Arc<Mutex<Vec<String>>>,
}

impl MemorySigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `SignerUnavailable` until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }

    /// Reject future imports of this key, leaving the rest of a batch to
    /// import normally. Simulates a per-keystore signer-side failure.
    pub async fn reject_public_key(&self, public_key: &str) {
        self.rejected.lock().await.push(public_key.to_string());
    }

    pub async fn loaded_count(&self) -> usize {
        self.loaded.lock().await.len()
    }

    pub async fn contains(&self, public_key: &str) -> bool {
        self.loaded.lock().await.contains_key(public_key)
    }

    async fn ensure_available(&self) -> KeyOpsResult<()> {
        if *self.unavailable.lock().await {
            return Err(KeyOpsError::SignerUnavailable {
                reason: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSigner for MemorySigner {
    async fn upcheck(&self) -> KeyOpsResult<()> {
        self.ensure_available().await
    }

    async fn list_public_keys(&self) -> KeyOpsResult<Vec<String>> {
        self.ensure_available().await?;
        let mut keys: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn import_keystores(&self, imports: &[KeystoreImport]) -> KeyOpsResult<Vec<ImportStatus>> {
        self.ensure_available().await?;
        let rejected = self.rejected.lock().await.clone();
        let mut loaded = self.loaded.lock().await;

        let mut statuses = Vec::with_capacity(imports.len());
        for import in imports {
            let public_key = match keystore_public_key(&import.keystore_json) {
                Some(pk) => pk,
                None => {
                    statuses.push(ImportStatus::Rejected(
                        "keystore has no usable pubkey field".to_string(),
                    ));
                    continue;
                }
            };
            if import.password.is_empty() {
                statuses.push(ImportStatus::Rejected("empty password".to_string()));
                continue;
            }
            if rejected.contains(&public_key) {
                statuses.push(ImportStatus::Rejected("injected rejection".to_string()));
                continue;
            }
            if loaded.contains_key(&public_key) {
                statuses.push(ImportStatus::Duplicate);
                continue;
            }
            loaded.insert(public_key, import.keystore_json.clone());
            statuses.push(ImportStatus::Imported);
        }
        Ok(statuses)
    }

    async fn remove_keys(&self, public_keys: &[String]) -> KeyOpsResult<()> {
        self.ensure_available().await?;
        let mut loaded = self.loaded.lock().await;
        for public_key in public_keys {
            loaded.remove(public_key);
        }
        Ok(())
    }
}

fn keystore_public_key(keystore_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(keystore_json).ok()?;
    let pubkey = value.get("pubkey")?.as_str()?;
    normalize_public_key(pubkey).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystore(public_key: &str) -> KeystoreImport {
        KeystoreImport {
            keystore_json: format!(r#"{{"version":1,"pubkey":"{}"}}"#, public_key),
            password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_import_list_remove_roundtrip() {
        let signer = MemorySigner::new();
        let pk_a = "aa".repeat(48);
        let pk_b = "bb".repeat(48);

        let statuses = signer
            .import_keystores(&[keystore(&pk_a), keystore(&pk_b)])
            .await
            .unwrap();
        assert!(statuses.iter().all(ImportStatus::is_acknowledged));
        assert_eq!(signer.list_public_keys().await.unwrap(), vec![pk_a.clone(), pk_b.clone()]);

        // re-import acknowledges as duplicate
        let statuses = signer.import_keystores(&[keystore(&pk_a)]).await.unwrap();
        assert_eq!(statuses, vec![ImportStatus::Duplicate]);

        signer.remove_keys(&[pk_a.clone()]).await.unwrap();
        signer.remove_keys(&[pk_a.clone()]).await.unwrap();
        assert_eq!(signer.list_public_keys().await.unwrap(), vec![pk_b]);
    }

    #[tokio::test]
    async fn test_per_key_rejection_leaves_rest_imported() {
        let signer = MemorySigner::new();
        let pk_a = "aa".repeat(48);
        let pk_b = "bb".repeat(48);
        signer.reject_public_key(&pk_b).await;

        let statuses = signer
            .import_keystores(&[keystore(&pk_a), keystore(&pk_b)])
            .await
            .unwrap();
        assert_eq!(statuses[0], ImportStatus::Imported);
        assert!(matches!(statuses[1], ImportStatus::Rejected(_)));
        assert!(signer.contains(&pk_a).await);
        assert!(!signer.contains(&pk_b).await);
    }

    #[tokio::test]
    async fn test_malformed_keystore_and_empty_password() {
        let signer = MemorySigner::new();
        let statuses = signer
            .import_keystores(&[
                KeystoreImport {
                    keystore_json: "not json".to_string(),
                    password: "pw".to_string(),
                },
                KeystoreImport {
                    keystore_json: format!(r#"{{"pubkey":"{}"}}"#, "cc".repeat(48)),
                    password: String::new(),
                },
            ])
            .await
            .unwrap();
        assert!(statuses.iter().all(|s| !s.is_acknowledged()));
        assert_eq!(signer.loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let signer = MemorySigner::new();
        signer.set_unavailable(true).await;
        assert!(matches!(
            signer.upcheck().await.unwrap_err(),
            KeyOpsError::SignerUnavailable { .. }
        ));
        signer.set_unavailable(false).await;
        assert!(signer.upcheck().await.is_ok());
    }
}
