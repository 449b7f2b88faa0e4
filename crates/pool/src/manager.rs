//! Pool operations: bulk generation under the pool seed, FIFO activation
//! with acknowledged signer export, and status accounting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use stakeops_crypto::{build_keystore, derive_signing_keypair, signing_key_path};
use stakeops_signer::{ImportStatus, KeystoreImport, RemoteSigner};
use stakeops_store::{SecretMaterial, SecretStore};
use stakeops_types::{
    BatchInfo, KeyFilter, KeyOpsError, KeyOpsResult, KeyRecord, KeyStatus, StoreLifecycle,
};

use crate::{index, seed};

/// How many times one activation call re-reads and retries its whole
/// selection after an optimistic-concurrency conflict.
const ACTIVATION_RETRIES: usize = 3;

/// Coordinates every mutation of the key pool. Holds the store and signer
/// behind trait objects; the artifacts directory carries the seed and the
/// pool index.
pub struct KeyPoolManager {
    store: Arc<dyn SecretStore>,
    signer: Arc<dyn RemoteSigner>,
    artifacts_dir: PathBuf,
}

/// Counts of present records per status, with soft-deleted and destroyed
/// records tallied separately so they never inflate the operating pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub unused: usize,
    pub active: usize,
    pub retired: usize,
    pub soft_deleted: usize,
    pub destroyed: usize,
    pub batches: Vec<BatchStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub total: usize,
    pub unused: usize,
    pub active: usize,
    pub retired: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitPoolOutcome {
    pub batch: BatchInfo,
    /// First derivation index used by this run.
    pub start_index: u32,
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutcome {
    /// Post-transition records, selection order (oldest first).
    pub activated: Vec<KeyRecord>,
    /// Distinct batches the selection drew from.
    pub batch_ids: Vec<String>,
}

impl ActivationOutcome {
    pub fn public_keys(&self) -> Vec<String> {
        self.activated.iter().map(|r| r.public_key.clone()).collect()
    }
}

impl KeyPoolManager {
    pub fn new(
        store: Arc<dyn SecretStore>,
        signer: Arc<dyn RemoteSigner>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            signer,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Generate `count` keys into the pool as `unused` records.
    ///
    /// Derivation continues from the highest index already in the store,
    /// so a re-run after a partial failure picks up where the failed run
    /// stopped instead of colliding with it. `progress` is called with
    /// the number of keys written so far.
    pub async fn init_pool(
        &self,
        count: usize,
        client_type: Option<String>,
        mut progress: impl FnMut(usize),
    ) -> KeyOpsResult<InitPoolOutcome> {
        let pool_seed = seed::load_or_create_seed(&self.artifacts_dir)?;
        let existing = self
            .store
            .list(&KeyFilter::default().including_unavailable())
            .await?;
        let existing_keys: std::collections::HashSet<&str> =
            existing.iter().map(|r| r.public_key.as_str()).collect();
        let start_index = existing
            .iter()
            .map(|r| r.mnemonic_index + 1)
            .max()
            .unwrap_or(0);

        let batch = BatchInfo {
            batch_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            count,
        };
        info!(count, start_index, batch_id = %batch.batch_id, "generating keys into pool");

        let mut public_keys = Vec::with_capacity(count);
        for offset in 0..count {
            let mnemonic_index = start_index + offset as u32;
            let keypair = derive_signing_keypair(&pool_seed, mnemonic_index);
            let public_key = keypair.public_key_hex();
            if existing_keys.contains(public_key.as_str()) {
                return Err(KeyOpsError::DuplicateKey {
                    public_key,
                    mnemonic_index,
                });
            }

            let password = format!("validator_{}_password", mnemonic_index);
            let keystore = build_keystore(&keypair, &password, &signing_key_path(mnemonic_index))
                .map_err(|e| KeyOpsError::Serialization(format!("keystore build failed: {}", e)))?;
            let keystore_json = keystore
                .to_json()
                .map_err(|e| KeyOpsError::Serialization(format!("keystore encode failed: {}", e)))?;

            let now = Utc::now();
            let record = KeyRecord {
                public_key: public_key.clone(),
                mnemonic_index,
                batch_id: batch.batch_id.clone(),
                status: KeyStatus::Unused,
                store_lifecycle: StoreLifecycle::Present,
                client_type: client_type.clone(),
                created_at: now,
                updated_at: now,
                notes: None,
                version: 0,
            };
            let material = SecretMaterial {
                secret_key: keypair.secret_key_bytes(),
                keystore_json,
                keystore_password: password,
            };
            self.store.put(&record, &material, None).await?;
            public_keys.push(public_key);
            progress(offset + 1);
        }

        self.rewrite_index().await?;
        info!(generated = public_keys.len(), "pool generation complete");
        Ok(InitPoolOutcome {
            batch,
            start_index,
            public_keys,
        })
    }

    /// Activate the oldest `count` unused keys and export their keystores
    /// to the signer.
    ///
    /// The selection is checked before any write: a short pool fails with
    /// `InsufficientPool` and changes nothing. Each transition is guarded
    /// by the record's version; if the selection moves underneath us the
    /// attempt is rolled back and the whole selection re-read, a bounded
    /// number of times. An export that is not positively acknowledged for
    /// every key rolls the transitions back and fails with `ExportFailed`.
    pub async fn activate_keys(
        &self,
        count: usize,
        batch_id: Option<&str>,
    ) -> KeyOpsResult<ActivationOutcome> {
        let mut attempt = 0;
        loop {
            let mut filter = KeyFilter::default().with_status(KeyStatus::Unused);
            if let Some(batch) = batch_id {
                filter = filter.with_batch_id(batch);
            }
            let unused = self.store.list(&filter).await?;
            if unused.len() < count {
                return Err(KeyOpsError::InsufficientPool {
                    requested: count,
                    available: unused.len(),
                });
            }

            match self.transition_selection(&unused[..count]).await {
                Ok(transitioned) => return self.export_and_finish(transitioned).await,
                Err(e) if is_selection_conflict(&e) && attempt < ACTIVATION_RETRIES => {
                    attempt += 1;
                    warn!(attempt, error = %e, "activation selection moved, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Flip every selected record `unused -> active`, or roll back the
    /// ones already flipped and fail.
    async fn transition_selection(
        &self,
        selection: &[KeyRecord],
    ) -> KeyOpsResult<Vec<(KeyRecord, SecretMaterial)>> {
        let mut transitioned = Vec::with_capacity(selection.len());
        for candidate in selection {
            match self.transition_one(candidate).await {
                Ok(entry) => transitioned.push(entry),
                Err(e) => {
                    self.revert_activations(&transitioned).await;
                    return Err(e);
                }
            }
        }
        Ok(transitioned)
    }

    async fn transition_one(
        &self,
        candidate: &KeyRecord,
    ) -> KeyOpsResult<(KeyRecord, SecretMaterial)> {
        let stored = self.store.get(&candidate.public_key).await?;
        if stored.record.status != KeyStatus::Unused {
            // taken by a concurrent activation between list and get
            return Err(KeyOpsError::VersionConflict {
                public_key: candidate.public_key.clone(),
                expected: stored.record.version,
            });
        }
        let mut updated = stored.record.clone();
        updated.status = KeyStatus::Active;
        updated.updated_at = Utc::now();
        let version = self
            .store
            .put(&updated, &stored.material, Some(stored.record.version))
            .await?;
        updated.version = version;
        Ok((updated, stored.material))
    }

    /// Best-effort revert of `active -> unused`. A revert that fails is
    /// logged and left for `check-workflow-status` to surface as an
    /// active-but-not-loaded divergence.
    async fn revert_activations(&self, transitioned: &[(KeyRecord, SecretMaterial)]) -> usize {
        let mut reverted = 0;
        for (record, material) in transitioned {
            let mut rolled = record.clone();
            rolled.status = KeyStatus::Unused;
            rolled.updated_at = Utc::now();
            match self.store.put(&rolled, material, Some(record.version)).await {
                Ok(_) => reverted += 1,
                Err(e) => {
                    error!(
                        public_key = %record.short_public_key(),
                        error = %e,
                        "failed to revert activation"
                    );
                }
            }
        }
        reverted
    }

    async fn export_and_finish(
        &self,
        transitioned: Vec<(KeyRecord, SecretMaterial)>,
    ) -> KeyOpsResult<ActivationOutcome> {
        let imports: Vec<KeystoreImport> = transitioned
            .iter()
            .map(|(_, material)| KeystoreImport {
                keystore_json: material.keystore_json.clone(),
                password: material.keystore_password.clone(),
            })
            .collect();

        let export_failure = match self.signer.import_keystores(&imports).await {
            Ok(statuses) => {
                let rejections: Vec<String> = statuses
                    .iter()
                    .zip(&transitioned)
                    .filter_map(|(status, (record, _))| match status {
                        ImportStatus::Rejected(reason) => {
                            Some(format!("{}: {}", record.short_public_key(), reason))
                        }
                        _ => None,
                    })
                    .collect();
                if rejections.is_empty() {
                    None
                } else {
                    // pull the acknowledged part of the batch back out so
                    // the signer is not left partially loaded
                    let acknowledged: Vec<String> = statuses
                        .iter()
                        .zip(&transitioned)
                        .filter(|(status, _)| status.is_acknowledged())
                        .map(|(_, (record, _))| record.public_key.clone())
                        .collect();
                    if let Err(e) = self.signer.remove_keys(&acknowledged).await {
                        warn!(error = %e, "failed to clear partial signer import");
                    }
                    Some(rejections.join("; "))
                }
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = export_failure {
            let rolled_back = self.revert_activations(&transitioned).await;
            if let Err(e) = self.rewrite_index().await {
                warn!(error = %e, "failed to rewrite pool index after rollback");
            }
            return Err(KeyOpsError::ExportFailed {
                reason,
                rolled_back,
            });
        }

        let activated: Vec<KeyRecord> = transitioned.iter().map(|(r, _)| r.clone()).collect();
        drop(transitioned);
        self.rewrite_index().await?;

        let mut batch_ids: Vec<String> = activated.iter().map(|r| r.batch_id.clone()).collect();
        batch_ids.sort();
        batch_ids.dedup();
        info!(activated = activated.len(), "activation exported and acknowledged");
        Ok(ActivationOutcome {
            activated,
            batch_ids,
        })
    }

    /// Status counts across the pool.
    pub async fn pool_status(&self) -> KeyOpsResult<PoolStatus> {
        let records = self
            .store
            .list(&KeyFilter::default().including_unavailable())
            .await?;

        let mut status = PoolStatus::default();
        let mut batches: BTreeMap<String, BatchStatus> = BTreeMap::new();
        for record in &records {
            match record.store_lifecycle {
                StoreLifecycle::SoftDeleted => {
                    status.soft_deleted += 1;
                    continue;
                }
                StoreLifecycle::Destroyed => {
                    status.destroyed += 1;
                    continue;
                }
                StoreLifecycle::Present => {}
            }
            status.total += 1;
            let batch = batches
                .entry(record.batch_id.clone())
                .or_insert_with(|| BatchStatus {
                    batch_id: record.batch_id.clone(),
                    ..Default::default()
                });
            batch.total += 1;
            match record.status {
                KeyStatus::Unused => {
                    status.unused += 1;
                    batch.unused += 1;
                }
                KeyStatus::Active => {
                    status.active += 1;
                    batch.active += 1;
                }
                KeyStatus::Retired => {
                    status.retired += 1;
                    batch.retired += 1;
                }
            }
        }
        status.batches = batches.into_values().collect();
        Ok(status)
    }

    /// Filtered listing of key records, material-free.
    pub async fn list_keys(&self, filter: &KeyFilter) -> KeyOpsResult<Vec<KeyRecord>> {
        self.store.list(filter).await
    }

    /// Rebuild the pool index artifact from a fresh store listing.
    pub async fn rewrite_index(&self) -> KeyOpsResult<()> {
        let records = self
            .store
            .list(&KeyFilter::default().including_unavailable())
            .await?;
        index::rewrite(&self.artifacts_dir, &records)?;
        Ok(())
    }
}

fn is_selection_conflict(error: &KeyOpsError) -> bool {
    matches!(
        error,
        KeyOpsError::VersionConflict { .. } | KeyOpsError::NotFound { .. } | KeyOpsError::Gone { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PoolIndex;
    use stakeops_signer::MemorySigner;
    use stakeops_store::MemoryStore;
    use zeroize::Zeroizing;

    fn setup() -> (KeyPoolManager, MemoryStore, MemorySigner, PathBuf) {
        let store = MemoryStore::new();
        let signer = MemorySigner::new();
        let dir = std::env::temp_dir().join(format!("stakeops-pool-{}", uuid::Uuid::new_v4()));
        let manager = KeyPoolManager::new(
            Arc::new(store.clone()),
            Arc::new(signer.clone()),
            dir.clone(),
        );
        (manager, store, signer, dir)
    }

    #[tokio::test]
    async fn test_init_pool_generates_unique_unused_keys() {
        let (manager, _store, _signer, _dir) = setup();
        let outcome = manager.init_pool(10, None, |_| {}).await.unwrap();
        assert_eq!(outcome.start_index, 0);
        assert_eq!(outcome.public_keys.len(), 10);

        let mut distinct = outcome.public_keys.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 10);

        let status = manager.pool_status().await.unwrap();
        assert_eq!(status.total, 10);
        assert_eq!(status.unused, 10);
        assert_eq!(status.active, 0);
        assert_eq!(status.batches.len(), 1);
    }

    #[tokio::test]
    async fn test_init_pool_continues_from_highest_index() {
        let (manager, _store, _signer, _dir) = setup();
        let first = manager.init_pool(3, None, |_| {}).await.unwrap();
        let second = manager.init_pool(2, Some("prysm".to_string()), |_| {}).await.unwrap();

        assert_eq!(second.start_index, 3);
        assert_ne!(first.batch.batch_id, second.batch.batch_id);
        assert_eq!(manager.pool_status().await.unwrap().total, 5);

        let all: Vec<String> = first
            .public_keys
            .iter()
            .chain(&second.public_keys)
            .cloned()
            .collect();
        let mut distinct = all.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), all.len());
    }

    #[tokio::test]
    async fn test_init_pool_is_deterministic_per_seed() {
        let (manager, _store, _signer, dir) = setup();
        let first = manager.init_pool(2, None, |_| {}).await.unwrap();

        // same artifacts dir, fresh store: derivation restarts at index 0
        // and must reproduce the same keys
        let replay = KeyPoolManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySigner::new()),
            dir,
        );
        let second = replay.init_pool(2, None, |_| {}).await.unwrap();
        assert_eq!(first.public_keys, second.public_keys);
    }

    #[tokio::test]
    async fn test_init_pool_detects_duplicate_public_key() {
        let (manager, store, _signer, dir) = setup();
        let pool_seed = seed::load_or_create_seed(&dir).unwrap();

        // a record that already owns the public key derivation will hit
        // at the next free index (5, because the max stored index is 4)
        let keypair = derive_signing_keypair(&pool_seed, 5);
        let now = Utc::now();
        let record = KeyRecord {
            public_key: keypair.public_key_hex(),
            mnemonic_index: 4,
            batch_id: "preexisting".to_string(),
            status: KeyStatus::Unused,
            store_lifecycle: StoreLifecycle::Present,
            client_type: None,
            created_at: now,
            updated_at: now,
            notes: None,
            version: 0,
        };
        let material = SecretMaterial {
            secret_key: Zeroizing::new(vec![1u8; 32]),
            keystore_json: "{}".to_string(),
            keystore_password: "pw".to_string(),
        };
        store.put(&record, &material, None).await.unwrap();

        let err = manager.init_pool(1, None, |_| {}).await.unwrap_err();
        match err {
            KeyOpsError::DuplicateKey {
                public_key,
                mnemonic_index,
            } => {
                assert_eq!(public_key, record.public_key);
                assert_eq!(mnemonic_index, 5);
            }
            other => panic!("expected DuplicateKey, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_activate_exact_count_fifo_and_exported() {
        let (manager, _store, signer, _dir) = setup();
        let generated = manager.init_pool(10, None, |_| {}).await.unwrap();

        let outcome = manager.activate_keys(4, None).await.unwrap();
        assert_eq!(outcome.activated.len(), 4);
        // FIFO: the oldest four are the first four generated
        let activated = outcome.public_keys();
        assert_eq!(activated, generated.public_keys[..4].to_vec());

        let status = manager.pool_status().await.unwrap();
        assert_eq!(status.active, 4);
        assert_eq!(status.unused, 6);

        let mut loaded = signer.list_public_keys().await.unwrap();
        let mut expected = activated.clone();
        loaded.sort();
        expected.sort();
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn test_activate_insufficient_changes_nothing() {
        let (manager, _store, signer, _dir) = setup();
        manager.init_pool(3, None, |_| {}).await.unwrap();

        let err = manager.activate_keys(5, None).await.unwrap_err();
        match err {
            KeyOpsError::InsufficientPool {
                requested,
                available,
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientPool, got {:?}", other),
        }

        let status = manager.pool_status().await.unwrap();
        assert_eq!(status.unused, 3);
        assert_eq!(status.active, 0);
        assert_eq!(signer.loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_activate_retries_after_version_conflict() {
        let (manager, store, signer, _dir) = setup();
        manager.init_pool(2, None, |_| {}).await.unwrap();

        store.inject_put_conflicts(1).await;
        let outcome = manager.activate_keys(1, None).await.unwrap();
        assert_eq!(outcome.activated.len(), 1);
        assert_eq!(signer.loaded_count().await, 1);
    }

    #[tokio::test]
    async fn test_activate_rolls_back_on_export_rejection() {
        let (manager, _store, signer, _dir) = setup();
        let generated = manager.init_pool(2, None, |_| {}).await.unwrap();
        signer.reject_public_key(&generated.public_keys[0]).await;

        let err = manager.activate_keys(2, None).await.unwrap_err();
        match err {
            KeyOpsError::ExportFailed {
                rolled_back,
                reason,
            } => {
                assert_eq!(rolled_back, 2);
                assert!(reason.contains("injected rejection"));
            }
            other => panic!("expected ExportFailed, got {:?}", other),
        }

        // everything is back to unused and the signer holds nothing
        let status = manager.pool_status().await.unwrap();
        assert_eq!(status.unused, 2);
        assert_eq!(status.active, 0);
        assert_eq!(signer.loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_activation_scoped_to_batch() {
        let (manager, _store, _signer, _dir) = setup();
        manager.init_pool(2, None, |_| {}).await.unwrap();
        let second = manager.init_pool(3, None, |_| {}).await.unwrap();

        let outcome = manager
            .activate_keys(2, Some(&second.batch.batch_id))
            .await
            .unwrap();
        assert_eq!(outcome.batch_ids, vec![second.batch.batch_id.clone()]);
        assert_eq!(outcome.public_keys(), second.public_keys[..2].to_vec());

        let err = manager
            .activate_keys(2, Some(&second.batch.batch_id))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeyOpsError::InsufficientPool {
                requested: 2,
                available: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_index_rewritten_after_mutations() {
        let (manager, _store, _signer, dir) = setup();
        manager.init_pool(3, None, |_| {}).await.unwrap();
        manager.activate_keys(1, None).await.unwrap();

        let pool_index = PoolIndex::load(&dir).unwrap().unwrap();
        assert_eq!(pool_index.keys.len(), 3);
        assert_eq!(pool_index.count_with_status(KeyStatus::Active), 1);
        assert_eq!(pool_index.count_with_status(KeyStatus::Unused), 2);
    }

    #[tokio::test]
    async fn test_progress_callback_reports_each_key() {
        let (manager, _store, _signer, _dir) = setup();
        let mut seen = Vec::new();
        manager
            .init_pool(3, None, |done| seen.push(done))
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
