//! Reconciliation between the store's physical deletion state and the
//! pool's application state.
//!
//! Two repairs, both explicit operator actions: finishing the two-phase
//! delete for soft-deleted material, and retiring records whose metadata
//! survived but whose material did not. Neither ever touches a healthy
//! record, and neither is invoked by the coordinated workflow.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use stakeops_store::{SecretMaterial, SecretStore};
use stakeops_types::{
    KeyFilter, KeyOpsError, KeyOpsResult, KeyRecord, KeyStatus, StoreLifecycle,
};

/// Store-side repair operations.
pub struct Reconciler {
    store: Arc<dyn SecretStore>,
}

/// Result of a destroy-deleted pass.
#[derive(Debug, Default, Serialize)]
pub struct DestroyOutcome {
    /// Keys whose soft-deleted material was destroyed by this pass.
    pub destroyed: Vec<String>,
    /// Keys already destroyed before this pass. Destroy is idempotent, so
    /// these are counted, not retried as errors.
    pub already_destroyed: usize,
}

/// One record whose material could not be read back.
#[derive(Debug, Clone, Serialize)]
pub struct CorruptedKey {
    pub public_key: String,
    pub reason: String,
}

/// Result of a clean-corrupted pass.
#[derive(Debug, Default, Serialize)]
pub struct CleanOutcome {
    pub corrupted: Vec<CorruptedKey>,
    /// Records rewritten to `retired` with the corruption noted.
    pub retired: usize,
    /// Records removed from the store entirely (confirmed removal only).
    pub removed: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Destroy the material of every soft-deleted record.
    ///
    /// Finishes the store's two-phase delete. Idempotent: destroyed
    /// records are skipped, present records of any status are never
    /// touched, and a second pass over the same store changes nothing.
    pub async fn destroy_deleted(&self) -> KeyOpsResult<DestroyOutcome> {
        let records = self
            .store
            .list(&KeyFilter::default().including_unavailable())
            .await?;

        let mut outcome = DestroyOutcome::default();
        for record in &records {
            match record.store_lifecycle {
                StoreLifecycle::Present => continue,
                StoreLifecycle::Destroyed => outcome.already_destroyed += 1,
                StoreLifecycle::SoftDeleted => {
                    self.store.destroy(&record.public_key).await?;
                    info!(public_key = %record.short_public_key(), "destroyed soft-deleted material");
                    outcome.destroyed.push(record.public_key.clone());
                }
            }
        }
        info!(
            destroyed = outcome.destroyed.len(),
            already_destroyed = outcome.already_destroyed,
            "destroy-deleted pass complete"
        );
        Ok(outcome)
    }

    /// Find records whose material is gone or undecodable despite a
    /// `present` lifecycle, and retire them.
    ///
    /// Default action rewrites the record as `retired` with the failure
    /// noted, keeping the tombstone visible in listings. With `remove`
    /// set (the CLI requires explicit confirmation for it) the record's
    /// versions and metadata are deleted from the store instead.
    pub async fn clean_corrupted(&self, remove: bool) -> KeyOpsResult<CleanOutcome> {
        let records = self.store.list(&KeyFilter::default()).await?;

        let mut outcome = CleanOutcome::default();
        for record in &records {
            let reason = match self.store.get(&record.public_key).await {
                Ok(_) => continue,
                Err(KeyOpsError::Gone { destroyed, .. }) => {
                    format!(
                        "material gone despite present metadata (destroyed: {})",
                        destroyed
                    )
                }
                Err(KeyOpsError::CorruptedRecord { reason, .. }) => reason,
                Err(other) => return Err(other),
            };

            warn!(
                public_key = %record.short_public_key(),
                reason = %reason,
                "corrupted record"
            );
            outcome.corrupted.push(CorruptedKey {
                public_key: record.public_key.clone(),
                reason: reason.clone(),
            });

            if remove {
                self.store.delete_all_versions(&record.public_key).await?;
                outcome.removed += 1;
            } else {
                self.retire_record(record, &reason).await?;
                outcome.retired += 1;
            }
        }
        info!(
            corrupted = outcome.corrupted.len(),
            retired = outcome.retired,
            removed = outcome.removed,
            "clean-corrupted pass complete"
        );
        Ok(outcome)
    }

    /// Rewrite a corrupted record as a retired tombstone. The material was
    /// already unusable, so the new version carries none.
    async fn retire_record(&self, record: &KeyRecord, reason: &str) -> KeyOpsResult<()> {
        let mut retired = record.clone();
        retired.status = KeyStatus::Retired;
        retired.updated_at = Utc::now();
        retired.notes = Some(format!("retired by reconciliation: {}", reason));
        let tombstone = SecretMaterial {
            secret_key: Zeroizing::new(Vec::new()),
            keystore_json: String::new(),
            keystore_password: String::new(),
        };
        self.store
            .put(&retired, &tombstone, Some(record.version))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stakeops_store::MemoryStore;

    fn record(index: u32, status: KeyStatus) -> KeyRecord {
        let created = Utc::now() + Duration::seconds(index as i64);
        KeyRecord {
            public_key: format!("{:02x}", index).repeat(48),
            mnemonic_index: index,
            batch_id: "batch-1".to_string(),
            status,
            store_lifecycle: StoreLifecycle::Present,
            client_type: None,
            created_at: created,
            updated_at: created,
            notes: None,
            version: 0,
        }
    }

    fn material() -> SecretMaterial {
        SecretMaterial {
            secret_key: Zeroizing::new(vec![9u8; 32]),
            keystore_json: "{}".to_string(),
            keystore_password: "pw".to_string(),
        }
    }

    async fn seeded_store() -> (Arc<MemoryStore>, Vec<KeyRecord>) {
        let store = Arc::new(MemoryStore::new());
        let records: Vec<KeyRecord> = vec![
            record(1, KeyStatus::Unused),
            record(2, KeyStatus::Active),
            record(3, KeyStatus::Retired),
        ];
        for r in &records {
            store.put(r, &material(), None).await.unwrap();
        }
        (store, records)
    }

    #[tokio::test]
    async fn test_destroy_deleted_only_touches_soft_deleted() {
        let (store, records) = seeded_store().await;
        store.soft_delete(&records[2].public_key).await.unwrap();

        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler.destroy_deleted().await.unwrap();
        assert_eq!(outcome.destroyed, vec![records[2].public_key.clone()]);
        assert_eq!(outcome.already_destroyed, 0);

        // unused and active records still readable
        assert!(store.get(&records[0].public_key).await.is_ok());
        assert!(store.get(&records[1].public_key).await.is_ok());
        assert!(matches!(
            store.get(&records[2].public_key).await.unwrap_err(),
            KeyOpsError::Gone { destroyed: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_destroy_deleted_second_pass_is_noop() {
        let (store, records) = seeded_store().await;
        store.soft_delete(&records[0].public_key).await.unwrap();

        let reconciler = Reconciler::new(store.clone());
        let first = reconciler.destroy_deleted().await.unwrap();
        assert_eq!(first.destroyed.len(), 1);

        let second = reconciler.destroy_deleted().await.unwrap();
        assert!(second.destroyed.is_empty());
        assert_eq!(second.already_destroyed, 1);
    }

    #[tokio::test]
    async fn test_clean_corrupted_retires_with_reason() {
        let (store, records) = seeded_store().await;
        store.corrupt(&records[1].public_key).await;

        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler.clean_corrupted(false).await.unwrap();
        assert_eq!(outcome.corrupted.len(), 1);
        assert_eq!(outcome.corrupted[0].public_key, records[1].public_key);
        assert_eq!(outcome.retired, 1);
        assert_eq!(outcome.removed, 0);

        let listed = store.list(&KeyFilter::default()).await.unwrap();
        let retired = listed
            .iter()
            .find(|r| r.public_key == records[1].public_key)
            .unwrap();
        assert_eq!(retired.status, KeyStatus::Retired);
        assert!(retired.notes.as_ref().unwrap().contains("reconciliation"));
    }

    #[tokio::test]
    async fn test_clean_corrupted_removal_drops_record() {
        let (store, records) = seeded_store().await;
        store.corrupt(&records[0].public_key).await;

        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler.clean_corrupted(true).await.unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.retired, 0);

        assert!(matches!(
            store.get(&records[0].public_key).await.unwrap_err(),
            KeyOpsError::NotFound { .. }
        ));
        assert_eq!(store.list(&KeyFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clean_corrupted_healthy_store_is_noop() {
        let (store, _records) = seeded_store().await;
        let reconciler = Reconciler::new(store.clone());
        let outcome = reconciler.clean_corrupted(false).await.unwrap();
        assert!(outcome.corrupted.is_empty());
        assert_eq!(outcome.retired + outcome.removed, 0);
    }
}
