//! In-memory store with the same versioning, soft-delete, and
//! check-and-set semantics as the HTTP client. Backs unit and integration
//! tests; failure injection simulates outages and concurrent writers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use async_trait::async_trait;
use stakeops_types::{KeyFilter, KeyOpsError, KeyOpsResult, KeyRecord, StoreLifecycle};

use crate::{SecretMaterial, SecretStore, StoreHealth, StoredKey};

struct StoredVersion {
    record: KeyRecord,
    material: SecretMaterial,
    deleted: bool,
    destroyed: bool,
}

#[derive(Default)]
struct MemoryEntry {
    versions: Vec<StoredVersion>,
    corrupted: bool,
}

impl MemoryEntry {
    fn current_version(&self) -> u64 {
        self.versions.len() as u64
    }

    fn current(&self) -> Option<&StoredVersion> {
        self.versions.last()
    }

    fn lifecycle(&self) -> StoreLifecycle {
        match self.current() {
            Some(v) if v.destroyed => StoreLifecycle::Destroyed,
            Some(v) if v.deleted => StoreLifecycle::SoftDeleted,
            _ => StoreLifecycle::Present,
        }
    }
}

/// In-memory [`SecretStore`] keyed directly by public key.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
    unavailable: Arc<Mutex<bool>>,
    conflict_puts: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreUnavailable` until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }

    /// Fail the next `count` puts with `VersionConflict`, simulating a
    /// concurrent writer moving records under the caller.
    pub async fn inject_put_conflicts(&self, count: usize) {
        *self.conflict_puts.lock().await = count;
    }

    /// Mark a record's material as undecodable.
    pub async fn corrupt(&self, public_key: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(public_key) {
            entry.corrupted = true;
        }
    }

    /// Number of records, in any lifecycle state.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn ensure_available(&self) -> KeyOpsResult<()> {
        if *self.unavailable.lock().await {
            return Err(KeyOpsError::StoreUnavailable {
                reason: "injected outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn put(
        &self,
        record: &KeyRecord,
        material: &SecretMaterial,
        cas: Option<u64>,
    ) -> KeyOpsResult<u64> {
        self.ensure_available().await?;
        {
            let mut remaining = self.conflict_puts.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(KeyOpsError::VersionConflict {
                    public_key: record.public_key.clone(),
                    expected: cas.unwrap_or(0),
                });
            }
        }

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(record.public_key.clone()).or_default();
        if let Some(expected) = cas {
            if expected != entry.current_version() {
                return Err(KeyOpsError::VersionConflict {
                    public_key: record.public_key.clone(),
                    expected,
                });
            }
        }
        entry.versions.push(StoredVersion {
            record: record.clone(),
            material: material.clone(),
            deleted: false,
            destroyed: false,
        });
        Ok(entry.current_version())
    }

    async fn get(&self, public_key: &str) -> KeyOpsResult<StoredKey> {
        self.ensure_available().await?;
        let entries = self.entries.lock().await;
        let entry = entries.get(public_key).ok_or_else(|| KeyOpsError::NotFound {
            public_key: public_key.to_string(),
        })?;
        match entry.lifecycle() {
            StoreLifecycle::Destroyed => {
                return Err(KeyOpsError::Gone {
                    public_key: public_key.to_string(),
                    destroyed: true,
                })
            }
            StoreLifecycle::SoftDeleted => {
                return Err(KeyOpsError::Gone {
                    public_key: public_key.to_string(),
                    destroyed: false,
                })
            }
            StoreLifecycle::Present => {}
        }
        if entry.corrupted {
            return Err(KeyOpsError::CorruptedRecord {
                public_key: public_key.to_string(),
                reason: "payload decode failed".to_string(),
            });
        }
        let current = entry.current().ok_or_else(|| KeyOpsError::NotFound {
            public_key: public_key.to_string(),
        })?;
        let mut record = current.record.clone();
        record.version = entry.current_version();
        record.store_lifecycle = StoreLifecycle::Present;
        Ok(StoredKey {
            record,
            material: current.material.clone(),
        })
    }

    async fn list(&self, filter: &KeyFilter) -> KeyOpsResult<Vec<KeyRecord>> {
        self.ensure_available().await?;
        let entries = self.entries.lock().await;
        let mut records: Vec<KeyRecord> = entries
            .values()
            .filter_map(|entry| {
                let current = entry.current()?;
                let mut record = current.record.clone();
                record.version = entry.current_version();
                record.store_lifecycle = entry.lifecycle();
                filter.matches(&record).then_some(record)
            })
            .collect();
        records.sort_by(|a, b| {
            (a.created_at, a.public_key.as_str()).cmp(&(b.created_at, b.public_key.as_str()))
        });
        Ok(records)
    }

    async fn soft_delete(&self, public_key: &str) -> KeyOpsResult<()> {
        self.ensure_available().await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(public_key)
            .ok_or_else(|| KeyOpsError::NotFound {
                public_key: public_key.to_string(),
            })?;
        if let Some(current) = entry.versions.last_mut() {
            current.deleted = true;
        }
        Ok(())
    }

    async fn destroy(&self, public_key: &str) -> KeyOpsResult<()> {
        self.ensure_available().await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(public_key)
            .ok_or_else(|| KeyOpsError::NotFound {
                public_key: public_key.to_string(),
            })?;
        for version in &mut entry.versions {
            version.deleted = true;
            version.destroyed = true;
        }
        Ok(())
    }

    async fn undelete(&self, public_key: &str) -> KeyOpsResult<()> {
        self.ensure_available().await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(public_key)
            .ok_or_else(|| KeyOpsError::NotFound {
                public_key: public_key.to_string(),
            })?;
        match entry.versions.last_mut() {
            Some(current) if current.destroyed => Err(KeyOpsError::Gone {
                public_key: public_key.to_string(),
                destroyed: true,
            }),
            Some(current) => {
                current.deleted = false;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn delete_all_versions(&self, public_key: &str) -> KeyOpsResult<()> {
        self.ensure_available().await?;
        self.entries.lock().await.remove(public_key);
        Ok(())
    }

    async fn health(&self) -> KeyOpsResult<StoreHealth> {
        self.ensure_available().await?;
        Ok(StoreHealth {
            initialized: true,
            sealed: false,
            version: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stakeops_types::KeyStatus;
    use zeroize::Zeroizing;

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
            secret_key: Zeroizing::new(vec![7u8; 32]),
            keystore_json: "{}".to_string(),
            keystore_password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_and_versioning() {
        let store = MemoryStore::new();
        let rec = record(1, KeyStatus::Unused);
        assert_eq!(store.put(&rec, &material(), None).await.unwrap(), 1);

        let stored = store.get(&rec.public_key).await.unwrap();
        assert_eq!(stored.record.version, 1);
        assert_eq!(stored.record.status, KeyStatus::Unused);
        assert_eq!(stored.material.secret_key.as_slice(), &[7u8; 32]);

        let mut updated = stored.record.clone();
        updated.status = KeyStatus::Active;
        assert_eq!(store.put(&updated, &material(), Some(1)).await.unwrap(), 2);
        assert_eq!(
            store.get(&rec.public_key).await.unwrap().record.status,
            KeyStatus::Active
        );
    }

    #[tokio::test]
    async fn test_cas_mismatch_is_version_conflict() {
        let store = MemoryStore::new();
        let rec = record(1, KeyStatus::Unused);
        store.put(&rec, &material(), None).await.unwrap();

        let err = store.put(&rec, &material(), Some(0)).await.unwrap_err();
        assert!(matches!(err, KeyOpsError::VersionConflict { expected: 0, .. }));
        // the failed write did not add a version
        assert_eq!(store.get(&rec.public_key).await.unwrap().record.version, 1);
    }

    #[tokio::test]
    async fn test_soft_delete_undelete_cycle() {
        let store = MemoryStore::new();
        let rec = record(2, KeyStatus::Active);
        store.put(&rec, &material(), None).await.unwrap();

        store.soft_delete(&rec.public_key).await.unwrap();
        let err = store.get(&rec.public_key).await.unwrap_err();
        assert!(matches!(err, KeyOpsError::Gone { destroyed: false, .. }));

        store.undelete(&rec.public_key).await.unwrap();
        assert!(store.get(&rec.public_key).await.is_ok());
    }

    #[tokio::test]
    async fn test_destroy_is_permanent_and_idempotent() {
        let store = MemoryStore::new();
        let rec = record(3, KeyStatus::Retired);
        store.put(&rec, &material(), None).await.unwrap();

        store.destroy(&rec.public_key).await.unwrap();
        store.destroy(&rec.public_key).await.unwrap();

        let err = store.get(&rec.public_key).await.unwrap_err();
        assert!(matches!(err, KeyOpsError::Gone { destroyed: true, .. }));
        let err = store.undelete(&rec.public_key).await.unwrap_err();
        assert!(matches!(err, KeyOpsError::Gone { destroyed: true, .. }));
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let store = MemoryStore::new();
        for (index, status) in [
            (3, KeyStatus::Active),
            (1, KeyStatus::Unused),
            (2, KeyStatus::Unused),
        ] {
            store.put(&record(index, status), &material(), None).await.unwrap();
        }
        store.soft_delete(&record(2, KeyStatus::Unused).public_key).await.unwrap();

        let unused = store
            .list(&KeyFilter::default().with_status(KeyStatus::Unused))
            .await
            .unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].mnemonic_index, 1);

        let all = store
            .list(&KeyFilter::default().including_unavailable())
            .await
            .unwrap();
        let indexes: Vec<u32> = all.iter().map(|r| r.mnemonic_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(all[1].store_lifecycle, StoreLifecycle::SoftDeleted);
    }

    #[tokio::test]
    async fn test_corrupted_record_surfaces_on_get_only() {
        let store = MemoryStore::new();
        let rec = record(5, KeyStatus::Unused);
        store.put(&rec, &material(), None).await.unwrap();
        store.corrupt(&rec.public_key).await;

        let err = store.get(&rec.public_key).await.unwrap_err();
        assert!(matches!(err, KeyOpsError::CorruptedRecord { .. }));
        // still visible in listings
        assert_eq!(store.list(&KeyFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_conflicts_and_outage() {
        let store = MemoryStore::new();
        let rec = record(6, KeyStatus::Unused);

        store.inject_put_conflicts(1).await;
        assert!(matches!(
            store.put(&rec, &material(), None).await.unwrap_err(),
            KeyOpsError::VersionConflict { .. }
        ));
        store.put(&rec, &material(), None).await.unwrap();

        store.set_unavailable(true).await;
        assert!(matches!(
            store.get(&rec.public_key).await.unwrap_err(),
            KeyOpsError::StoreUnavailable { .. }
        ));
        store.set_unavailable(false).await;
        assert!(store.get(&rec.public_key).await.is_ok());

        assert!(matches!(
            store.delete_all_versions("absent").await,
            Ok(())
        ));
    }
}
