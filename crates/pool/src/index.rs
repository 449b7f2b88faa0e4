//! Pool index artifact: a JSON map of every present key's public key to
//! its status, batch, and client type.
//!
//! The index is a read-only view for neighboring tooling; the store stays
//! authoritative. It is rebuilt from a full listing and swapped into place
//! atomically after every mutating pool operation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stakeops_types::{KeyOpsError, KeyOpsResult, KeyRecord, KeyStatus};

const INDEX_FILE: &str = "pool_index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub status: KeyStatus,
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
}

/// Serialized form of the index file. Keys are canonical public key hex,
/// kept sorted so rewrites diff cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolIndex {
    pub updated_at: DateTime<Utc>,
    pub keys: BTreeMap<String, IndexEntry>,
}

impl PoolIndex {
    /// Build an index from store records. Soft-deleted and destroyed
    /// records are not part of the pool's operating surface and are left
    /// out.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a KeyRecord>) -> Self {
        let keys = records
            .into_iter()
            .filter(|record| record.is_available())
            .map(|record| {
                (
                    record.public_key.clone(),
                    IndexEntry {
                        status: record.status,
                        batch_id: record.batch_id.clone(),
                        client_type: record.client_type.clone(),
                    },
                )
            })
            .collect();
        Self {
            updated_at: Utc::now(),
            keys,
        }
    }

    pub fn path(artifacts_dir: &Path) -> PathBuf {
        artifacts_dir.join(INDEX_FILE)
    }

    /// Write the index, replacing any previous file atomically.
    pub fn save(&self, artifacts_dir: &Path) -> KeyOpsResult<PathBuf> {
        fs::create_dir_all(artifacts_dir).map_err(|e| artifact_io(artifacts_dir, e))?;
        let path = Self::path(artifacts_dir);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KeyOpsError::Serialization(format!("pool index encode: {}", e)))?;
        fs::write(&tmp, json).map_err(|e| artifact_io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| artifact_io(&path, e))?;
        Ok(path)
    }

    pub fn load(artifacts_dir: &Path) -> KeyOpsResult<Option<Self>> {
        let path = Self::path(artifacts_dir);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|e| artifact_io(&path, e))?;
        let index = serde_json::from_str(&contents)
            .map_err(|e| KeyOpsError::Serialization(format!("pool index decode: {}", e)))?;
        Ok(Some(index))
    }

    pub fn count_with_status(&self, status: KeyStatus) -> usize {
        self.keys.values().filter(|e| e.status == status).count()
    }
}

/// Rebuild and persist the index from a fresh store listing.
pub fn rewrite(artifacts_dir: &Path, records: &[KeyRecord]) -> KeyOpsResult<PathBuf> {
    PoolIndex::from_records(records).save(artifacts_dir)
}

fn artifact_io(path: &Path, source: std::io::Error) -> KeyOpsError {
    KeyOpsError::ArtifactIo {
        path: path.display().to_string(),
        source,
    }
}
