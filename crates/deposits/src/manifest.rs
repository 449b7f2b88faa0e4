//! Deposit artifact manifest: which key set and chain identity produced a
//! deposit file.
//!
//! The manifest is what makes re-running generation safe: a run whose
//! inputs match the recorded ones is a no-op, and a run whose inputs
//! differ is refused unless the operator explicitly overwrites.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stakeops_types::{KeyOpsError, KeyOpsResult, NetworkParams, WithdrawalSpec};

/// Stable-named copy of the most recent deposit file.
pub const STABLE_DEPOSIT_FILE: &str = "deposit_data.json";

/// Fork-suffixed deposit file name.
pub fn deposit_file_name(fork_version_hex: &str) -> String {
    format!("deposit_data_active_keys_fork_{}.json", fork_version_hex)
}

/// Manifest file name alongside a fork-suffixed deposit file.
pub fn manifest_file_name(fork_version_hex: &str) -> String {
    format!(
        "deposit_data_active_keys_fork_{}.manifest.json",
        fork_version_hex
    )
}

/// Record of one generation run, written next to the deposit file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositManifest {
    /// Fork version, unprefixed lowercase hex.
    pub fork_version: String,
    pub network_name: String,
    /// Credential selection: `bls` or `execution:0x...`.
    pub withdrawal_type: String,
    /// Sorted canonical public keys the deposits were produced for.
    pub public_keys: Vec<String>,
    /// Distinct batches the key set drew from, sorted.
    pub batch_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl DepositManifest {
    pub fn new(
        params: &NetworkParams,
        withdrawal_spec: &WithdrawalSpec,
        mut public_keys: Vec<String>,
        mut batch_ids: Vec<String>,
    ) -> Self {
        public_keys.sort();
        batch_ids.sort();
        batch_ids.dedup();
        Self {
            fork_version: params.fork_version_hex(),
            network_name: params.network_name.clone(),
            withdrawal_type: withdrawal_spec.to_string(),
            public_keys,
            batch_ids,
            generated_at: Utc::now(),
        }
    }

    /// Whether a run with these inputs would reproduce this manifest.
    /// `generated_at` and batch membership are provenance, not identity.
    pub fn matches(
        &self,
        params: &NetworkParams,
        withdrawal_spec: &WithdrawalSpec,
        public_keys: &[String],
    ) -> bool {
        let mut sorted: Vec<&str> = public_keys.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        self.fork_version == params.fork_version_hex()
            && self.network_name == params.network_name
            && self.withdrawal_type == withdrawal_spec.to_string()
            && self.public_keys.iter().map(String::as_str).eq(sorted)
    }

    pub fn path(artifacts_dir: &Path, fork_version_hex: &str) -> PathBuf {
        artifacts_dir.join(manifest_file_name(fork_version_hex))
    }

    pub fn save(&self, artifacts_dir: &Path) -> KeyOpsResult<PathBuf> {
        fs::create_dir_all(artifacts_dir).map_err(|e| artifact_io(artifacts_dir, e))?;
        let path = Self::path(artifacts_dir, &self.fork_version);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KeyOpsError::Serialization(format!("manifest encode: {}", e)))?;
        fs::write(&path, json).map_err(|e| artifact_io(&path, e))?;
        Ok(path)
    }

    pub fn load(artifacts_dir: &Path, fork_version_hex: &str) -> KeyOpsResult<Option<Self>> {
        let path = Self::path(artifacts_dir, fork_version_hex);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|e| artifact_io(&path, e))?;
        let manifest = serde_json::from_str(&contents)
            .map_err(|e| KeyOpsError::Serialization(format!("manifest decode: {}", e)))?;
        Ok(Some(manifest))
    }

    /// Most recent manifest in the artifacts directory, if any.
    pub fn load_latest(artifacts_dir: &Path) -> KeyOpsResult<Option<Self>> {
        let entries = match fs::read_dir(artifacts_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(artifact_io(artifacts_dir, e)),
        };

        let mut latest: Option<Self> = None;
        for entry in entries {
            let entry = entry.map_err(|e| artifact_io(artifacts_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("deposit_data_active_keys_fork_")
                || !name.ends_with(".manifest.json")
            {
                continue;
            }
            let contents =
                fs::read_to_string(entry.path()).map_err(|e| artifact_io(&entry.path(), e))?;
            let manifest: Self = serde_json::from_str(&contents)
                .map_err(|e| KeyOpsError::Serialization(format!("manifest decode: {}", e)))?;
            if latest
                .as_ref()
                .map(|m| manifest.generated_at > m.generated_at)
                .unwrap_or(true)
            {
                latest = Some(manifest);
            }
        }
        Ok(latest)
    }
}

fn artifact_io(path: &Path, source: std::io::Error) -> KeyOpsError {
    KeyOpsError::ArtifactIo {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("stakeops-manifest-{}", uuid::Uuid::new_v4()))
    }

    fn params() -> NetworkParams {
        NetworkParams::new("kurtosis", "0x10000038").unwrap()
    }

    #[test]
    fn test_artifact_names() {
        assert_eq!(
            deposit_file_name("10000038"),
            "deposit_data_active_keys_fork_10000038.json"
        );
        assert_eq!(
            manifest_file_name("10000038"),
            "deposit_data_active_keys_fork_10000038.manifest.json"
        );
    }

    #[test]
    fn test_matches_same_keys_any_order() {
        let keys = vec!["bb".repeat(48), "aa".repeat(48)];
        let manifest = DepositManifest::new(
            &params(),
            &WithdrawalSpec::Bls,
            keys.clone(),
            vec!["b1".into()],
        );

        assert!(manifest.matches(&params(), &WithdrawalSpec::Bls, &keys));
        let reversed: Vec<String> = keys.iter().rev().cloned().collect();
        assert!(manifest.matches(&params(), &WithdrawalSpec::Bls, &reversed));
    }

    #[test]
    fn test_mismatch_on_params_spec_or_keys() {
        let keys = vec!["aa".repeat(48)];
        let manifest = DepositManifest::new(
            &params(),
            &WithdrawalSpec::Bls,
            keys.clone(),
            vec!["b1".into()],
        );

        let other_fork = NetworkParams::new("kurtosis", "0x00000000").unwrap();
        assert!(!manifest.matches(&other_fork, &WithdrawalSpec::Bls, &keys));

        let execution = WithdrawalSpec::Execution([0u8; 20]);
        assert!(!manifest.matches(&params(), &execution, &keys));

        assert!(!manifest.matches(&params(), &WithdrawalSpec::Bls, &["bb".repeat(48)]));
    }

    #[test]
    fn test_save_load_and_latest() {
        let dir = temp_dir();
        assert!(DepositManifest::load_latest(&dir).unwrap().is_none());

        let first = DepositManifest::new(
            &NetworkParams::new("kurtosis", "0x00000000").unwrap(),
            &WithdrawalSpec::Bls,
            vec!["aa".repeat(48)],
            vec!["b1".into()],
        );
        first.save(&dir).unwrap();

        let mut second = DepositManifest::new(
            &params(),
            &WithdrawalSpec::Bls,
            vec!["bb".repeat(48)],
            vec!["b2".into()],
        );
        second.generated_at = first.generated_at + chrono::Duration::seconds(5);
        second.save(&dir).unwrap();

        let loaded = DepositManifest::load(&dir, "10000038").unwrap().unwrap();
        assert_eq!(loaded, second);

        let latest = DepositManifest::load_latest(&dir).unwrap().unwrap();
        assert_eq!(latest.fork_version, "10000038");
    }
}
