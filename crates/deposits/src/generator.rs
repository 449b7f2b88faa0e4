//! Deposit record production for a set of active keys.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use stakeops_crypto::{
    bls_withdrawal_credentials, derive_signing_keypair, derive_withdrawal_keypair,
    execution_withdrawal_credentials, sign_deposit, verify_signature, PoolSeed,
};
use stakeops_types::{
    DepositRecord, KeyOpsError, KeyOpsResult, KeyRecord, KeyStatus, NetworkParams,
    WithdrawalSpec, DEPOSIT_AMOUNT_GWEI,
};

use crate::manifest::{deposit_file_name, DepositManifest, STABLE_DEPOSIT_FILE};

/// Produces deposit artifacts for activated keys. Holds the configured
/// chain identity; every run's parameters are checked against it before
/// anything is signed.
pub struct DepositGenerator {
    artifacts_dir: PathBuf,
    target: NetworkParams,
}

/// What a generation run produced (or found already produced).
#[derive(Debug)]
pub struct GenerateOutcome {
    pub records: Vec<DepositRecord>,
    pub deposit_path: PathBuf,
    pub manifest: DepositManifest,
    /// True when an identical prior run was found and the artifacts were
    /// left untouched.
    pub reused: bool,
}

impl DepositGenerator {
    pub fn new(artifacts_dir: impl Into<PathBuf>, target: NetworkParams) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            target,
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Produce one deposit record per active key and write the deposit
    /// file, stable copy, and manifest.
    ///
    /// Inputs are validated before any signing: every record must be
    /// `active`, and `params` must agree with the configured target chain.
    /// When a manifest from a previous run matches the same key set, spec,
    /// and params, the run is a no-op; when it differs, the run fails
    /// unless `overwrite` is set.
    pub fn generate(
        &self,
        seed: &PoolSeed,
        active_keys: &[KeyRecord],
        withdrawal_spec: &WithdrawalSpec,
        params: &NetworkParams,
        overwrite: bool,
    ) -> KeyOpsResult<GenerateOutcome> {
        self.check_params(params)?;
        check_all_active(active_keys)?;

        let public_keys: Vec<String> = active_keys
            .iter()
            .map(|r| r.public_key.clone())
            .collect();
        let fork_hex = params.fork_version_hex();

        if let Some(existing) = DepositManifest::load(&self.artifacts_dir, &fork_hex)? {
            if existing.matches(params, withdrawal_spec, &public_keys) {
                info!(
                    fork_version = %fork_hex,
                    keys = public_keys.len(),
                    "deposit artifacts already match this key set, leaving untouched"
                );
                let deposit_path = self.artifacts_dir.join(deposit_file_name(&fork_hex));
                let records = load_records(&deposit_path)?;
                return Ok(GenerateOutcome {
                    records,
                    deposit_path,
                    manifest: existing,
                    reused: true,
                });
            }
            if !overwrite {
                return Err(manifest_conflict(&existing, &public_keys));
            }
            warn!(fork_version = %fork_hex, "overwriting previous deposit artifacts");
        }

        let mut records = Vec::with_capacity(active_keys.len());
        for key in active_keys {
            records.push(self.build_record(seed, key, withdrawal_spec, params)?);
        }

        let deposit_path = self.write_artifacts(&records, &fork_hex)?;
        let manifest = DepositManifest::new(
            params,
            withdrawal_spec,
            public_keys,
            active_keys.iter().map(|r| r.batch_id.clone()).collect(),
        );
        manifest.save(&self.artifacts_dir)?;

        info!(
            deposits = records.len(),
            path = %deposit_path.display(),
            "deposit batch written"
        );
        Ok(GenerateOutcome {
            records,
            deposit_path,
            manifest,
            reused: false,
        })
    }

    fn check_params(&self, params: &NetworkParams) -> KeyOpsResult<()> {
        if params.fork_version != self.target.fork_version {
            return Err(KeyOpsError::NetworkParamsMismatch {
                field: "fork_version".to_string(),
                expected: self.target.fork_version_hex(),
                actual: params.fork_version_hex(),
            });
        }
        if params.network_name != self.target.network_name {
            return Err(KeyOpsError::NetworkParamsMismatch {
                field: "network_name".to_string(),
                expected: self.target.network_name.clone(),
                actual: params.network_name.clone(),
            });
        }
        if let (Some(expected), Some(actual)) = (
            &self.target.deposit_contract_address,
            &params.deposit_contract_address,
        ) {
            if !expected.eq_ignore_ascii_case(actual) {
                return Err(KeyOpsError::NetworkParamsMismatch {
                    field: "deposit_contract_address".to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }

    fn build_record(
        &self,
        seed: &PoolSeed,
        key: &KeyRecord,
        withdrawal_spec: &WithdrawalSpec,
        params: &NetworkParams,
    ) -> KeyOpsResult<DepositRecord> {
        let keypair = derive_signing_keypair(seed, key.mnemonic_index);
        if keypair.public_key_hex() != key.public_key {
            // the seed in this artifacts directory did not produce this
            // record; signing with it would produce an unusable deposit
            return Err(KeyOpsError::CorruptedRecord {
                public_key: key.public_key.clone(),
                reason: format!(
                    "derivation at index {} does not reproduce the stored public key",
                    key.mnemonic_index
                ),
            });
        }

        let credentials = match withdrawal_spec {
            WithdrawalSpec::Bls => {
                let withdrawal = derive_withdrawal_keypair(seed, key.mnemonic_index);
                bls_withdrawal_credentials(&withdrawal.public_key_bytes())
            }
            WithdrawalSpec::Execution(address) => execution_withdrawal_credentials(address),
        };

        let signed = sign_deposit(
            &keypair,
            &credentials,
            DEPOSIT_AMOUNT_GWEI,
            params.fork_version,
            params.genesis_validators_root,
        );

        let signing_root = stakeops_crypto::signing_root(
            &signed.deposit_message_root,
            &stakeops_crypto::compute_deposit_domain(
                params.fork_version,
                params.genesis_validators_root,
            ),
        );
        let verified = verify_signature(
            &keypair.public_key_bytes(),
            &signing_root,
            &signed.signature,
        )
        .map_err(|source| KeyOpsError::SigningFailed { source })?;
        if !verified {
            return Err(KeyOpsError::SigningFailed {
                source: anyhow_invalid_signature(&key.public_key),
            });
        }

        Ok(DepositRecord {
            pubkey: key.public_key.clone(),
            withdrawal_credentials: hex::encode(credentials),
            amount: DEPOSIT_AMOUNT_GWEI,
            signature: hex::encode(signed.signature),
            deposit_message_root: hex::encode(signed.deposit_message_root),
            deposit_data_root: hex::encode(signed.deposit_data_root),
            fork_version: params.fork_version_hex(),
            network_name: params.network_name.clone(),
        })
    }

    fn write_artifacts(
        &self,
        records: &[DepositRecord],
        fork_hex: &str,
    ) -> KeyOpsResult<PathBuf> {
        fs::create_dir_all(&self.artifacts_dir)
            .map_err(|e| artifact_io(&self.artifacts_dir, e))?;
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| KeyOpsError::Serialization(format!("deposit encode: {}", e)))?;

        let deposit_path = self.artifacts_dir.join(deposit_file_name(fork_hex));
        fs::write(&deposit_path, &json).map_err(|e| artifact_io(&deposit_path, e))?;

        let stable_path = self.artifacts_dir.join(STABLE_DEPOSIT_FILE);
        fs::write(&stable_path, &json).map_err(|e| artifact_io(&stable_path, e))?;

        Ok(deposit_path)
    }
}

fn check_all_active(active_keys: &[KeyRecord]) -> KeyOpsResult<()> {
    let non_active: Vec<String> = active_keys
        .iter()
        .filter(|r| r.status != KeyStatus::Active)
        .map(|r| r.public_key.clone())
        .collect();
    if !non_active.is_empty() {
        return Err(KeyOpsError::WorkflowInconsistency {
            stage: "deposit-input".to_string(),
            missing: Vec::new(),
            unexpected: non_active,
        });
    }
    Ok(())
}

fn manifest_conflict(existing: &DepositManifest, requested: &[String]) -> KeyOpsError {
    let mut requested_sorted: Vec<String> = requested.to_vec();
    requested_sorted.sort();
    let missing: Vec<String> = requested_sorted
        .iter()
        .filter(|k| !existing.public_keys.contains(k))
        .cloned()
        .collect();
    let unexpected: Vec<String> = existing
        .public_keys
        .iter()
        .filter(|k| !requested_sorted.contains(k))
        .cloned()
        .collect();
    KeyOpsError::WorkflowInconsistency {
        stage: "deposit-artifact".to_string(),
        missing,
        unexpected,
    }
}

fn load_records(path: &Path) -> KeyOpsResult<Vec<DepositRecord>> {
    let contents = fs::read_to_string(path).map_err(|e| artifact_io(path, e))?;
    serde_json::from_str(&contents)
        .map_err(|e| KeyOpsError::Serialization(format!("deposit decode: {}", e)))
}

fn artifact_io(path: &Path, source: std::io::Error) -> KeyOpsError {
    KeyOpsError::ArtifactIo {
        path: path.display().to_string(),
        source,
    }
}

fn anyhow_invalid_signature(public_key: &str) -> anyhow::Error {
    anyhow::anyhow!("signature for {} failed verification", public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stakeops_types::StoreLifecycle;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("stakeops-deposits-{}", uuid::Uuid::new_v4()))
    }

    fn seed() -> PoolSeed {
        PoolSeed::from_phrase("abandon abandon about")
    }

    fn params() -> NetworkParams {
        NetworkParams::new("kurtosis", "0x10000038").unwrap()
    }

    fn active_record(seed: &PoolSeed, index: u32) -> KeyRecord {
        let created = Utc::now() + Duration::seconds(index as i64);
        KeyRecord {
            public_key: derive_signing_keypair(seed, index).public_key_hex(),
            mnemonic_index: index,
            batch_id: "batch-1".to_string(),
            status: KeyStatus::Active,
            store_lifecycle: StoreLifecycle::Present,
            client_type: None,
            created_at: created,
            updated_at: created,
            notes: None,
            version: 2,
        }
    }

    #[test]
    fn test_generate_one_record_per_active_key() {
        let seed = seed();
        let keys: Vec<KeyRecord> = (0..4).map(|i| active_record(&seed, i)).collect();
        let generator = DepositGenerator::new(temp_dir(), params());

        let outcome = generator
            .generate(&seed, &keys, &WithdrawalSpec::Bls, &params(), false)
            .unwrap();
        assert!(!outcome.reused);
        assert_eq!(outcome.records.len(), 4);

        let produced: Vec<&str> = outcome.records.iter().map(|r| r.pubkey.as_str()).collect();
        let expected: Vec<&str> = keys.iter().map(|r| r.public_key.as_str()).collect();
        assert_eq!(produced, expected);

        for record in &outcome.records {
            assert_eq!(record.amount, DEPOSIT_AMOUNT_GWEI);
            assert_eq!(record.fork_version, "10000038");
            assert!(record.withdrawal_credentials.starts_with("00"));
            assert_eq!(record.signature.len(), 192);
        }
        assert!(outcome.deposit_path.exists());
        assert!(outcome
            .deposit_path
            .parent()
            .unwrap()
            .join(STABLE_DEPOSIT_FILE)
            .exists());
    }

    #[test]
    fn test_execution_credentials_carry_address() {
        let seed = seed();
        let keys = vec![active_record(&seed, 0)];
        let generator = DepositGenerator::new(temp_dir(), params());
        let address = [0x89u8; 20];

        let outcome = generator
            .generate(
                &seed,
                &keys,
                &WithdrawalSpec::Execution(address),
                &params(),
                false,
            )
            .unwrap();
        let credentials = &outcome.records[0].withdrawal_credentials;
        assert!(credentials.starts_with("01"));
        assert!(credentials.ends_with(&hex::encode(address)));
    }

    #[test]
    fn test_rejects_non_active_input() {
        let seed = seed();
        let mut key = active_record(&seed, 0);
        key.status = KeyStatus::Unused;
        let generator = DepositGenerator::new(temp_dir(), params());

        let err = generator
            .generate(&seed, &[key.clone()], &WithdrawalSpec::Bls, &params(), false)
            .unwrap_err();
        match err {
            KeyOpsError::WorkflowInconsistency {
                stage, unexpected, ..
            } => {
                assert_eq!(stage, "deposit-input");
                assert_eq!(unexpected, vec![key.public_key]);
            }
            other => panic!("expected WorkflowInconsistency, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_mismatched_params() {
        let seed = seed();
        let keys = vec![active_record(&seed, 0)];
        let generator = DepositGenerator::new(temp_dir(), params());

        let other_fork = NetworkParams::new("kurtosis", "0x00000000").unwrap();
        let err = generator
            .generate(&seed, &keys, &WithdrawalSpec::Bls, &other_fork, false)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyOpsError::NetworkParamsMismatch { ref field, .. } if field == "fork_version"
        ));

        let other_network = NetworkParams::new("mainnet", "0x10000038").unwrap();
        let err = generator
            .generate(&seed, &keys, &WithdrawalSpec::Bls, &other_network, false)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyOpsError::NetworkParamsMismatch { ref field, .. } if field == "network_name"
        ));
    }

    #[test]
    fn test_rerun_same_inputs_is_noop() {
        let seed = seed();
        let keys: Vec<KeyRecord> = (0..2).map(|i| active_record(&seed, i)).collect();
        let generator = DepositGenerator::new(temp_dir(), params());

        let first = generator
            .generate(&seed, &keys, &WithdrawalSpec::Bls, &params(), false)
            .unwrap();
        let written = fs::read_to_string(&first.deposit_path).unwrap();

        let second = generator
            .generate(&seed, &keys, &WithdrawalSpec::Bls, &params(), false)
            .unwrap();
        assert!(second.reused);
        assert_eq!(second.records, first.records);
        assert_eq!(fs::read_to_string(&second.deposit_path).unwrap(), written);
    }

    #[test]
    fn test_changed_key_set_requires_overwrite() {
        let seed = seed();
        let generator = DepositGenerator::new(temp_dir(), params());
        let first_keys = vec![active_record(&seed, 0)];
        generator
            .generate(&seed, &first_keys, &WithdrawalSpec::Bls, &params(), false)
            .unwrap();

        let second_keys = vec![active_record(&seed, 0), active_record(&seed, 1)];
        let err = generator
            .generate(&seed, &second_keys, &WithdrawalSpec::Bls, &params(), false)
            .unwrap_err();
        match err {
            KeyOpsError::WorkflowInconsistency { stage, missing, .. } => {
                assert_eq!(stage, "deposit-artifact");
                assert_eq!(missing, vec![second_keys[1].public_key.clone()]);
            }
            other => panic!("expected WorkflowInconsistency, got {:?}", other),
        }

        let outcome = generator
            .generate(&seed, &second_keys, &WithdrawalSpec::Bls, &params(), true)
            .unwrap();
        assert!(!outcome.reused);
        assert_eq!(outcome.records.len(), 2);
    }

    #[test]
    fn test_foreign_record_detected_before_signing() {
        let seed = seed();
        let mut key = active_record(&seed, 0);
        key.public_key = "ff".repeat(48);
        let generator = DepositGenerator::new(temp_dir(), params());

        let err = generator
            .generate(&seed, &[key], &WithdrawalSpec::Bls, &params(), false)
            .unwrap_err();
        assert!(matches!(err, KeyOpsError::CorruptedRecord { .. }));
    }
}
