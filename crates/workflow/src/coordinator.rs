//! Consistency coordinator: one entry point that activates keys and
//! produces their deposits, refusing to finish unless both sides agree.
//!
//! The coordinator exists because activation and deposit generation talk
//! to two services that share no transaction. It pins the deposit run to
//! the exact record set the activation returned, and verifies the signer's
//! loaded set before signing and the produced deposit set after. A failed
//! verification aborts with the divergent keys named; repair is left to
//! the operator.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use stakeops_deposits::{DepositGenerator, DepositManifest};
use stakeops_pool::{load_or_create_seed, KeyPoolManager, PoolStatus};
use stakeops_signer::RemoteSigner;
use stakeops_store::SecretStore;
use stakeops_types::{
    KeyFilter, KeyOpsError, KeyOpsResult, KeyStatus, NetworkParams, WithdrawalSpec,
};

/// Sequences pool activation and deposit generation with pre/post
/// verification.
pub struct WorkflowCoordinator {
    store: Arc<dyn SecretStore>,
    signer: Arc<dyn RemoteSigner>,
    pool: KeyPoolManager,
    generator: DepositGenerator,
}

/// What a successful coordinated run did.
#[derive(Debug, Serialize)]
pub struct WorkflowReport {
    pub activated_public_keys: Vec<String>,
    pub batch_ids: Vec<String>,
    pub deposit_path: PathBuf,
    pub deposit_count: usize,
    /// True when the deposit artifacts from an identical prior run were
    /// reused instead of rewritten.
    pub deposits_reused: bool,
}

/// Difference between the currently-active record set and the signer's
/// loaded set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignerDivergence {
    /// Active in the pool but not loaded in the signer.
    pub active_not_loaded: Vec<String>,
    /// Loaded in the signer but not active in the pool.
    pub loaded_not_active: Vec<String>,
}

impl SignerDivergence {
    pub fn is_consistent(&self) -> bool {
        self.active_not_loaded.is_empty() && self.loaded_not_active.is_empty()
    }
}

/// Read-only diagnosis of the pool, signer, and deposit artifacts.
#[derive(Debug, Serialize)]
pub struct WorkflowStatusReport {
    pub store_healthy: bool,
    pub total_records: usize,
    pub signer_healthy: bool,
    pub signer_loaded: usize,
    pub pool: PoolStatus,
    pub divergence: SignerDivergence,
    pub latest_deposit: Option<DepositManifest>,
}

impl WorkflowCoordinator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        signer: Arc<dyn RemoteSigner>,
        pool: KeyPoolManager,
        generator: DepositGenerator,
    ) -> Self {
        Self {
            store,
            signer,
            pool,
            generator,
        }
    }

    pub fn pool(&self) -> &KeyPoolManager {
        &self.pool
    }

    /// Activate `count` keys and produce deposits for exactly that set.
    ///
    /// Steps: activation, signer-set verification, deposit generation
    /// restricted to the activated records, deposit-set verification.
    /// Step failures after activation leave the keys active; the error
    /// names the divergent keys and `check_workflow_status` will keep
    /// reporting the divergence until the operator resolves it.
    pub async fn run_consistent_workflow(
        &self,
        count: usize,
        withdrawal_spec: &WithdrawalSpec,
        params: &NetworkParams,
        overwrite: bool,
    ) -> KeyOpsResult<WorkflowReport> {
        info!(count, fork_version = %params.fork_version_hex(), "starting coordinated workflow");

        let activation = self.pool.activate_keys(count, None).await?;
        let activated = activation.public_keys();
        if activated.len() != count {
            return Err(KeyOpsError::WorkflowInconsistency {
                stage: "activation-count".to_string(),
                missing: Vec::new(),
                unexpected: activated,
            });
        }

        let loaded = self.signer.list_public_keys().await?;
        verify_signer_loaded(&activated, &loaded)?;

        let seed = load_or_create_seed(self.pool.artifacts_dir())?;
        let outcome = self.generator.generate(
            &seed,
            &activation.activated,
            withdrawal_spec,
            params,
            overwrite,
        )?;

        let produced: Vec<String> = outcome.records.iter().map(|r| r.pubkey.clone()).collect();
        if let Err(e) = verify_deposit_match(&activated, &produced) {
            if !outcome.reused {
                self.discard_artifacts(&outcome.deposit_path, &params.fork_version_hex());
            }
            return Err(e);
        }

        info!(
            activated = activated.len(),
            deposits = outcome.records.len(),
            "coordinated workflow verified"
        );
        Ok(WorkflowReport {
            activated_public_keys: activated,
            batch_ids: activation.batch_ids,
            deposit_count: outcome.records.len(),
            deposit_path: outcome.deposit_path,
            deposits_reused: outcome.reused,
        })
    }

    /// Read-only report for operator diagnosis. Never mutates anything.
    ///
    /// A signer outage degrades the report (signer marked unhealthy, every
    /// active key reported as not loaded) instead of failing it; the store
    /// is required, since everything else is derived from its listing.
    pub async fn check_workflow_status(&self) -> KeyOpsResult<WorkflowStatusReport> {
        let store_healthy = match self.store.health().await {
            Ok(health) => health.is_healthy(),
            Err(e) => {
                warn!(error = %e, "store health probe failed");
                false
            }
        };

        let records = self
            .store
            .list(&KeyFilter::default().including_unavailable())
            .await?;
        let pool = self.pool.pool_status().await?;

        let (signer_healthy, loaded) = match self.signer.list_public_keys().await {
            Ok(keys) => (self.signer.upcheck().await.is_ok(), keys),
            Err(e) => {
                warn!(error = %e, "signer key listing failed");
                (false, Vec::new())
            }
        };

        let active: BTreeSet<&str> = records
            .iter()
            .filter(|r| r.status == KeyStatus::Active && r.is_available())
            .map(|r| r.public_key.as_str())
            .collect();
        let loaded_set: BTreeSet<&str> = loaded.iter().map(String::as_str).collect();
        let divergence = SignerDivergence {
            active_not_loaded: active
                .difference(&loaded_set)
                .map(|k| k.to_string())
                .collect(),
            loaded_not_active: loaded_set
                .difference(&active)
                .map(|k| k.to_string())
                .collect(),
        };

        let latest_deposit = DepositManifest::load_latest(self.generator.artifacts_dir())?;

        Ok(WorkflowStatusReport {
            store_healthy,
            total_records: records.len(),
            signer_healthy,
            signer_loaded: loaded.len(),
            pool,
            divergence,
            latest_deposit,
        })
    }

    /// Best-effort removal of deposit artifacts written by a run whose
    /// verification failed.
    fn discard_artifacts(&self, deposit_path: &PathBuf, fork_hex: &str) {
        let manifest_path =
            DepositManifest::path(self.generator.artifacts_dir(), fork_hex);
        let stable_path = self
            .generator
            .artifacts_dir()
            .join(stakeops_deposits::STABLE_DEPOSIT_FILE);
        for path in [deposit_path, &manifest_path, &stable_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to discard deposit artifact");
                }
            }
        }
    }
}

/// Every activated key must already be loaded in the signer.
fn verify_signer_loaded(activated: &[String], loaded: &[String]) -> KeyOpsResult<()> {
    let loaded_set: BTreeSet<&str> = loaded.iter().map(String::as_str).collect();
    let missing: Vec<String> = activated
        .iter()
        .filter(|k| !loaded_set.contains(k.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(KeyOpsError::WorkflowInconsistency {
            stage: "signer-verify".to_string(),
            missing,
            unexpected: Vec::new(),
        });
    }
    Ok(())
}

/// The produced deposit set must equal the activated set exactly.
fn verify_deposit_match(activated: &[String], produced: &[String]) -> KeyOpsResult<()> {
    let activated_set: BTreeSet<&str> = activated.iter().map(String::as_str).collect();
    let produced_set: BTreeSet<&str> = produced.iter().map(String::as_str).collect();
    if activated_set == produced_set && activated.len() == produced.len() {
        return Ok(());
    }
    Err(KeyOpsError::WorkflowInconsistency {
        stage: "deposit-verify".to_string(),
        missing: activated_set
            .difference(&produced_set)
            .map(|k| k.to_string())
            .collect(),
        unexpected: produced_set
            .difference(&activated_set)
            .map(|k| k.to_string())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_signer_loaded_names_missing() {
        let activated = vec!["aa".repeat(48), "bb".repeat(48)];
        let loaded = vec!["aa".repeat(48), "cc".repeat(48)];
        let err = verify_signer_loaded(&activated, &loaded).unwrap_err();
        match err {
            KeyOpsError::WorkflowInconsistency { stage, missing, .. } => {
                assert_eq!(stage, "signer-verify");
                assert_eq!(missing, vec!["bb".repeat(48)]);
            }
            other => panic!("expected WorkflowInconsistency, got {:?}", other),
        }

        assert!(verify_signer_loaded(&activated, &[activated.clone(), loaded].concat()).is_ok());
    }

    #[test]
    fn test_verify_deposit_match_is_strict_set_equality() {
        let activated = vec!["aa".repeat(48), "bb".repeat(48)];
        assert!(verify_deposit_match(&activated, &activated).is_ok());

        let reversed: Vec<String> = activated.iter().rev().cloned().collect();
        assert!(verify_deposit_match(&activated, &reversed).is_ok());

        let err = verify_deposit_match(&activated, &activated[..1].to_vec()).unwrap_err();
        match err {
            KeyOpsError::WorkflowInconsistency {
                stage,
                missing,
                unexpected,
            } => {
                assert_eq!(stage, "deposit-verify");
                assert_eq!(missing, vec!["bb".repeat(48)]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected WorkflowInconsistency, got {:?}", other),
        }

        let extra = vec!["aa".repeat(48), "bb".repeat(48), "cc".repeat(48)];
        let err = verify_deposit_match(&activated, &extra).unwrap_err();
        assert!(matches!(
            err,
            KeyOpsError::WorkflowInconsistency { ref unexpected, .. }
                if unexpected == &vec!["cc".repeat(48)]
        ));
    }
}
