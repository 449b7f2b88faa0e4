//! Service wiring: one typed client per remote service, constructed once
//! from the validated configuration and passed into every component.

use std::sync::Arc;

use stakeops_deposits::DepositGenerator;
use stakeops_pool::KeyPoolManager;
use stakeops_signer::{RemoteSigner, Web3SignerClient};
use stakeops_store::{SecretStore, VaultClient};
use stakeops_types::KeyOpsResult;
use stakeops_workflow::{Reconciler, WorkflowCoordinator};
use tracing::debug;

use crate::config::Config;

/// Constructed clients and the components built over them.
pub struct Services {
    pub store: Arc<dyn SecretStore>,
    pub signer: Arc<dyn RemoteSigner>,
    config: Config,
}

impl Services {
    pub fn build(config: &Config) -> KeyOpsResult<Self> {
        debug!(
            vault_addr = %config.vault_addr,
            signer_url = %config.signer_url,
            "building service clients"
        );
        let store: Arc<dyn SecretStore> = Arc::new(VaultClient::new(
            config.vault_addr.clone(),
            config.vault_mount.clone(),
            config.key_prefix.clone(),
            config.vault_token.clone(),
            config.timeout_secs,
        )?);
        let signer: Arc<dyn RemoteSigner> = Arc::new(Web3SignerClient::new(
            config.signer_url.clone(),
            config.timeout_secs,
        )?);
        Ok(Self {
            store,
            signer,
            config: config.clone(),
        })
    }

    pub fn pool_manager(&self) -> KeyPoolManager {
        KeyPoolManager::new(
            self.store.clone(),
            self.signer.clone(),
            self.config.artifacts_dir.clone(),
        )
    }

    pub fn deposit_generator(&self) -> KeyOpsResult<DepositGenerator> {
        Ok(DepositGenerator::new(
            self.config.artifacts_dir.clone(),
            self.config.network_params()?,
        ))
    }

    pub fn coordinator(&self) -> KeyOpsResult<WorkflowCoordinator> {
        Ok(WorkflowCoordinator::new(
            self.store.clone(),
            self.signer.clone(),
            self.pool_manager(),
            self.deposit_generator()?,
        ))
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
