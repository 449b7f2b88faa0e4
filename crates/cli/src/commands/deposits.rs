//! Deposit generation for already-active keys.

use stakeops_pool::load_or_create_seed;
use stakeops_types::{
    KeyFilter, KeyOpsError, KeyOpsResult, KeyStatus, NetworkParams, WithdrawalSpec,
};

use crate::{output::OutputFormatter, services::Services};

/// Produce deposit records for the oldest `count` active keys.
pub async fn create_deposits(
    services: &Services,
    formatter: &OutputFormatter,
    count: usize,
    fork_version: String,
    withdrawal_address: Option<String>,
    overwrite: bool,
) -> KeyOpsResult<()> {
    let config = services.config();
    let withdrawal_spec = WithdrawalSpec::from_address(withdrawal_address.as_deref())?;
    let mut params = NetworkParams::new(config.network_name.clone(), &fork_version)?;
    if let Some(address) = &config.deposit_contract_address {
        params = params.with_deposit_contract(address.clone());
    }

    let active = services
        .pool_manager()
        .list_keys(&KeyFilter::default().with_status(KeyStatus::Active))
        .await?;
    if active.len() < count {
        return Err(KeyOpsError::InsufficientPool {
            requested: count,
            available: active.len(),
        });
    }

    let seed = load_or_create_seed(&config.artifacts_dir)?;
    let generator = services.deposit_generator()?;
    let outcome = generator.generate(&seed, &active[..count], &withdrawal_spec, &params, overwrite)?;

    if formatter.json_mode {
        return formatter.json(&outcome.records);
    }

    if outcome.reused {
        formatter.info("Deposit artifacts already match this key set; nothing rewritten");
    } else {
        formatter.success(&format!("Generated {} deposit record(s)", outcome.records.len()));
    }
    formatter.kv("Withdrawal type", &withdrawal_spec.to_string());
    formatter.kv("Fork version", &params.fork_version_hex());
    formatter.kv("Network", &params.network_name);
    formatter.kv("Deposit file", &outcome.deposit_path.display().to_string());
    for record in &outcome.records {
        println!("    {}", formatter.short_key(&record.pubkey));
    }
    Ok(())
}
