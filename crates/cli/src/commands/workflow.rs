//! Coordinated workflow commands and service diagnostics.

use stakeops_types::{KeyOpsResult, NetworkParams, WithdrawalSpec};

use crate::{output::OutputFormatter, services::Services};

/// Activate keys and generate their deposits as one verified operation
pub async fn consistent_workflow(
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

    let coordinator = services.coordinator()?;
    let report = coordinator
        .run_consistent_workflow(count, &withdrawal_spec, &params, overwrite)
        .await?;

    if formatter.json_mode {
        return formatter.json(&report);
    }

    formatter.success(&format!(
        "Workflow verified: {} key(s) activated, {} deposit(s) generated",
        report.activated_public_keys.len(),
        report.deposit_count
    ));
    formatter.kv("Batches", &report.batch_ids.join(", "));
    formatter.kv("Deposit file", &report.deposit_path.display().to_string());
    if report.deposits_reused {
        formatter.info("Deposit artifacts from an identical prior run were reused");
    }
    for key in &report.activated_public_keys {
        println!("    {}", formatter.short_key(key));
    }
    Ok(())
}

/// Read-only pool/signer/deposit consistency report
pub async fn check_workflow_status(
    services: &Services,
    formatter: &OutputFormatter,
) -> KeyOpsResult<()> {
    let coordinator = services.coordinator()?;
    let report = coordinator.check_workflow_status().await?;

    if formatter.json_mode {
        return formatter.json(&report);
    }

    formatter.header("Workflow Status");
    formatter.kv("Store healthy", &formatter.format_bool(report.store_healthy));
    formatter.kv("Store records", &report.total_records.to_string());
    formatter.kv("Signer healthy", &formatter.format_bool(report.signer_healthy));
    formatter.kv("Signer keys loaded", &report.signer_loaded.to_string());
    formatter.kv("Pool unused", &report.pool.unused.to_string());
    formatter.kv("Pool active", &report.pool.active.to_string());
    formatter.kv("Pool retired", &report.pool.retired.to_string());

    if report.divergence.is_consistent() {
        formatter.success("Active key set and signer key set are consistent");
    } else {
        formatter.warning("Active key set and signer key set diverge");
        for key in &report.divergence.active_not_loaded {
            println!("    active but not loaded: {}", formatter.short_key(key));
        }
        for key in &report.divergence.loaded_not_active {
            println!("    loaded but not active: {}", formatter.short_key(key));
        }
    }

    match &report.latest_deposit {
        Some(manifest) => {
            formatter.header("Latest Deposit Batch");
            formatter.kv("Fork version", &manifest.fork_version);
            formatter.kv("Network", &manifest.network_name);
            formatter.kv("Withdrawal type", &manifest.withdrawal_type);
            formatter.kv("Keys", &manifest.public_keys.len().to_string());
            formatter.kv(
                "Generated",
                &formatter.format_timestamp(&manifest.generated_at),
            );
        }
        None => formatter.info("No deposit batch generated yet"),
    }
    Ok(())
}

/// Probe the secret store and remote signer
pub async fn check_services(services: &Services, formatter: &OutputFormatter) -> KeyOpsResult<()> {
    let store_health = services.store.health().await;
    let signer_up = services.signer.upcheck().await;
    let signer_keys = match &signer_up {
        Ok(()) => services.signer.list_public_keys().await.ok(),
        Err(_) => None,
    };

    if formatter.json_mode {
        let report = serde_json::json!({
            "store_healthy": store_health.as_ref().map(|h| h.is_healthy()).unwrap_or(false),
            "store_error": store_health.as_ref().err().map(|e| e.to_string()),
            "signer_healthy": signer_up.is_ok(),
            "signer_error": signer_up.as_ref().err().map(|e| e.to_string()),
            "signer_loaded": signer_keys.as_ref().map(Vec::len),
        });
        return formatter.json(&report);
    }

    formatter.header("Service Status");
    match store_health {
        Ok(health) if health.is_healthy() => {
            formatter.success(&format!("Secret store reachable (version {})", health.version));
        }
        Ok(health) => {
            formatter.warning(&format!(
                "Secret store reachable but not serving (initialized: {}, sealed: {})",
                health.initialized, health.sealed
            ));
        }
        Err(e) => formatter.error(&format!("Secret store: {}", e)),
    }
    match signer_up {
        Ok(()) => {
            formatter.success("Remote signer reachable");
            if let Some(keys) = signer_keys {
                formatter.kv("Keys loaded", &keys.len().to_string());
            }
        }
        Err(e) => formatter.error(&format!("Remote signer: {}", e)),
    }
    Ok(())
}
