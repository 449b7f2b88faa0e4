//! Reconciliation commands: two-phase delete completion and corrupted
//! record cleanup.

use stakeops_types::KeyOpsResult;

use crate::{output::OutputFormatter, services::Services};

/// Destroy the material of every soft-deleted record
pub async fn destroy_deleted(
    services: &Services,
    formatter: &OutputFormatter,
    quiet: bool,
) -> KeyOpsResult<()> {
    let outcome = services.reconciler().destroy_deleted().await?;

    if formatter.json_mode {
        return formatter.json(&outcome);
    }
    if quiet {
        return Ok(());
    }

    if outcome.destroyed.is_empty() {
        formatter.info("No soft-deleted records to destroy");
    } else {
        formatter.success(&format!(
            "Destroyed {} soft-deleted record(s)",
            outcome.destroyed.len()
        ));
        for key in &outcome.destroyed {
            println!("    {}", formatter.short_key(key));
        }
    }
    if outcome.already_destroyed > 0 {
        formatter.kv("Already destroyed", &outcome.already_destroyed.to_string());
    }
    Ok(())
}

/// Find and resolve records whose material is gone or undecodable
pub async fn clean_corrupted(
    services: &Services,
    formatter: &OutputFormatter,
    remove: bool,
    yes: bool,
) -> KeyOpsResult<()> {
    if remove && !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Permanently remove corrupted records from the store?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            formatter.info("Aborted; no records were removed");
            return Ok(());
        }
    }

    let outcome = services.reconciler().clean_corrupted(remove).await?;

    if formatter.json_mode {
        return formatter.json(&outcome);
    }

    if outcome.corrupted.is_empty() {
        formatter.success("No corrupted records found");
        return Ok(());
    }

    formatter.warning(&format!("{} corrupted record(s)", outcome.corrupted.len()));
    for corrupted in &outcome.corrupted {
        println!(
            "    {}: {}",
            formatter.short_key(&corrupted.public_key),
            corrupted.reason
        );
    }
    if outcome.retired > 0 {
        formatter.kv("Retired", &outcome.retired.to_string());
    }
    if outcome.removed > 0 {
        formatter.kv("Removed from store", &outcome.removed.to_string());
    }
    Ok(())
}
