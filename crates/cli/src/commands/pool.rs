//! Key pool commands: generation, activation, status, and listing.

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use stakeops_types::{KeyFilter, KeyOpsError, KeyOpsResult, KeyStatus};

use crate::{output::OutputFormatter, services::Services};

/// Generate new keys into the pool
pub async fn init_pool(
    services: &Services,
    formatter: &OutputFormatter,
    count: usize,
    client_type: Option<String>,
) -> KeyOpsResult<()> {
    if count == 0 {
        return Err(KeyOpsError::InvalidConfig {
            reason: "count must be greater than zero".to_string(),
        });
    }

    let manager = services.pool_manager();

    let progress = if formatter.json_mode {
        None
    } else {
        let pb = ProgressBar::new(count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message("generating keys...");
        Some(pb)
    };

    let outcome = manager
        .init_pool(count, client_type, |done| {
            if let Some(pb) = &progress {
                pb.set_position(done as u64);
            }
        })
        .await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if formatter.json_mode {
        formatter.json(&outcome)?;
    } else {
        formatter.success(&format!("Generated {} key(s)", outcome.public_keys.len()));
        formatter.kv("Batch", &outcome.batch.batch_id);
        formatter.kv("Start index", &outcome.start_index.to_string());
        for key in &outcome.public_keys {
            println!("    {}", formatter.short_key(key));
        }
    }
    Ok(())
}

/// Activate unused keys and export them to the remote signer
pub async fn activate_keys(
    services: &Services,
    formatter: &OutputFormatter,
    count: usize,
    batch_id: Option<String>,
) -> KeyOpsResult<()> {
    let manager = services.pool_manager();
    let outcome = manager.activate_keys(count, batch_id.as_deref()).await?;

    if formatter.json_mode {
        formatter.json(&outcome)?;
    } else {
        formatter.success(&format!(
            "Activated and exported {} key(s)",
            outcome.activated.len()
        ));
        formatter.kv("Batches", &outcome.batch_ids.join(", "));
        for record in &outcome.activated {
            println!(
                "    {} (index {})",
                formatter.short_key(&record.public_key),
                record.mnemonic_index
            );
        }
    }
    Ok(())
}

#[derive(Tabled, Serialize)]
struct BatchRow {
    #[tabled(rename = "Batch")]
    batch_id: String,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Unused")]
    unused: usize,
    #[tabled(rename = "Active")]
    active: usize,
    #[tabled(rename = "Retired")]
    retired: usize,
}

/// Show pool counts per status and per batch
pub async fn pool_status(services: &Services, formatter: &OutputFormatter) -> KeyOpsResult<()> {
    let status = services.pool_manager().pool_status().await?;

    if formatter.json_mode {
        return formatter.json(&status);
    }

    formatter.header("Pool Status");
    formatter.kv("Total", &status.total.to_string());
    formatter.kv("Unused", &status.unused.to_string());
    formatter.kv("Active", &status.active.to_string());
    formatter.kv("Retired", &status.retired.to_string());
    if status.soft_deleted > 0 {
        formatter.kv("Soft-deleted", &status.soft_deleted.to_string());
    }
    if status.destroyed > 0 {
        formatter.kv("Destroyed", &status.destroyed.to_string());
    }

    let rows: Vec<BatchRow> = status
        .batches
        .iter()
        .map(|b| BatchRow {
            batch_id: b.batch_id.clone(),
            total: b.total,
            unused: b.unused,
            active: b.active,
            retired: b.retired,
        })
        .collect();
    formatter.table(rows);
    Ok(())
}

#[derive(Tabled, Serialize)]
struct KeyRow {
    #[tabled(rename = "Public Key")]
    public_key: String,
    #[tabled(rename = "Index")]
    index: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Store")]
    lifecycle: String,
    #[tabled(rename = "Batch")]
    batch_id: String,
    #[tabled(rename = "Client")]
    client_type: String,
    #[tabled(rename = "Created")]
    created: String,
}

/// List key records, optionally filtered
pub async fn list_keys(
    services: &Services,
    formatter: &OutputFormatter,
    status: Option<String>,
    batch_id: Option<String>,
    client_type: Option<String>,
    created_after: Option<String>,
) -> KeyOpsResult<()> {
    let mut filter = KeyFilter::default().including_unavailable();
    if let Some(status) = status {
        let parsed: KeyStatus = status
            .parse()
            .map_err(|reason| KeyOpsError::InvalidConfig { reason })?;
        filter = filter.with_status(parsed);
    }
    if let Some(batch_id) = batch_id {
        filter = filter.with_batch_id(batch_id);
    }
    if let Some(client_type) = client_type {
        filter = filter.with_client_type(client_type);
    }
    if let Some(created_after) = created_after {
        let ts: DateTime<Utc> = created_after
            .parse()
            .map_err(|e| KeyOpsError::InvalidConfig {
                reason: format!("created-after must be an RFC 3339 timestamp: {}", e),
            })?;
        filter = filter.with_created_after(ts);
    }

    let records = services.pool_manager().list_keys(&filter).await?;
    if formatter.json_mode {
        return formatter.json(&records);
    }

    let rows: Vec<KeyRow> = records
        .iter()
        .map(|r| KeyRow {
            public_key: formatter.short_key(&r.public_key),
            index: r.mnemonic_index,
            status: formatter.format_status(r.status),
            lifecycle: formatter.format_lifecycle(r.store_lifecycle),
            batch_id: r.batch_id.clone(),
            client_type: r.client_type.clone().unwrap_or_else(|| "-".to_string()),
            created: formatter.format_timestamp(&r.created_at),
        })
        .collect();
    formatter.table(rows);
    Ok(())
}
