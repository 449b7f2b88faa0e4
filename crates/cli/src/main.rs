//! Validator key lifecycle CLI.
//!
//! Command-line interface for the key lifecycle and deposit-consistency
//! subsystem. Provides commands for:
//! - Key pool management (init-pool, activate-keys, pool-status, list-keys)
//! - Deposit generation (create-deposits-for-active-keys)
//! - Coordinated activation+deposit workflow (consistent-workflow)
//! - Store reconciliation (destroy-deleted, clean-corrupted)
//! - Diagnostics (check-workflow-status, check-services)

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod output;
mod services;

use config::Config;
use output::OutputFormatter;
use services::Services;
use stakeops_types::{KeyOpsError, KeyOpsResult};

/// Validator key lifecycle CLI
#[derive(Parser)]
#[command(name = "stakeops")]
#[command(author, version, about = "Validator key lifecycle and deposit consistency CLI", long_about = None)]
struct Cli {
    /// Config file path (overrides the default location)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Secret store address (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    vault_addr: Option<String>,

    /// Remote signer URL (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    signer_url: Option<String>,

    /// Artifacts directory (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Output format: table, json
    #[arg(long, global = true, value_name = "FORMAT")]
    output: Option<String>,

    /// Enable JSON output (shorthand for --output json)
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Increase log verbosity (-v: info, -vv: debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate new keys into the pool as unused records
    InitPool {
        /// Number of keys to generate
        #[arg(long, value_name = "N")]
        count: usize,

        /// Validator client software the keys are earmarked for
        #[arg(long, value_name = "TYPE")]
        client_type: Option<String>,
    },

    /// Activate the oldest unused keys and export them to the signer
    ActivateKeys {
        /// Number of keys to activate
        #[arg(long, value_name = "N")]
        count: usize,

        /// Restrict selection to one generation batch
        #[arg(long, value_name = "B")]
        batch_id: Option<String>,
    },

    /// Generate deposit records for already-active keys
    CreateDepositsForActiveKeys {
        /// Number of active keys to cover
        #[arg(long, value_name = "N")]
        count: usize,

        /// Fork version of the target network (0x-prefixed hex)
        #[arg(long, value_name = "F")]
        fork_version: String,

        /// Execution address for type 0x01 withdrawal credentials
        /// (omit for BLS type 0x00 credentials)
        #[arg(long, value_name = "A")]
        withdrawal_address: Option<String>,

        /// Replace deposit artifacts produced for a different key set
        #[arg(long)]
        overwrite: bool,
    },

    /// Activate keys and generate their deposits as one verified operation
    ConsistentWorkflow {
        /// Number of keys to activate and cover with deposits
        #[arg(long, value_name = "N")]
        count: usize,

        /// Fork version of the target network (0x-prefixed hex)
        #[arg(long, value_name = "F")]
        fork_version: String,

        /// Execution address for type 0x01 withdrawal credentials
        #[arg(long, value_name = "A")]
        withdrawal_address: Option<String>,

        /// Replace deposit artifacts produced for a different key set
        #[arg(long)]
        overwrite: bool,
    },

    /// Show pool counts per status and per batch
    PoolStatus,

    /// Read-only pool/signer/deposit consistency report
    CheckWorkflowStatus,

    /// Destroy the material of every soft-deleted record
    DestroyDeleted {
        /// Suppress per-key output
        #[arg(long)]
        quiet: bool,
    },

    /// Find and resolve records whose material is gone or undecodable
    CleanCorrupted {
        /// Remove corrupted records from the store instead of retiring them
        #[arg(long)]
        remove: bool,

        /// Skip the confirmation prompt for --remove
        #[arg(long)]
        yes: bool,
    },

    /// List key records, optionally filtered
    ListKeys {
        /// Filter by status: unused, active, retired
        #[arg(long, value_name = "S")]
        status: Option<String>,

        /// Filter by generation batch
        #[arg(long, value_name = "B")]
        batch_id: Option<String>,

        /// Filter by validator client annotation
        #[arg(long, value_name = "T")]
        client_type: Option<String>,

        /// Only records created after this RFC 3339 timestamp
        #[arg(long, value_name = "TS")]
        created_after: Option<String>,
    },

    /// Probe the secret store and remote signer
    CheckServices,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set secret store address
    SetVaultAddr {
        /// Store address URL
        addr: String,
    },

    /// Set remote signer URL
    SetSignerUrl {
        /// Signer base URL
        url: String,
    },

    /// Set output format
    SetFormat {
        /// Output format (table or json)
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let colored = !cli.no_color;
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            let formatter = OutputFormatter::new(colored, false);
            formatter.error(&format!("{}: {}", e.category(), e));
            if e.is_retriable() {
                formatter.warning(
                    "the outcome of the interrupted operation is unknown; \
                     run `stakeops pool-status` before retrying",
                );
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> KeyOpsResult<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(addr) = cli.vault_addr {
        config.vault_addr = addr;
    }
    if let Some(url) = cli.signer_url {
        config.signer_url = url;
    }
    if let Some(dir) = cli.artifacts_dir {
        config.artifacts_dir = dir;
    }
    if let Some(output) = cli.output {
        config.output_format = output;
    }
    if cli.json {
        config.output_format = "json".to_string();
    }
    if cli.no_color {
        config.colored = false;
    }
    config.validate()?;

    let formatter = OutputFormatter::new(config.colored, config.output_format == "json");

    // Config commands need no service clients
    let command = match cli.command {
        Commands::Config(config_cmd) => {
            return handle_config_command(config_cmd, config, &formatter);
        }
        other => other,
    };

    let services = Services::build(&config)?;

    match command {
        Commands::InitPool { count, client_type } => {
            commands::pool::init_pool(&services, &formatter, count, client_type).await
        }
        Commands::ActivateKeys { count, batch_id } => {
            commands::pool::activate_keys(&services, &formatter, count, batch_id).await
        }
        Commands::CreateDepositsForActiveKeys {
            count,
            fork_version,
            withdrawal_address,
            overwrite,
        } => {
            commands::deposits::create_deposits(
                &services,
                &formatter,
                count,
                fork_version,
                withdrawal_address,
                overwrite,
            )
            .await
        }
        Commands::ConsistentWorkflow {
            count,
            fork_version,
            withdrawal_address,
            overwrite,
        } => {
            commands::workflow::consistent_workflow(
                &services,
                &formatter,
                count,
                fork_version,
                withdrawal_address,
                overwrite,
            )
            .await
        }
        Commands::PoolStatus => commands::pool::pool_status(&services, &formatter).await,
        Commands::CheckWorkflowStatus => {
            commands::workflow::check_workflow_status(&services, &formatter).await
        }
        Commands::DestroyDeleted { quiet } => {
            commands::cleanup::destroy_deleted(&services, &formatter, quiet).await
        }
        Commands::CleanCorrupted { remove, yes } => {
            commands::cleanup::clean_corrupted(&services, &formatter, remove, yes).await
        }
        Commands::ListKeys {
            status,
            batch_id,
            client_type,
            created_after,
        } => {
            commands::pool::list_keys(
                &services,
                &formatter,
                status,
                batch_id,
                client_type,
                created_after,
            )
            .await
        }
        Commands::CheckServices => commands::workflow::check_services(&services, &formatter).await,
        Commands::Config(_) => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    cmd: ConfigCommands,
    mut config: Config,
    formatter: &OutputFormatter,
) -> KeyOpsResult<()> {
    match cmd {
        ConfigCommands::Show => {
            if formatter.json_mode {
                let mut shown = config.clone();
                shown.vault_token = "<redacted>".to_string();
                formatter.json(&shown)?;
            } else {
                formatter.header("Current Configuration");
                formatter.kv("Store address", &config.vault_addr);
                formatter.kv("Store mount", &config.vault_mount);
                formatter.kv("Key prefix", &config.key_prefix);
                formatter.kv("Signer URL", &config.signer_url);
                formatter.kv("Artifacts dir", &config.artifacts_dir.display().to_string());
                formatter.kv("Network", &config.network_name);
                formatter.kv("Fork version", &config.fork_version);
                formatter.kv(
                    "Deposit contract",
                    config
                        .deposit_contract_address
                        .as_deref()
                        .unwrap_or("Not set"),
                );
                formatter.kv("Timeout", &format!("{}s", config.timeout_secs));
                formatter.kv("Output format", &config.output_format);

                println!();
                let config_path = Config::config_path()?;
                formatter.info(&format!("Config file: {}", config_path.display()));
            }
            Ok(())
        }
        ConfigCommands::SetVaultAddr { addr } => {
            config.set_vault_addr(addr.clone())?;
            formatter.success(&format!("Store address set to: {}", addr));
            Ok(())
        }
        ConfigCommands::SetSignerUrl { url } => {
            config.set_signer_url(url.clone())?;
            formatter.success(&format!("Signer URL set to: {}", url));
            Ok(())
        }
        ConfigCommands::SetFormat { format } => {
            config.set_output_format(format.clone())?;
            formatter.success(&format!("Output format set to: {}", format));
            Ok(())
        }
    }
}
