//! Configuration management for the stakeops CLI.
//!
//! Loads `~/.stakeops/config.toml`, creating it with defaults on first
//! run. Every recognized option is an explicit field with a default and a
//! validation rule; unknown fields are rejected at parse time rather than
//! silently ignored. The `VAULT_TOKEN` environment variable overrides the
//! configured store token, and CLI flags override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use stakeops_types::{parse_fork_version, KeyOpsError, KeyOpsResult, NetworkParams};

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Secret store (Vault) address
    #[serde(default = "default_vault_addr")]
    pub vault_addr: String,

    /// Secret store token (overridden by VAULT_TOKEN)
    #[serde(default = "default_vault_token")]
    pub vault_token: String,

    /// KV v2 mount holding key records
    #[serde(default = "default_vault_mount")]
    pub vault_mount: String,

    /// Path prefix for key records under the mount
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Remote signer base URL
    #[serde(default = "default_signer_url")]
    pub signer_url: String,

    /// Directory for the pool seed, pool index, and deposit artifacts
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Target network name, recorded in deposit artifacts
    #[serde(default = "default_network_name")]
    pub network_name: String,

    /// Target fork version, 0x-prefixed hex
    #[serde(default = "default_fork_version")]
    pub fork_version: String,

    /// Deposit contract address on the target network, if pinned
    #[serde(default)]
    pub deposit_contract_address: Option<String>,

    /// Timeout for store and signer requests (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Output format (table, json)
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Enable colored output
    #[serde(default = "default_colored")]
    pub colored: bool,
}

fn default_vault_addr() -> String {
    "http://localhost:8200".to_string()
}

fn default_vault_token() -> String {
    "root".to_string()
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

fn default_key_prefix() -> String {
    "validator-keys".to_string()
}

fn default_signer_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".stakeops").join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}

fn default_network_name() -> String {
    "devnet".to_string()
}

fn default_fork_version() -> String {
    "0x10000038".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_output_format() -> String {
    "table".to_string()
}

fn default_colored() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_addr: default_vault_addr(),
            vault_token: default_vault_token(),
            vault_mount: default_vault_mount(),
            key_prefix: default_key_prefix(),
            signer_url: default_signer_url(),
            artifacts_dir: default_artifacts_dir(),
            network_name: default_network_name(),
            fork_version: default_fork_version(),
            deposit_contract_address: None,
            timeout_secs: default_timeout(),
            output_format: default_output_format(),
            colored: default_colored(),
        }
    }
}

impl Config {
    /// Default path of the config file.
    pub fn config_path() -> KeyOpsResult<PathBuf> {
        let home_dir = dirs::home_dir().ok_or_else(|| KeyOpsError::InvalidConfig {
            reason: "could not determine home directory".to_string(),
        })?;
        Ok(home_dir.join(".stakeops").join("config.toml"))
    }

    /// Load configuration from `path` (or the default location), creating
    /// the default file when missing. Applies the `VAULT_TOKEN` override
    /// and validates before returning.
    pub fn load(path: Option<&Path>) -> KeyOpsResult<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|e| KeyOpsError::ArtifactIo {
                    path: config_path.display().to_string(),
                    source: e,
                })?;
            toml::from_str(&contents).map_err(|e| KeyOpsError::InvalidConfig {
                reason: format!("{}: {}", config_path.display(), e),
            })?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            if !token.is_empty() {
                config.vault_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> KeyOpsResult<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, path: &Path) -> KeyOpsResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| KeyOpsError::ArtifactIo {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| KeyOpsError::Serialization(format!("config encode: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| KeyOpsError::ArtifactIo {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Reject malformed values before any service is contacted.
    pub fn validate(&self) -> KeyOpsResult<()> {
        check_url("vault_addr", &self.vault_addr)?;
        check_url("signer_url", &self.signer_url)?;
        parse_fork_version(&self.fork_version)?;
        if self.output_format != "table" && self.output_format != "json" {
            return Err(KeyOpsError::InvalidConfig {
                reason: format!(
                    "output_format must be 'table' or 'json', got {:?}",
                    self.output_format
                ),
            });
        }
        if self.timeout_secs == 0 {
            return Err(KeyOpsError::InvalidConfig {
                reason: "timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.vault_mount.is_empty() || self.key_prefix.is_empty() {
            return Err(KeyOpsError::InvalidConfig {
                reason: "vault_mount and key_prefix must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Chain identity of the configured target.
    pub fn network_params(&self) -> KeyOpsResult<NetworkParams> {
        let mut params = NetworkParams::new(self.network_name.clone(), &self.fork_version)?;
        if let Some(address) = &self.deposit_contract_address {
            params = params.with_deposit_contract(address.clone());
        }
        Ok(params)
    }

    /// Update store address
    pub fn set_vault_addr(&mut self, addr: String) -> KeyOpsResult<()> {
        check_url("vault_addr", &addr)?;
        self.vault_addr = addr;
        self.save()
    }

    /// Update signer URL
    pub fn set_signer_url(&mut self, url: String) -> KeyOpsResult<()> {
        check_url("signer_url", &url)?;
        self.signer_url = url;
        self.save()
    }

    /// Update output format
    pub fn set_output_format(&mut self, format: String) -> KeyOpsResult<()> {
        if format != "table" && format != "json" {
            return Err(KeyOpsError::InvalidConfig {
                reason: "output format must be 'table' or 'json'".to_string(),
            });
        }
        self.output_format = format;
        self.save()
    }
}

fn check_url(field: &str, value: &str) -> KeyOpsResult<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(KeyOpsError::InvalidConfig {
            reason: format!("{} must be an http(s) URL, got {:?}", field, value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.vault_addr, "http://localhost:8200");
        assert_eq!(config.signer_url, "http://localhost:9000");
        assert_eq!(config.output_format, "table");
        assert!(config.colored);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.vault_addr, config.vault_addr);
        assert_eq!(parsed.fork_version, config.fork_version);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = toml::from_str::<Config>("vault_addres = \"http://x\"").unwrap_err();
        assert!(err.to_string().contains("vault_addres"));
    }

    #[test]
    fn test_validation_rejects_malformed_values() {
        let mut config = Config::default();
        config.fork_version = "0x123".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vault_addr = "localhost:8200".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output_format = "yaml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_params_from_config() {
        let mut config = Config::default();
        config.deposit_contract_address =
            Some("0x4242424242424242424242424242424242424242".into());
        let params = config.network_params().unwrap();
        assert_eq!(params.fork_version, [0x10, 0x00, 0x00, 0x38]);
        assert_eq!(params.network_name, "devnet");
        assert!(params.deposit_contract_address.is_some());
    }
}
