//! Deposit-side value types: withdrawal specs, network identity, and the
//! deposit record produced for each activated key.

use serde::{Deserialize, Serialize};

use crate::error::{KeyOpsError, KeyOpsResult};

/// Stake per validator, in Gwei (32 ETH).
pub const DEPOSIT_AMOUNT_GWEI: u64 = 32_000_000_000;

/// How a deposit's withdrawal credentials are derived.
///
/// The credential type is an explicit input at generation time; it is never
/// inferred from a key's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalSpec {
    /// Type 0x00: credentials derived from the withdrawal BLS public key.
    Bls,
    /// Type 0x01: credentials bound to a 20-byte execution-layer address.
    Execution([u8; 20]),
}

impl WithdrawalSpec {
    /// Build a spec from an optional operator-supplied execution address.
    /// Absent address selects BLS credentials (type 0x00).
    pub fn from_address(address: Option<&str>) -> KeyOpsResult<Self> {
        match address {
            None => Ok(WithdrawalSpec::Bls),
            Some(addr) => Ok(WithdrawalSpec::Execution(parse_execution_address(addr)?)),
        }
    }

    /// Leading credential type byte (0x00 or 0x01).
    pub fn credential_type(&self) -> u8 {
        match self {
            WithdrawalSpec::Bls => 0x00,
            WithdrawalSpec::Execution(_) => 0x01,
        }
    }

    /// Execution address, when this is a type 0x01 spec.
    pub fn execution_address(&self) -> Option<&[u8; 20]> {
        match self {
            WithdrawalSpec::Bls => None,
            WithdrawalSpec::Execution(addr) => Some(addr),
        }
    }
}

impl std::fmt::Display for WithdrawalSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalSpec::Bls => write!(f, "bls"),
            WithdrawalSpec::Execution(addr) => write!(f, "execution:0x{}", hex::encode(addr)),
        }
    }
}

/// Parse a 20-byte execution-layer address from `0x`-prefixed hex.
pub fn parse_execution_address(input: &str) -> KeyOpsResult<[u8; 20]> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != 40 {
        return Err(KeyOpsError::InvalidWithdrawalSpec {
            reason: format!(
                "execution address must be 20 bytes (40 hex chars), got {} chars",
                stripped.len()
            ),
        });
    }
    let bytes = hex::decode(stripped).map_err(|e| KeyOpsError::InvalidWithdrawalSpec {
        reason: format!("execution address is not valid hex: {}", e),
    })?;
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&bytes);
    Ok(addr)
}

/// Parse a 4-byte fork version from hex, with or without a `0x` prefix.
pub fn parse_fork_version(input: &str) -> KeyOpsResult<[u8; 4]> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != 8 {
        return Err(KeyOpsError::InvalidConfig {
            reason: format!(
                "fork version must be 4 bytes (8 hex chars), got {:?}",
                input
            ),
        });
    }
    let bytes = hex::decode(stripped).map_err(|e| KeyOpsError::InvalidConfig {
        reason: format!("fork version is not valid hex: {}", e),
    })?;
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes);
    Ok(version)
}

/// Chain-identity parameters a deposit batch is signed against.
///
/// Fork version and genesis validators root feed the signing domain; the
/// network name and contract address travel with the artifacts so a batch
/// can always be matched back to its intended chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub network_name: String,
    pub fork_version: [u8; 4],
    /// Zero for deposits signed before genesis, which is the normal case.
    pub genesis_validators_root: [u8; 32],
    pub deposit_contract_address: Option<String>,
}

impl NetworkParams {
    pub fn new(network_name: impl Into<String>, fork_version_hex: &str) -> KeyOpsResult<Self> {
        Ok(Self {
            network_name: network_name.into(),
            fork_version: parse_fork_version(fork_version_hex)?,
            genesis_validators_root: [0u8; 32],
            deposit_contract_address: None,
        })
    }

    pub fn with_deposit_contract(mut self, address: impl Into<String>) -> Self {
        self.deposit_contract_address = Some(address.into());
        self
    }

    /// Fork version as unprefixed lowercase hex, as written into artifacts.
    pub fn fork_version_hex(&self) -> String {
        hex::encode(self.fork_version)
    }
}

/// The signed record registered with the deposit contract for one key.
///
/// Field names and encodings match the deposit-data file format consumed by
/// the submission pipeline: unprefixed lowercase hex, amount in Gwei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub amount: u64,
    pub signature: String,
    pub deposit_message_root: String,
    pub deposit_data_root: String,
    pub fork_version: String,
    pub network_name: String,
}
