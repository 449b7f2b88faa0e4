//! Error taxonomy shared across the key lifecycle components.
//!
//! Every failure a CLI subcommand can surface maps to exactly one variant
//! here, each with a stable machine-readable category and exit code.
//! Transient connectivity failures are marked retriable, but a retriable
//! error never implies the remote side saw no effect; callers are expected
//! to re-check status after ambiguous outcomes.

use thiserror::Error;

/// Errors that can occur across the key pool, deposit, and workflow layers.
#[derive(Debug, Error)]
pub enum KeyOpsError {
    /// Secret store unreachable or failing. Retriable with backoff.
    #[error("secret store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Remote signer unreachable or failing. Retriable with backoff.
    #[error("remote signer unavailable: {reason}")]
    SignerUnavailable { reason: String },

    /// Request rejected by a service's authorization layer. Fatal until the
    /// operator fixes credentials.
    #[error("permission denied by {service}: {reason}")]
    PermissionDenied { service: String, reason: String },

    /// No record exists at the key's path.
    #[error("key {public_key} not found in store")]
    NotFound { public_key: String },

    /// Record exists but its material has been deleted. `destroyed` tells
    /// the caller whether undelete can still recover it.
    #[error("key {public_key} material is gone (destroyed: {destroyed})")]
    Gone { public_key: String, destroyed: bool },

    /// Fewer unused keys than a selection asked for. Nothing was changed.
    #[error("insufficient unused keys in pool: requested {requested}, available {available}")]
    InsufficientPool { requested: usize, available: usize },

    /// Malformed withdrawal address or unsupported credential type.
    #[error("invalid withdrawal spec: {reason}")]
    InvalidWithdrawalSpec { reason: String },

    /// Supplied chain parameters disagree with the configured target.
    #[error("network params mismatch for {field}: expected {expected}, got {actual}")]
    NetworkParamsMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// A generated key collides with an existing record. Never overwritten.
    #[error("duplicate key at index {mnemonic_index}: {public_key} already exists")]
    DuplicateKey {
        public_key: String,
        mnemonic_index: u32,
    },

    /// The activated key set and the deposit/signer key set diverged.
    /// Fatal to the current operation; repair is an explicit operator action.
    #[error(
        "workflow inconsistency at {stage}: missing [{}], unexpected [{}]",
        .missing.join(", "),
        .unexpected.join(", ")
    )]
    WorkflowInconsistency {
        stage: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Crypto collaborator failure, carried verbatim.
    #[error("deposit signing failed: {source}")]
    SigningFailed {
        #[source]
        source: anyhow::Error,
    },

    /// Remote-signer export rejected after keys were transitioned; the
    /// transition has been rolled back.
    #[error("signer export failed ({rolled_back} activations rolled back): {reason}")]
    ExportFailed { reason: String, rolled_back: usize },

    /// Optimistic-concurrency precondition failed; the record moved under us.
    #[error("version conflict on key {public_key}: expected version {expected}")]
    VersionConflict { public_key: String, expected: u64 },

    /// Record metadata exists but its material cannot be decoded.
    #[error("corrupted record for key {public_key}: {reason}")]
    CorruptedRecord { public_key: String, reason: String },

    /// Configuration rejected at load or validation time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Failed to read or write a boundary artifact file.
    #[error("artifact io error at {path}: {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding error outside the store payloads.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KeyOpsError {
    /// Stable machine-readable category, printed by every CLI subcommand.
    pub fn category(&self) -> &'static str {
        match self {
            KeyOpsError::StoreUnavailable { .. } => "store_unavailable",
            KeyOpsError::SignerUnavailable { .. } => "signer_unavailable",
            KeyOpsError::PermissionDenied { .. } => "permission_denied",
            KeyOpsError::NotFound { .. } => "not_found",
            KeyOpsError::Gone { .. } => "gone",
            KeyOpsError::InsufficientPool { .. } => "insufficient_pool",
            KeyOpsError::InvalidWithdrawalSpec { .. } => "invalid_withdrawal_spec",
            KeyOpsError::NetworkParamsMismatch { .. } => "network_params_mismatch",
            KeyOpsError::DuplicateKey { .. } => "duplicate_key",
            KeyOpsError::WorkflowInconsistency { .. } => "workflow_inconsistency",
            KeyOpsError::SigningFailed { .. } => "signing_failed",
            KeyOpsError::ExportFailed { .. } => "export_failed",
            KeyOpsError::VersionConflict { .. } => "version_conflict",
            KeyOpsError::CorruptedRecord { .. } => "corrupted_record",
            KeyOpsError::InvalidConfig { .. } => "invalid_config",
            KeyOpsError::ArtifactIo { .. } => "artifact_io",
            KeyOpsError::Serialization(_) => "serialization",
        }
    }

    /// Process exit code for the CLI. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            KeyOpsError::StoreUnavailable { .. } => 10,
            KeyOpsError::SignerUnavailable { .. } => 11,
            KeyOpsError::PermissionDenied { .. } => 12,
            KeyOpsError::NotFound { .. } => 13,
            KeyOpsError::Gone { .. } => 14,
            KeyOpsError::InsufficientPool { .. } => 20,
            KeyOpsError::InvalidWithdrawalSpec { .. } => 21,
            KeyOpsError::NetworkParamsMismatch { .. } => 22,
            KeyOpsError::DuplicateKey { .. } => 30,
            KeyOpsError::WorkflowInconsistency { .. } => 31,
            KeyOpsError::SigningFailed { .. } => 32,
            KeyOpsError::ExportFailed { .. } => 33,
            KeyOpsError::VersionConflict { .. } => 34,
            KeyOpsError::CorruptedRecord { .. } => 35,
            KeyOpsError::InvalidConfig { .. } => 40,
            KeyOpsError::ArtifactIo { .. } => 41,
            KeyOpsError::Serialization(_) => 42,
        }
    }

    /// Whether a retry with backoff can help. A retriable failure still has
    /// unknown remote side effects; verify status before re-running a
    /// mutating operation.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KeyOpsError::StoreUnavailable { .. } | KeyOpsError::SignerUnavailable { .. }
        )
    }
}

/// Result type for key lifecycle operations.
pub type KeyOpsResult<T> = Result<T, KeyOpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinct_exit_codes() {
        let errors = [
            KeyOpsError::StoreUnavailable {
                reason: "x".into(),
            },
            KeyOpsError::SignerUnavailable {
                reason: "x".into(),
            },
            KeyOpsError::InsufficientPool {
                requested: 5,
                available: 3,
            },
            KeyOpsError::DuplicateKey {
                public_key: "ab".into(),
                mnemonic_index: 7,
            },
            KeyOpsError::WorkflowInconsistency {
                stage: "post-deposit".into(),
                missing: vec!["aa".into()],
                unexpected: vec![],
            },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_retriable_only_for_connectivity() {
        assert!(KeyOpsError::StoreUnavailable {
            reason: "timeout".into()
        }
        .is_retriable());
        assert!(!KeyOpsError::InsufficientPool {
            requested: 2,
            available: 0
        }
        .is_retriable());
    }

    #[test]
    fn test_inconsistency_message_names_keys() {
        let err = KeyOpsError::WorkflowInconsistency {
            stage: "signer-verify".into(),
            missing: vec!["aabb".into(), "ccdd".into()],
            unexpected: vec!["eeff".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("signer-verify"));
        assert!(msg.contains("aabb, ccdd"));
        assert!(msg.contains("eeff"));
        assert_eq!(err.category(), "workflow_inconsistency");
    }

    #[test]
    fn test_insufficient_pool_message() {
        let err = KeyOpsError::InsufficientPool {
            requested: 5,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient unused keys in pool: requested 5, available 3"
        );
    }
}
