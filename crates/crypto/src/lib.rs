//! Cryptographic collaborator for the validator key system.
//!
//! Everything the rest of the workspace needs from cryptography crosses
//! this boundary as plain inputs and outputs:
//! - deterministic BLS12-381 keypair derivation from a pool seed and index
//! - deposit withdrawal credentials, message and data roots, and signatures
//! - password-encrypted keystores for export to the remote signer
//!
//! Callers treat failures here as opaque and wrap them at their own layer.

pub mod bls;
pub mod deposit;
pub mod keystore;

pub use bls::{
    derive_signing_keypair, derive_withdrawal_keypair, signing_key_path, verify_signature,
    withdrawal_key_path, BlsKeypair, PoolSeed,
};
pub use deposit::{
    bls_withdrawal_credentials, compute_deposit_domain, deposit_data_root, deposit_message_root,
    execution_withdrawal_credentials, sign_deposit, signing_root, SignedDeposit,
};
pub use keystore::{build_keystore, open_keystore, Keystore};
