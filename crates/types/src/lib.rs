//! Shared types for the validator key lifecycle system.
//!
//! Defines the two state machines every other crate agrees on — the
//! application-level `KeyStatus` and the store-level `StoreLifecycle` —
//! along with the key/batch/deposit data model and the error taxonomy.

pub mod deposit;
pub mod error;
pub mod key;

pub use deposit::{
    parse_execution_address, parse_fork_version, DepositRecord, NetworkParams, WithdrawalSpec,
    DEPOSIT_AMOUNT_GWEI,
};
pub use error::{KeyOpsError, KeyOpsResult};
pub use key::{
    normalize_public_key, BatchInfo, KeyFilter, KeyRecord, KeyStatus, StoreLifecycle,
    PUBLIC_KEY_HEX_LEN,
};
