//! Deposit batch generation for activated keys.
//!
//! Turns a set of `active` key records into signed deposit records and the
//! on-disk artifacts the submission pipeline consumes. Generation is
//! idempotent per (key set, network params): the manifest written next to
//! the deposit file records exactly what produced it, and a re-run with
//! the same inputs leaves the file untouched.

pub mod generator;
pub mod manifest;

pub use generator::{DepositGenerator, GenerateOutcome};
pub use manifest::{deposit_file_name, manifest_file_name, DepositManifest, STABLE_DEPOSIT_FILE};
