//! Key pool management: bulk generation, FIFO activation with signer
//! export, and pool accounting.
//!
//! The pool is the only writer of key records. All derivation happens
//! under one seed artifact, so a pool can be regenerated deterministically
//! and indexes never collide.

pub mod index;
pub mod manager;
pub mod seed;

pub use index::{IndexEntry, PoolIndex};
pub use manager::{ActivationOutcome, BatchStatus, InitPoolOutcome, KeyPoolManager, PoolStatus};
pub use seed::load_or_create_seed;
