//! Workflow consistency coordination and store reconciliation.
//!
//! The coordinator sequences activation and deposit generation as one
//! logical operation, verifying before and after that the key set loaded
//! into the remote signer is exactly the key set deposits are produced
//! for. The reconciler repairs divergence between the store's physical
//! deletion state and the pool's application state; it never runs as part
//! of the coordinated workflow.

pub mod coordinator;
pub mod reconcile;

pub use coordinator::{
    SignerDivergence, WorkflowCoordinator, WorkflowReport, WorkflowStatusReport,
};
pub use reconcile::{CleanOutcome, CorruptedKey, DestroyOutcome, Reconciler};
