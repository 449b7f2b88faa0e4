//! Command handlers, one module per command group.

pub mod cleanup;
pub mod deposits;
pub mod pool;
pub mod workflow;
