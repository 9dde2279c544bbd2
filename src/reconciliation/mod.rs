//! Reconciliation module
//!
//! Turns asynchronous gateway outcomes into terminal transaction states and
//! balance mutations.

mod engine;
mod error;

pub use engine::{plan_settlement, ReconcileOutcome, ReconciliationEngine, RetryPolicy};
pub use error::ReconcileError;
