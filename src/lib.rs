//! SafePull ledger library
//!
//! Re-exports modules for the server binary and integration testing.

pub mod api;
pub mod callbacks;
pub mod config;
pub mod db;
pub mod domain;
pub mod gateway;
pub mod handlers;
pub mod inbox;
pub mod jobs;
pub mod reconciliation;
pub mod store;

mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError};
pub use error::{AppError, AppResult, ErrorResponse};
