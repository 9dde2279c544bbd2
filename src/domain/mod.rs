//! Domain module
//!
//! Core domain types and business rules.

pub mod account;
pub mod amount;
pub mod error;
pub mod phone;
pub mod transaction;

pub use account::UserAccount;
pub use amount::{Amount, AmountError, Balance};
pub use error::DomainError;
pub use phone::normalize_phone;
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
