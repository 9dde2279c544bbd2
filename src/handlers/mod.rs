//! Command Handlers module
//!
//! Handlers that open pending transactions and hand them to the gateway.

mod commands;
mod deposit_handler;
mod initiation;
mod settings;
mod withdrawal_handler;


pub use commands::*;
pub use deposit_handler::DepositHandler;
pub use settings::InitiationSettings;
pub use withdrawal_handler::WithdrawalHandler;
