//! Callbacks module
//!
//! Inbound gateway callbacks: wire payloads and the dispatcher that feeds
//! them to reconciliation.

mod dispatcher;
pub mod payload;

pub use dispatcher::{CallbackDispatcher, DispatchReport};
pub use payload::{CallbackEvent, CallbackKind, GatewayOutcome, PayloadError};
