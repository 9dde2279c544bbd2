//! API module
//!
//! HTTP API endpoints and middleware.

pub mod callbacks;
pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::callbacks::CallbackDispatcher;
use crate::gateway::PaymentGateway;
use crate::handlers::InitiationSettings;
use crate::reconciliation::ReconciliationEngine;
use crate::store::LedgerStore;

pub use callbacks::create_callback_router;
pub use routes::create_router;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub engine: ReconciliationEngine,
    pub dispatcher: CallbackDispatcher,
    pub settings: Arc<InitiationSettings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        engine: ReconciliationEngine,
        settings: InitiationSettings,
    ) -> Self {
        let dispatcher = CallbackDispatcher::new(store.clone(), engine.clone());
        Self {
            store,
            gateway,
            engine,
            dispatcher,
            settings: Arc::new(settings),
        }
    }
}

/// Build the full application: client routes, gateway callbacks, and the
/// request-id / tracing layers
pub fn app(state: AppState) -> Router {
    // Axum layers run in reverse order (last added = first executed):
    // set request id -> propagate -> trace -> log -> handler
    Router::new()
        .merge(create_router())
        .merge(create_callback_router())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
