//! SafePull ledger server
//!
//! Initiates mobile-money deposits and withdrawals and reconciles their
//! asynchronous gateway callbacks against user balances.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safepull_ledger::api::{self, AppState};
use safepull_ledger::db;
use safepull_ledger::gateway::{MpesaClient, PaymentGateway};
use safepull_ledger::handlers::InitiationSettings;
use safepull_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use safepull_ledger::reconciliation::{ReconciliationEngine, RetryPolicy};
use safepull_ledger::store::{LedgerStore, PgLedgerStore};
use safepull_ledger::Config;

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "safepull_ledger=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting SafePull ledger");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Explicit wiring: one store handle shared by routes, engine and jobs
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let engine = ReconciliationEngine::with_retry_policy(
        store.clone(),
        RetryPolicy::new(config.reconcile_max_retries, Duration::from_millis(50)),
    );
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MpesaClient::new(
        config.mpesa.base_url.clone(),
        config.mpesa.consumer_key.clone(),
        config.mpesa.consumer_secret.clone(),
        config.mpesa.timeout,
    )?);
    tracing::debug!(mpesa = ?config.mpesa, "Gateway configured");

    let state = AppState::new(
        store.clone(),
        gateway,
        engine.clone(),
        InitiationSettings::from_config(&config.mpesa),
    );

    let scheduler = JobScheduler::new(
        store,
        state.dispatcher.clone(),
        engine,
        JobSchedulerConfig::from(&config.jobs),
    );
    let jobs = scheduler.start();

    let app = api::app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    jobs.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
