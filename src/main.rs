//! hookcast webhook dispatch bridge.
//!
//! Reads host events from stdin, one JSON object per line, and writes one
//! JSON reply per event to stdout. Logs go to stderr.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookcast::{bridge, Config};
use hookcast_core::{storage::Storage, MulticastOutcomeRecorder, TracingOutcomeRecorder};
use hookcast_delivery::Dispatcher;
use sqlx::postgres::PgPoolOptions;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(config));

    // A pending stdin read holds a blocking thread until the next line arrives.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(config: Config) -> Result<()> {
    info!(
        database_url = %config.database_url_masked(),
        app_base_url = %config.app_base_url,
        max_connections = config.database_max_connections,
        max_retry_attempts = config.max_retry_attempts,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let storage = Storage::new(db_pool.clone(), config.table_prefix.clone());
    storage.health_check().await.context("Database health check failed")?;

    let mut recorder = MulticastOutcomeRecorder::new();
    recorder.add_recorder(storage.outcomes.clone());
    recorder.add_recorder(Arc::new(TracingOutcomeRecorder));

    let dispatcher = Dispatcher::new(
        config.to_dispatch_config(),
        storage.subscribers.clone(),
        storage.records.clone(),
        Arc::new(recorder),
    )
    .context("Failed to create dispatcher")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    info!("hookcast is ready to receive events");

    let summary = bridge::run(
        &dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
        config.shutdown_grace(),
    )
    .await?;

    db_pool.close().await;
    info!("Database connections closed");

    info!(
        dispatched = summary.dispatched,
        invalid = summary.invalid,
        failed = summary.failed,
        abandoned = summary.abandoned,
        "hookcast shutdown complete"
    );
    Ok(())
}

/// Initializes tracing on stderr, keeping stdout for replies.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
