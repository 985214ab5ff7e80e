//! Inlet webhook reliability service.
//!
//! Main entry point: loads configuration, connects PostgreSQL, bootstraps
//! the schema, spawns the stale-claim reaper, and serves HTTP until a
//! shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use inlet_api::{start_server, AppState, Config};
use inlet_core::{ledger::Ledger, PgLedger, SystemClock, TracingSink};
use inlet_engine::{AckHandler, HandlerRegistry, Processor};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("Starting Inlet webhook reliability service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        max_delivery_attempts = config.max_delivery_attempts,
        "Configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&pool).await?;
    info!("Database schema ready");

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool.clone()));
    let clock = Arc::new(SystemClock::new());

    let mut registry = HandlerRegistry::new();
    for event_type in &config.accepted_event_types {
        registry.register(event_type.clone(), Arc::new(AckHandler::new()));
    }
    if registry.is_empty() {
        warn!("no event types configured; every delivery will be dead-lettered as unknown");
    } else {
        info!(event_types = ?registry.registered_types(), "acknowledging handlers registered");
    }

    let processor = Arc::new(Processor::new(
        ledger.clone(),
        Arc::new(registry),
        Arc::new(TracingSink::new()),
        config.to_retry_policy(),
        clock.clone(),
    ));

    let reaper = tokio::spawn(run_reaper(
        ledger.clone(),
        config.stale_claim_threshold(),
        Duration::from_secs(config.reaper_interval_secs),
    ));

    let state = AppState::new(
        ledger,
        processor,
        clock,
        config.signing_secret.clone(),
        config.signature_tolerance(),
    );
    let addr = config.parse_server_addr()?;

    info!(addr = %addr, "Inlet is ready to receive deliveries");
    start_server(state, addr).await.context("HTTP server failed")?;

    reaper.abort();
    pool.close().await;
    info!("Database connections closed, shutdown complete");

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with startup retry.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
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

/// Ensures the deliveries table and its indexes exist.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries (
            delivery_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload BYTEA NOT NULL,
            content_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create deliveries table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_deliveries_status
        ON deliveries(status, updated_at)
        WHERE status IN ('pending', 'processing', 'dead_lettered')
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create deliveries status index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_deliveries_dlq_event_type
        ON deliveries(event_type, created_at)
        WHERE status = 'dead_lettered'
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create dead-letter index")?;

    Ok(())
}

/// Periodically reverts abandoned `processing` claims back to `pending`.
///
/// A worker that dies between claim and commit leaves its record stuck in
/// `processing`, and every redelivery short-circuits against it. The reaper
/// is the operational backstop that returns such records to the retry path.
async fn run_reaper(ledger: Arc<dyn Ledger>, staleness: chrono::Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let threshold = chrono::Utc::now() - staleness;
        match ledger.recover_stale(threshold).await {
            Ok(0) => {},
            Ok(recovered) => {
                warn!(recovered, "recovered stale processing claims");
            },
            Err(e) => {
                warn!(error = %e, "stale-claim recovery failed");
            },
        }
    }
}
