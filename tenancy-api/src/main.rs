use anyhow::{Context, Result};
use std::sync::Arc;
use tenancy_api::telemetry::{init_tracing, LogSettings};
use tenancy_api::{create_app, start_janitor_task, AppState, Config, StateOptions};
use tenancy_orchestrator::db::{backup_database, create_pool, run_migrations};
use tenancy_orchestrator::providers::{ClerkIdentityProvider, StripeBillingProvider};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Held for the lifetime of the process so buffered file logs get flushed
    let _log_guard = init_tracing(&LogSettings::from_env())?;

    info!("Starting tenancy-api service...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    let db_path = &config.db_path;

    // Backup before migrations
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let billing = StripeBillingProvider::new(config.stripe()?)
        .context("Failed to build billing provider")?;
    let identity = ClerkIdentityProvider::new(config.clerk()?)
        .context("Failed to build identity provider")?;

    let plans = config.load_plans()?;
    info!("Loaded {} plans", plans.plans().len());

    let state = AppState::new(
        pool.clone(),
        Arc::new(identity),
        Arc::new(billing),
        StateOptions::from_config(&config, plans),
    );

    tokio::spawn(start_janitor_task(
        pool,
        config.janitor_interval_secs,
        config.intent_ttl(),
        config.stale_run_after(),
    ));
    info!(
        "Janitor task started (interval: {}s)",
        config.janitor_interval_secs
    );

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
