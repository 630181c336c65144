//! Lexflow API server entry point

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lexflow_api::{config::Config, routes::create_router, state::AppState};
use lexflow_shared::db::{create_migration_pool, create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    // Migrations run on a dedicated pool so PgBouncer pooling does not
    // interfere with the advisory lock sqlx::migrate takes.
    let migration_pool = create_migration_pool(&config.database_url)
        .await
        .context("failed to connect for migrations")?;
    run_migrations(&migration_pool)
        .await
        .context("failed to run migrations")?;
    migration_pool.close().await;

    let pool = create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let state = AppState::new(pool, config.clone());
    if state.billing.is_none() {
        tracing::warn!("billing is disabled; billing routes will answer with errors");
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Lexflow API listening");

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;

    Ok(())
}
