//! Lexflow background worker
//!
//! Runs the periodic billing sweeps on a cron schedule.

mod sweeps;

use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lexflow_billing::{
    AsaasClient, AsaasConfig, PaymentLedger, ReconciliationEngine, SubscriptionStore,
};
use lexflow_shared::db::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url)
        .await
        .context("failed to connect to database")?;

    let store = SubscriptionStore::new(pool.clone());
    let ledger = PaymentLedger::new(pool.clone());
    let gateway = AsaasClient::new(AsaasConfig::from_env().context("gateway not configured")?);
    let engine = ReconciliationEngine::new(gateway, store.clone(), ledger);

    let scheduler = JobScheduler::new()
        .await
        .context("failed to create scheduler")?;

    // Lapsed paid periods: every 15 minutes
    {
        let store = store.clone();
        scheduler
            .add(Job::new_async("0 */15 * * * *", move |_id, _lock| {
                let store = store.clone();
                Box::pin(async move {
                    sweeps::sweep_lapsed_subscriptions(&store).await;
                })
            })?)
            .await
            .context("failed to schedule lapsed sweep")?;
    }

    // Stuck pending checkouts: every hour, offset from the lapsed sweep
    {
        let engine = engine.clone();
        let store = store.clone();
        scheduler
            .add(Job::new_async("0 7 * * * *", move |_id, _lock| {
                let engine = engine.clone();
                let store = store.clone();
                Box::pin(async move {
                    sweeps::sweep_pending_checkouts(&engine, &store).await;
                })
            })?)
            .await
            .context("failed to schedule pending-checkout sweep")?;
    }

    scheduler.start().await.context("failed to start scheduler")?;
    tracing::info!("Lexflow worker started");

    // Scheduler runs on background tasks; keep the process alive
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
