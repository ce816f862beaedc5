//! Batch scheduler daemon.
//!
//! Runs a [`Scheduler`] against the stub provider and logs lifecycle
//! events until interrupted. The real application embeds the scheduler
//! directly; this binary exists for local smoke-testing and as the
//! wiring reference.

use std::sync::Arc;

use fabula_provider::StubProvider;
use fabula_scheduler::{Scheduler, SchedulerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fabula_batchd=debug,fabula_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SchedulerConfig::from_env();
    tracing::info!(
        global_limit = config.global_limit,
        task_timeout_secs = config.task_timeout.as_secs(),
        "Starting batch scheduler daemon",
    );

    let scheduler = Scheduler::start(config, Arc::new(StubProvider::default()));

    // Mirror the event stream into the log until shutdown.
    let mut events = scheduler.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(?event, "Scheduler event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received; shutting down");

    scheduler.shutdown().await;
    event_log.abort();

    Ok(())
}
