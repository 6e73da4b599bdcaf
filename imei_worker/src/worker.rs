use std::sync::Arc;

use futures::future::join_all;
use imei_engine::{
    events::EventHandlers,
    gateway::Gateway,
    pricing::CachedPricing,
    throttle::ThrottleManager,
    JobQueue,
    OrderProcessor,
    SqliteDatabase,
};
use log::*;
use lookup_tools::LookupApi;
use tokio::sync::watch;

use crate::{config::WorkerConfig, errors::WorkerError, hooks::logging_hooks, sweeper::start_stale_job_sweeper};

const EVENT_BUFFER_SIZE: usize = 64;

/// Runs the verification workers until the process receives Ctrl-C. Jobs that are in progress are finished before
/// this function returns.
pub async fn run_worker(config: WorkerConfig) -> Result<(), WorkerError> {
    config.validate()?;
    let db = SqliteDatabase::new_with_url(&config.database_url, config.db_max_connections).await?;
    db.migrate().await?;

    let provider = LookupApi::new(config.lookup.clone())?;
    let gateway = Gateway::new(provider, ThrottleManager::new(config.throttle.clone()));
    let pricing = CachedPricing::new(db.clone(), config.price_cache_ttl);

    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers();

    let processor = OrderProcessor::new(db.clone(), gateway, pricing, producers)
        .with_risk_config(config.risk.clone())
        .with_guest_pricing(config.guest_pricing.clone());
    let queue = JobQueue::new(db.clone(), config.queue.clone());
    let recovered = queue.requeue_stale().await?;
    info!("🚀️ Job queue ready. {recovered} abandoned jobs recovered. {:?}", queue.stats().await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = queue.start_workers(Arc::new(processor), shutdown_rx.clone());
    tasks.push(start_stale_job_sweeper(queue.clone(), config.sweep_interval, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("🚀️ Shutdown requested. Waiting for running jobs to finish.");
    shutdown_tx.send(true).map_err(|e| WorkerError::InitializeError(e.to_string()))?;
    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!("🚀️ A worker task ended abnormally: {e}");
        }
    }
    db.close().await;
    Ok(())
}
