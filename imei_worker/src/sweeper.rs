use std::time::Duration;

use imei_engine::{JobQueue, JobStore};
use log::*;
use tokio::{sync::watch, task::JoinHandle};

/// Starts the stale job sweeper. Every `interval` it puts jobs that were claimed by a worker that has since died back
/// in the queue. The sweeper stops once `true` is sent on `shutdown`.
pub fn start_stale_job_sweeper<B>(
    queue: JobQueue<B>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    B: JobStore + Clone,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Stale job sweeper started");
        while !*shutdown.borrow() {
            tokio::select! {
                _ = timer.tick() => {},
                _ = shutdown.changed() => continue,
            }
            trace!("🕰️ Running stale job sweep");
            match queue.requeue_stale().await {
                Ok(0) => trace!("🕰️ No stale jobs found"),
                Ok(n) => info!("🕰️ {n} abandoned jobs were returned to the queue"),
                Err(e) => error!("🕰️ Error running the stale job sweep: {e}"),
            }
            match queue.stats().await {
                Ok(stats) => debug!("🕰️ Queue: {stats:?}"),
                Err(e) => warn!("🕰️ Could not fetch queue statistics: {e}"),
            }
        }
        info!("🕰️ Stale job sweeper stopped");
    })
}
