//! # Durable job queue
//!
//! Verification work is handed from submission (and payment confirmation) to the order processor through a
//! persistent queue of [`Job`]s. The queue guarantees:
//! * Idempotent enqueue. A job is keyed by its order, so enqueuing the same order twice queues it once.
//! * At most one worker runs a job at a time. Claiming is a single conditional update in the store.
//! * Retries with exponential backoff. A failed attempt is rescheduled `initial_backoff * 2^(attempt - 1)` later,
//!   capped at `max_backoff`.
//! * Dead-lettering. When the last attempt fails, [`JobHandler::on_exhausted`] runs and the job is marked dead.
//! * Recovery. Jobs left `running` by a crashed worker are put back in the queue by [`JobQueue::requeue_stale`].
use std::{fmt::Debug, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use log::*;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    db_types::{Job, JobPayload, JobStats},
    engine_api::errors::JobQueueError,
    traits::{InsertJobResult, JobStore},
};

//--------------------------------------    BackoffPolicy      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_secs(2), max: Duration::from_secs(60), multiplier: 2 }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, multiplier: 2 }
    }

    /// The delay before the next attempt, after `attempt` attempts have failed.
    pub fn delay_for(&self, attempt: i64) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

//--------------------------------------    JobQueueConfig     ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_attempts: i64,
    pub backoff: BackoffPolicy,
    /// How long an idle worker waits before looking for due jobs again
    pub poll_interval: Duration,
    /// Number of concurrent workers started by [`JobQueue::start_workers`]
    pub pool_size: usize,
    /// A running job whose lock is older than this is assumed to belong to a dead worker
    pub stale_after: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_millis(500),
            pool_size: 4,
            stale_after: Duration::from_secs(600),
        }
    }
}

//--------------------------------------    Queue contracts    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueResult {
    Enqueued(Job),
    /// A job for the same order already exists. It is returned as is, whatever its status.
    AlreadyQueued(Job),
}

impl EnqueueResult {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueResult::Enqueued(job) | EnqueueResult::AlreadyQueued(job) => job,
        }
    }
}

/// Where submitted work goes. [`JobQueue`] is the production implementation.
pub trait JobSink: Send + Sync {
    fn enqueue(&self, payload: JobPayload) -> impl Future<Output = Result<EnqueueResult, JobQueueError>> + Send;
}

/// The work done for each job.
pub trait JobHandler: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs one attempt. An error schedules a retry, or ends the job if this was the last attempt.
    fn handle(&self, job: &Job) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Called once, after the last attempt failed and before the job is marked dead.
    fn on_exhausted(&self, job: &Job, error: &str) -> impl Future<Output = ()> + Send;
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { job_id: i64 },
    Retrying { job_id: i64, attempt: i64, run_at: DateTime<Utc> },
    Dead { job_id: i64, error: String },
}

//--------------------------------------       JobQueue        ---------------------------------------------------------
pub struct JobQueue<B> {
    db: B,
    config: JobQueueConfig,
}

impl<B: Clone> Clone for JobQueue<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), config: self.config.clone() }
    }
}

impl<B: Debug> Debug for JobQueue<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobQueue ({:?})", self.db)
    }
}

impl<B> JobQueue<B>
where B: JobStore
{
    pub fn new(db: B, config: JobQueueConfig) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Queues the payload to run immediately, unless a job for the same order already exists.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueResult, JobQueueError> {
        let key = payload.idempotency_key();
        let result = self.db.insert_job(&payload, self.config.max_attempts, Utc::now()).await.map_err(db_error)?;
        match result {
            InsertJobResult::Inserted(job) => {
                info!("📥️ Job {key} queued for order {}", payload.order_id);
                Ok(EnqueueResult::Enqueued(job))
            },
            InsertJobResult::AlreadyExists(job) => {
                debug!("📥️ Job {key} is already in the queue ({}). Not queuing it again.", job.status);
                Ok(EnqueueResult::AlreadyQueued(job))
            },
        }
    }

    /// The job that processes the given order, if one was ever queued.
    pub async fn job_for_order(&self, order_ref: i64) -> Result<Option<Job>, JobQueueError> {
        let key = JobPayload::idempotency_key_for(order_ref);
        self.db.fetch_job_by_key(&key).await.map_err(db_error)
    }

    pub async fn stats(&self) -> Result<JobStats, JobQueueError> {
        self.db.job_stats().await.map_err(db_error)
    }

    /// Puts jobs whose workers appear to have died back in the queue. Returns the number of jobs recovered.
    pub async fn requeue_stale(&self) -> Result<u64, JobQueueError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::zero());
        let count = self.db.requeue_stale_jobs(Utc::now() - stale_after).await.map_err(db_error)?;
        if count > 0 {
            warn!("📥️ {count} stale jobs were put back in the queue");
        }
        Ok(count)
    }

    /// Claims the next due job and runs one attempt of it. Returns `None` when no job is due.
    pub async fn run_next<H: JobHandler>(&self, handler: &H) -> Result<Option<JobOutcome>, JobQueueError> {
        let Some(job) = self.db.claim_next_job(Utc::now()).await.map_err(db_error)? else {
            return Ok(None);
        };
        debug!(
            "📥️ Job {} claimed (attempt {}/{}) for order {}",
            job.idempotency_key, job.attempts, job.max_attempts, job.payload.order_id
        );
        let result = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;
        let error = match result {
            Ok(Ok(())) => {
                self.db.complete_job(job.id).await.map_err(db_error)?;
                debug!("📥️ Job {} completed", job.idempotency_key);
                return Ok(Some(JobOutcome::Completed { job_id: job.id }));
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => "the job handler panicked".to_string(),
        };
        if job.is_last_attempt() {
            error!("📥️ Job {} failed on its last attempt ({}). Giving up.", job.idempotency_key, error);
            handler.on_exhausted(&job, &error).await;
            self.db.bury_job(job.id, &error).await.map_err(db_error)?;
            Ok(Some(JobOutcome::Dead { job_id: job.id, error }))
        } else {
            let delay = self.config.backoff.delay_for(job.attempts);
            let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            warn!(
                "📥️ Job {} failed on attempt {}/{}: {error}. Retrying in {}ms",
                job.idempotency_key,
                job.attempts,
                job.max_attempts,
                delay.as_millis()
            );
            self.db.reschedule_job(job.id, run_at, &error).await.map_err(db_error)?;
            Ok(Some(JobOutcome::Retrying { job_id: job.id, attempt: job.attempts, run_at }))
        }
    }

    /// Runs jobs until none is due. Used by one-shot runs and tests.
    pub async fn drain<H: JobHandler>(&self, handler: &H) -> Result<Vec<JobOutcome>, JobQueueError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next(handler).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

impl<B> JobQueue<B>
where B: JobStore + Clone
{
    /// Starts `pool_size` workers. Each worker takes one job at a time and waits `poll_interval` when the queue is
    /// empty. Workers finish the job in hand and stop once `true` is sent on `shutdown`.
    pub fn start_workers<H: JobHandler>(&self, handler: Arc<H>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.pool_size.max(1))
            .map(|worker| {
                let queue = self.clone();
                let handler = Arc::clone(&handler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { queue.worker_loop(worker, handler, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop<H: JobHandler>(self, worker: usize, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) {
        info!("📥️ Worker {worker} started");
        while !*shutdown.borrow() {
            let idle = match self.run_next(handler.as_ref()).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!("📥️ Worker {worker} could not run a job: {e}");
                    true
                },
            };
            if idle {
                tokio::select! {
                    _ = shutdown.changed() => {},
                    _ = tokio::time::sleep(self.config.poll_interval) => {},
                }
            }
        }
        info!("📥️ Worker {worker} stopped");
    }
}

impl<B> JobSink for JobQueue<B>
where B: JobStore
{
    async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueResult, JobQueueError> {
        JobQueue::enqueue(self, payload).await
    }
}

fn db_error<E: std::error::Error>(e: E) -> JobQueueError {
    JobQueueError::DatabaseError(e.to_string())
}
