use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
    db_types::{Job, JobPayload, JobStats},
    traits::{InsertJobResult, VerificationDatabase},
};

/// Durable storage for the job queue.
pub trait JobStore: VerificationDatabase {
    /// Stores a new queued job keyed by the payload's idempotency key. If a job with that key exists, it is returned
    /// untouched.
    fn insert_job(
        &self,
        payload: &JobPayload,
        max_attempts: i64,
        run_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InsertJobResult, Self::Error>> + Send;

    /// Atomically takes the oldest queued job that is due at `now`, marks it running and counts the attempt. A job is
    /// never handed to two callers.
    fn claim_next_job(&self, now: DateTime<Utc>) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send;

    fn complete_job(&self, id: i64) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Puts a running job back in the queue, due at `run_at`.
    fn reschedule_job(
        &self,
        id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Marks a job as permanently failed
    fn bury_job(&self, id: i64, error: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns jobs that have been running since before `locked_before` to the queue. The attempt they used stays
    /// counted. Returns the number of jobs recovered.
    fn requeue_stale_jobs(
        &self,
        locked_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    fn fetch_job_by_key(&self, key: &str) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send;

    fn job_stats(&self) -> impl Future<Output = Result<JobStats, Self::Error>> + Send;
}
