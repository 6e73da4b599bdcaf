use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    db_types::JobPayload,
    engine_api::{
        errors::JobQueueError,
        job_queue::{EnqueueResult, JobSink},
    },
};

/// A job sink that refuses every job, as a queue that is down would.
#[derive(Debug, Default)]
pub struct UnavailableQueue {
    attempts: AtomicUsize,
}

impl UnavailableQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl JobSink for UnavailableQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueResult, JobQueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(JobQueueError::Unavailable(format!("cannot queue {}", payload.idempotency_key())))
    }
}
