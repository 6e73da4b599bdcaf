use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db::{sqlite::SqliteDatabaseError, traits::InsertJobResult},
    db_types::{Job, JobPayload, JobStats, JobStatus},
};

/// Inserts a queued job unless one with the same idempotency key already exists.
pub async fn idempotent_insert(
    payload: &JobPayload,
    max_attempts: i64,
    run_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<InsertJobResult, SqliteDatabaseError> {
    let key = payload.idempotency_key();
    let now = Utc::now();
    let inserted: Option<Job> = sqlx::query_as(
        r#"
        INSERT INTO jobs (idempotency_key, order_ref, payload, status, attempts, max_attempts, run_at, created_at, updated_at)
        VALUES ($1, $2, $3, 'queued', 0, $4, $5, $6, $6)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING *;
        "#,
    )
    .bind(&key)
    .bind(payload.order_ref)
    .bind(Json(payload))
    .bind(max_attempts)
    .bind(run_at)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    match inserted {
        Some(job) => {
            debug!("🗃️ Job {key} stored with id {}", job.id);
            Ok(InsertJobResult::Inserted(job))
        },
        None => {
            let existing = fetch_by_key(&key, conn)
                .await?
                .ok_or_else(|| SqliteDatabaseError::QueryError(format!("Job {key} conflicts but cannot be found")))?;
            trace!("🗃️ Job {key} already exists with status {}", existing.status);
            Ok(InsertJobResult::AlreadyExists(existing))
        },
    }
}

/// Claims the oldest due job in a single statement, so two workers can never claim the same job.
pub async fn claim_next(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Option<Job>, SqliteDatabaseError> {
    let job = sqlx::query_as(
        r#"
        UPDATE jobs SET status = 'running', attempts = attempts + 1, locked_at = $1, updated_at = $1
        WHERE status = 'queued' AND id = (
            SELECT id FROM jobs WHERE status = 'queued' AND run_at <= $1 ORDER BY run_at, id LIMIT 1
        )
        RETURNING *;
        "#,
    )
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(job)
}

async fn set_status(
    id: i64,
    status: JobStatus,
    run_at: Option<DateTime<Utc>>,
    error: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            status = $1,
            run_at = COALESCE($2, run_at),
            last_error = COALESCE($3, last_error),
            locked_at = NULL,
            updated_at = $4
        WHERE id = $5;
        "#,
    )
    .bind(status)
    .bind(run_at)
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn complete(id: i64, conn: &mut SqliteConnection) -> Result<(), SqliteDatabaseError> {
    set_status(id, JobStatus::Completed, None, None, conn).await
}

pub async fn reschedule(
    id: i64,
    run_at: DateTime<Utc>,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    set_status(id, JobStatus::Queued, Some(run_at), Some(error), conn).await
}

pub async fn bury(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<(), SqliteDatabaseError> {
    set_status(id, JobStatus::Dead, None, Some(error), conn).await
}

pub async fn requeue_stale(
    locked_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, SqliteDatabaseError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'queued', locked_at = NULL, run_at = $1, updated_at = $1,
            last_error = 'Worker stopped before the job finished'
        WHERE status = 'running' AND locked_at < $2;
        "#,
    )
    .bind(now)
    .bind(locked_before)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_by_key(key: &str, conn: &mut SqliteConnection) -> Result<Option<Job>, SqliteDatabaseError> {
    let job = sqlx::query_as("SELECT * FROM jobs WHERE idempotency_key = $1").bind(key).fetch_optional(conn).await?;
    Ok(job)
}

pub async fn stats(conn: &mut SqliteConnection) -> Result<JobStats, SqliteDatabaseError> {
    let rows: Vec<(JobStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status").fetch_all(conn).await?;
    let stats = rows.into_iter().fold(JobStats::default(), |mut stats, (status, count)| {
        match status {
            JobStatus::Queued => stats.queued = count,
            JobStatus::Running => stats.running = count,
            JobStatus::Completed => stats.completed = count,
            JobStatus::Dead => stats.dead = count,
        }
        stats
    });
    Ok(stats)
}
