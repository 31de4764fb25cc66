use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_SEND_EMAIL: &str = "send-email";

/// Attempts after which a transiently failing job is given up on.
pub const MAX_ATTEMPTS: i32 = 5;

const RETRY_STEP_SECONDS: u64 = 30;

/// How long a reserved job may stay `processing` before another worker may
/// claim it again. A worker that dies mid-job leaves its row behind; the
/// lease hands it to the next poll.
pub const PROCESSING_LEASE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Inserts a queued job. Call it inside the transaction that makes the job
/// necessary so the job exists exactly when the change does.
pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    diesel::insert_into(jobs::table)
        .values(&new_job)
        .execute(conn)?;

    let job = jobs::table.find(new_job.id).first(conn)?;
    Ok(job)
}

fn lease_cutoff(now: NaiveDateTime) -> NaiveDateTime {
    now - ChronoDuration::from_std(PROCESSING_LEASE).unwrap_or_else(|_| ChronoDuration::minutes(5))
}

/// Claims the oldest runnable job of one of `job_types`, skipping rows other
/// workers hold locked. Jobs stuck in `processing` past their lease count as
/// runnable until they have used up their attempts.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();
    let stalled_before = lease_cutoff(now);

    conn.transaction(|conn| {
        let job_opt = jobs::table
            .filter(
                jobs::status
                    .eq(STATUS_QUEUED)
                    .and(jobs::run_after.le(now))
                    .or(jobs::status
                        .eq(STATUS_PROCESSING)
                        .and(jobs::updated_at.lt(stalled_before))
                        .and(jobs::attempts.lt(MAX_ATTEMPTS))),
            )
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        if let Some(job) = job_opt {
            diesel::update(jobs::table.find(job.id))
                .set((
                    jobs::status.eq(STATUS_PROCESSING),
                    jobs::attempts.eq(job.attempts + 1),
                    jobs::updated_at.eq(now),
                ))
                .execute(conn)?;

            let refreshed = jobs::table.find(job.id).first(conn)?;
            Ok::<Option<Job>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<Job>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run.naive_utc()),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Linear backoff: 30 s after the first failed attempt, 60 s after the
/// second, and so on.
pub fn retry_delay(attempts: i32) -> Duration {
    let attempts = attempts.max(1) as u64;
    Duration::from_secs(RETRY_STEP_SECONDS * attempts)
}

/// Puts failed jobs of `job_type`, and jobs stalled in `processing` past
/// their lease, back in the queue with a fresh attempt budget. Returns how
/// many rows were requeued.
pub fn requeue_failed(conn: &mut PgConnection, job_type: &str) -> JobQueueResult<usize> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        jobs::table
            .filter(
                jobs::status.eq(STATUS_FAILED).or(jobs::status
                    .eq(STATUS_PROCESSING)
                    .and(jobs::updated_at.lt(lease_cutoff(now)))),
            )
            .filter(jobs::job_type.eq(job_type)),
    )
    .set((
        jobs::status.eq(STATUS_QUEUED),
        jobs::attempts.eq(0),
        jobs::run_after.eq(now),
        jobs::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(updated)
}
