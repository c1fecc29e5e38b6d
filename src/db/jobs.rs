//! Job operations: enqueue with dedup, state tracking, retry scheduling.
//!
//! The jobs table is the scheduler's state machine of record, keyed by
//! (user_id, period_key, kind). Delivery goes through pgmq in the same
//! transaction so a committed job always has a message in flight.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::JobId;
use crate::model::job::{Job, JobKind, JobState, NewJob};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Queue name shared by all job messages.
pub const JOB_QUEUE: &str = "jobs";

/// Result of enqueueing a job.
#[derive(Debug)]
pub enum EnqueueResult {
    /// New job row created and a delivery message sent.
    Scheduled(Box<Job>),
    /// A live or succeeded job with the same identity already exists.
    Duplicate { existing: JobId },
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: JobState, to: JobState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl super::Db {
    /// Enqueue a job. The partial unique index over live+succeeded rows
    /// makes a duplicate identity a no-op, not an error.
    pub async fn enqueue_job(&self, new: NewJob) -> Result<EnqueueResult> {
        let mut tx = self.pool().begin().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let delay_seconds = (new.run_at - now).num_seconds().max(0) as i32;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO jobs (id, user_id, period_key, kind, state, max_attempts, run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'scheduled', $5, $6, $7, $7)
             ON CONFLICT (user_id, period_key, kind)
                 WHERE state IN ('scheduled', 'running', 'succeeded')
             DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(new.user_id)
        .bind(&new.period_key)
        .bind(new.kind.to_string())
        .bind(new.max_attempts as i32)
        .bind(new.run_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            let existing: (Uuid,) = sqlx::query_as(
                "SELECT id FROM jobs
                 WHERE user_id = $1 AND period_key = $2 AND kind = $3
                 AND state IN ('scheduled', 'running', 'succeeded')
                 LIMIT 1",
            )
            .bind(new.user_id)
            .bind(&new.period_key)
            .bind(new.kind.to_string())
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            metrics::jobs_enqueued().add(
                1,
                &[
                    KeyValue::new("kind", new.kind.to_string()),
                    KeyValue::new("result", "duplicate"),
                ],
            );
            return Ok(EnqueueResult::Duplicate {
                existing: JobId(existing.0),
            });
        }

        let payload = serde_json::json!({ "job_id": id });
        sqlx::query_as::<_, (i64,)>("SELECT pgmq.send($1, $2, $3)")
            .bind(JOB_QUEUE)
            .bind(&payload)
            .bind(delay_seconds)
            .fetch_one(&mut *tx)
            .await?;

        // NOTIFY is transactional — only fires on commit
        sqlx::query("SELECT pg_notify('jobs_ready', $1)")
            .bind(new.kind.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::jobs_enqueued().add(
            1,
            &[
                KeyValue::new("kind", new.kind.to_string()),
                KeyValue::new("result", "ok"),
            ],
        );

        let job = self.get_job(JobId(id)).await?;
        Ok(EnqueueResult::Scheduled(Box::new(job)))
    }

    /// Re-send a delivery message for a retrying job, delayed by the
    /// backoff interval.
    pub async fn redeliver_job(&self, id: JobId, delay_seconds: i32) -> Result<()> {
        let payload = serde_json::json!({ "job_id": id.0 });
        self.send_to_queue(JOB_QUEUE, &payload, delay_seconds).await?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, user_id, period_key, kind, state, attempts, max_attempts,
                    run_at, started_at, finished_at, last_error, created_at, updated_at
             FROM jobs WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
            .try_into_job()
    }

    /// List jobs, optionally filtered by state and user.
    pub async fn list_jobs(
        &self,
        state: Option<JobState>,
        user_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, user_id, period_key, kind, state, attempts, max_attempts,
                    run_at, started_at, finished_at, last_error, created_at, updated_at
             FROM jobs
             WHERE ($1::text IS NULL OR state = $1)
             AND ($2::bigint IS NULL OR user_id = $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(state.map(|s| s.to_string()))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Claim a job for execution: Scheduled → Running with optimistic
    /// concurrency. Returns None when someone else already claimed it or
    /// it is no longer runnable (stale pgmq redelivery).
    pub async fn claim_job(&self, id: JobId) -> Result<Option<Job>> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE jobs
             SET state = 'running', attempts = attempts + 1, started_at = $1, updated_at = $1
             WHERE id = $2 AND state = 'scheduled' AND run_at <= $1",
        )
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Ok(None);
        }

        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "scheduled"), KeyValue::new("to", "running")],
        );
        Ok(Some(self.get_job(id).await?))
    }

    /// Running → Succeeded.
    pub async fn complete_job(&self, id: JobId) -> Result<Job> {
        validate_transition(JobState::Running, JobState::Succeeded)?;

        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = 'succeeded', finished_at = $1, updated_at = $1
             WHERE id = $2 AND state = 'running'",
        )
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "running".to_string(),
                to: "succeeded".to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "running"), KeyValue::new("to", "succeeded")],
        );
        self.get_job(id).await
    }

    /// Running → Failed with the error recorded.
    pub async fn fail_job(&self, id: JobId, error: &str) -> Result<Job> {
        validate_transition(JobState::Running, JobState::Failed)?;

        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = 'failed', last_error = $1, updated_at = $2
             WHERE id = $3 AND state = 'running'",
        )
        .bind(error)
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "running".to_string(),
                to: "failed".to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "running"), KeyValue::new("to", "failed")],
        );
        self.get_job(id).await
    }

    /// Failed → Scheduled for a retry at `run_at`.
    pub async fn reschedule_job(&self, id: JobId, run_at: DateTime<Utc>) -> Result<Job> {
        validate_transition(JobState::Failed, JobState::Scheduled)?;

        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = 'scheduled', run_at = $1, updated_at = now()
             WHERE id = $2 AND state = 'failed'",
        )
        .bind(run_at)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "failed".to_string(),
                to: "scheduled".to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "failed"), KeyValue::new("to", "scheduled")],
        );
        self.get_job(id).await
    }

    /// Failed → Terminal after exhausting retries. The row stays for
    /// reporting; the identity becomes free for a fresh enqueue.
    pub async fn bury_job(&self, id: JobId) -> Result<Job> {
        validate_transition(JobState::Failed, JobState::Terminal)?;

        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = 'terminal', finished_at = $1, updated_at = $1
             WHERE id = $2 AND state = 'failed'",
        )
        .bind(now)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: "failed".to_string(),
                to: "terminal".to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[KeyValue::new("from", "failed"), KeyValue::new("to", "terminal")],
        );
        self.get_job(id).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    user_id: i64,
    period_key: String,
    kind: String,
    state: String,
    attempts: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            id: JobId(self.id),
            user_id: self.user_id,
            period_key: self.period_key,
            kind: self.kind.parse::<JobKind>()?,
            state: self.state.parse::<JobState>()?,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            run_at: self.run_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
