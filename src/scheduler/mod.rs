//! Scheduler: per-user trigger evaluation and the job worker loop.
//!
//! Triggers are evaluated every tick in each user's own timezone — there
//! is no global midnight. Due work becomes a row in the jobs table plus
//! a pgmq message; the loop blends LISTEN/NOTIFY wake-ups with a poll
//! fallback and runs each job under a wall-clock budget with bounded,
//! backed-off retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Datelike, Timelike, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::adapters::Notifier;
use crate::aggregate::AggregationEngine;
use crate::config::SchedulerConfig;
use crate::db::Db;
use crate::db::jobs::{EnqueueResult, JOB_QUEUE};
use crate::error::{Error, Result};
use crate::memory::repair::RepairSweeper;
use crate::model::JobId;
use crate::model::artifact::{ArtifactKind, PeriodKey};
use crate::model::job::{Job, JobKind, NewJob};
use crate::model::user::UserProfile;
use crate::nudge::{self, NudgeContext};
use crate::retry::backoff_delay;
use crate::telemetry::jobs::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

const JOB_RETRY_BASE_SECS: u64 = 30;
const JOB_RETRY_MAX_SECS: u64 = 3600;

#[derive(Clone)]
pub struct Scheduler {
    db: Arc<Db>,
    aggregator: Arc<AggregationEngine>,
    sweeper: Arc<RepairSweeper>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
    active_jobs: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(
        db: Arc<Db>,
        aggregator: Arc<AggregationEngine>,
        sweeper: Arc<RepairSweeper>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            aggregator,
            sweeper,
            notifier,
            config,
            shutdown: Arc::new(Notify::new()),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal the scheduler to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.db.create_queue(JOB_QUEUE).await?;

        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen("jobs_ready").await?;

        info!("scheduler started, evaluating triggers per user timezone");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("scheduler shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => info!(kind = n.payload(), "notified of new job"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.poll_interval_secs)) => {}
            }

            if let Err(e) = self.tick().await {
                error!("trigger evaluation error: {e}");
            }
            if let Err(e) = self.drain_queue().await {
                error!("job processing error: {e}");
            }
        }
    }

    /// One pass: enqueue newly-due work for every user, then run the
    /// repair sweep.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let users = self.db.list_users().await?;

        for profile in &users {
            if let Err(e) = self.evaluate_user_triggers(profile, now).await {
                error!(user_id = profile.user_id, "trigger evaluation failed: {e}");
            }
        }

        if let Err(e) = self.sweeper.run_due(50).await {
            error!("repair sweep error: {e}");
        }
        Ok(())
    }

    async fn evaluate_user_triggers(
        &self,
        profile: &UserProfile,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let local = now.with_timezone(&profile.timezone);
        let today = local.date_naive();
        let hour = local.hour();

        // Daily reflection: after the configured local hour, for users
        // who actually logged today. Dedup makes repeats no-ops.
        if hour >= profile.reflection_hour
            && self
                .db
                .has_entries_in_window(profile.user_id, today, today)
                .await?
        {
            let key = PeriodKey::containing(today, ArtifactKind::Daily);
            self.enqueue(profile.user_id, key.to_string(), JobKind::DailyReflection)
                .await?;
        }

        // Weekly report: configured local weekday + hour.
        if local.weekday() == profile.report_day && hour >= profile.report_hour {
            let key = PeriodKey::containing(today, ArtifactKind::Weekly);
            let (start, end) = key.window(profile.week_start);
            if self
                .db
                .has_entries_in_window(profile.user_id, start, end)
                .await?
            {
                self.enqueue(profile.user_id, key.to_string(), JobKind::WeeklyReport)
                    .await?;
            }
        }

        // Nudge evaluation: morning hour, evening hour, and the periodic
        // inactivity cadence. The hour-scoped period key gives one job
        // per user-hour at most.
        let nudge_hour = hour == profile.morning_hour
            || hour == profile.evening_hour
            || hour % self.config.inactivity_check_hours.max(1) == 0;
        if profile.nudges_enabled && nudge_hour {
            let key = format!("{today}T{hour:02}");
            self.enqueue(profile.user_id, key, JobKind::Nudge).await?;
        }

        Ok(())
    }

    async fn enqueue(&self, user_id: i64, period_key: String, kind: JobKind) -> Result<()> {
        let result = self
            .db
            .enqueue_job(NewJob {
                user_id,
                period_key,
                kind,
                run_at: Utc::now(),
                max_attempts: self.config.job_max_attempts,
            })
            .await?;
        if let EnqueueResult::Scheduled(job) = result {
            info!(job_id = %job.id, user_id, kind = %kind, period = %job.period_key, "job scheduled");
        }
        Ok(())
    }

    /// Claim and run queued jobs until the queue is empty or capacity is
    /// reached. Each job runs as its own task.
    async fn drain_queue(&self) -> Result<()> {
        loop {
            if self.active_jobs.load(Ordering::Relaxed) >= self.config.max_concurrent_jobs {
                return Ok(());
            }

            let msg = self
                .db
                .read_from_queue(JOB_QUEUE, self.config.job_budget_secs as i32)
                .await?;
            let msg = match msg {
                Some(m) => m,
                None => return Ok(()),
            };

            let job_id = msg
                .message
                .get("job_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(JobId)
                .ok_or_else(|| Error::Other("bad pgmq payload: missing job_id".to_string()))?;

            // Stale or duplicate delivery (already claimed, already
            // finished, or not yet due after a backoff re-send).
            let job = match self.db.claim_job(job_id).await? {
                Some(job) => job,
                None => {
                    let job = self.db.get_job(job_id).await;
                    match job {
                        Ok(j) if j.state.is_terminal() || j.state == crate::model::job::JobState::Running => {
                            self.db.archive_message(JOB_QUEUE, msg.msg_id).await?;
                        }
                        // Not due yet — leave it to the visibility timeout.
                        _ => {}
                    }
                    continue;
                }
            };

            self.active_jobs.fetch_add(1, Ordering::Relaxed);
            let scheduler = self.clone();
            let msg_id = msg.msg_id;
            tokio::spawn(async move {
                scheduler.run_job(job, msg_id).await;
                scheduler.active_jobs.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    async fn run_job(&self, job: Job, msg_id: i64) {
        let span = start_job_span(&job.kind.to_string(), &job.id.0);
        record_state_transition(&span, "scheduled", "running");

        let budget = std::time::Duration::from_secs(self.config.job_budget_secs);
        let started = std::time::Instant::now();

        let outcome: Result<()> = async {
            match tokio::time::timeout(budget, self.execute(&job)).await {
                Ok(result) => result,
                Err(_) => Err(Error::JobTimeout(job.id.to_string())),
            }
        }
        .instrument(span.clone())
        .await;

        let duration_ms = started.elapsed().as_millis() as f64;
        metrics::operation_duration_ms().record(
            duration_ms,
            &[KeyValue::new("operation", format!("job.{}", job.kind))],
        );

        match outcome {
            Ok(()) => {
                record_state_transition(&span, "running", "succeeded");
                info!(job_id = %job.id, kind = %job.kind, "job succeeded");
                if let Err(e) = self.db.complete_job(job.id).await {
                    error!(job_id = %job.id, "complete transition failed: {e}");
                }
                if let Err(e) = self.db.archive_message(JOB_QUEUE, msg_id).await {
                    error!(job_id = %job.id, "archive failed: {e}");
                }
            }
            Err(e) => {
                record_state_transition(&span, "running", "failed");
                warn!(job_id = %job.id, kind = %job.kind, error = %e, "job failed");
                if let Err(e) = self.retire_failed(&job, &e, msg_id).await {
                    error!(job_id = %job.id, "failure retirement error: {e}");
                }
            }
        }
    }

    /// Failed jobs retry with backoff until attempts run out, then go
    /// terminal with the error kept for reporting.
    async fn retire_failed(&self, job: &Job, cause: &Error, msg_id: i64) -> Result<()> {
        let failed = self.db.fail_job(job.id, &cause.to_string()).await?;

        if failed.attempts < failed.max_attempts {
            let delay = backoff_delay(failed.attempts, JOB_RETRY_BASE_SECS, JOB_RETRY_MAX_SECS);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
            self.db.reschedule_job(job.id, run_at).await?;
            self.db
                .redeliver_job(job.id, delay.as_secs() as i32)
                .await?;
            info!(job_id = %job.id, attempts = failed.attempts, "job rescheduled with backoff");
        } else {
            self.db.bury_job(job.id).await?;
            error!(
                job_id = %job.id,
                kind = %job.kind,
                error = %cause,
                "job terminal after exhausting retries"
            );
        }

        self.db.archive_message(JOB_QUEUE, msg_id).await?;
        Ok(())
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        match job.kind {
            JobKind::DailyReflection | JobKind::WeeklyReport => {
                let key: PeriodKey = job.period_key.parse()?;
                match self.aggregator.generate(job.user_id, key, false).await {
                    Ok(artifact) => {
                        let heading = match artifact.kind {
                            ArtifactKind::Daily => "Daily reflection",
                            ArtifactKind::Weekly => "Weekly report",
                        };
                        let message = format!(
                            "{heading} {} ({} entries, score {:.1}/10):\n\n{}",
                            artifact.period_key,
                            artifact.entry_count,
                            artifact.productivity_score,
                            artifact.content
                        );
                        self.notifier.deliver(job.user_id, &message).await?;
                        Ok(())
                    }
                    // Entries vanished between enqueue and run; nothing
                    // to aggregate is not a failure.
                    Err(Error::EmptyPeriod { .. }) => {
                        info!(job_id = %job.id, "period empty, nothing to aggregate");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            JobKind::Nudge => self.run_nudge(job).await,
        }
    }

    async fn run_nudge(&self, job: &Job) -> Result<()> {
        let profile = self.db.get_user(job.user_id).await?;
        let streak = self.db.get_streak(job.user_id).await?;
        let last_entry_at = self.db.last_entry_at(job.user_id).await?;
        let last_nudge_at = self.db.last_nudge_at(job.user_id, None).await?;

        let now = Utc::now();
        let local = now.with_timezone(&profile.timezone);

        let ctx = NudgeContext {
            user_id: profile.user_id,
            display_name: profile.display_name.clone(),
            nudges_enabled: profile.nudges_enabled,
            morning_hour: profile.morning_hour,
            evening_hour: profile.evening_hour,
            local_hour: local.hour(),
            has_entry_today: streak.last_entry_date == Some(local.date_naive()),
            current_streak: streak.current_streak,
            hours_since_last_entry: last_entry_at.map(|t| (now - t).num_hours()),
            hours_since_last_nudge: last_nudge_at.map(|t| (now - t).num_hours()),
            reminder_threshold_hours: self.config.nudge_threshold_hours,
        };

        if let Some(nudge) = nudge::decide(&ctx) {
            self.notifier.deliver_nudge(&nudge).await?;
            self.db
                .log_nudge(job.user_id, &nudge.kind.to_string())
                .await?;
            metrics::nudges_emitted().add(1, &[KeyValue::new("kind", nudge.kind.to_string())]);
            info!(user_id = job.user_id, kind = %nudge.kind, "nudge emitted");
        }
        Ok(())
    }
}
