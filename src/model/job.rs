//! Job types: the persisted scheduler state machine.
//!
//! A job is one scheduled unit of aggregation or nudge work, identified
//! by (user_id, period_key, kind). State lives in the jobs table so
//! idempotency checks are queryable; pgmq only carries delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DailyReflection,
    WeeklyReport,
    Nudge,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::DailyReflection => "daily_reflection",
            JobKind::WeeklyReport => "weekly_report",
            JobKind::Nudge => "nudge",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily_reflection" => Ok(JobKind::DailyReflection),
            "weekly_report" => Ok(JobKind::WeeklyReport),
            "nudge" => Ok(JobKind::Nudge),
            other => Err(Error::Other(format!("unknown job kind: {other}"))),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its run time, or re-queued after a retryable failure.
    Scheduled,
    /// A worker is executing it under the wall-clock budget.
    Running,
    /// Done. Terminal; blocks re-enqueue of the same identity.
    Succeeded,
    /// Failed, retries remain. Transient: re-scheduled with backoff.
    Failed,
    /// Retries exhausted. Terminal; surfaced, never silently dropped.
    Terminal,
}

impl JobState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Scheduled, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Scheduled) // retry with backoff
                | (Failed, Terminal) // exhausted retries
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Terminal)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Terminal => "terminal",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(JobState::Scheduled),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "terminal" => Ok(JobState::Terminal),
            other => Err(Error::Other(format!("unknown job state: {other}"))),
        }
    }
}

/// A persisted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: i64,
    pub period_key: String,
    pub kind: JobKind,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for enqueueing a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: i64,
    pub period_key: String,
    pub kind: JobKind,
    pub run_at: DateTime<Utc>,
    pub max_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_documented_machine() {
        use JobState::*;
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Scheduled));
        assert!(Failed.can_transition_to(Terminal));

        assert!(!Scheduled.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Terminal.can_transition_to(Scheduled));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Terminal.is_terminal());
        assert!(!JobState::Failed.is_terminal());
    }
}
