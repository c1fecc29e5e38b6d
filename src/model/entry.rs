//! Entry types: the logged voice note and its commit lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::EntryId;
use crate::error::{Error, Result};
use crate::model::user::StreakState;

/// Ingest lifecycle of an entry.
///
/// `Pending` exists only inside a commit; a persisted entry is either
/// `Committed` (all stores written) or `Degraded` (raw text landed, one
/// or more derived stores missing and queued for repair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Committed,
    Degraded,
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Committed => "committed",
            IngestStatus::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IngestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(IngestStatus::Pending),
            "committed" => Ok(IngestStatus::Committed),
            "degraded" => Ok(IngestStatus::Degraded),
            other => Err(Error::Other(format!("unknown ingest status: {other}"))),
        }
    }
}

/// A persisted entry from the raw store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: i64,
    pub idempotency_key: String,
    /// User-local calendar date the note is about.
    pub occurred_on: NaiveDate,
    /// Opaque handle into external audio storage.
    pub audio_ref: String,
    pub raw_text: String,
    pub ingest_status: IngestStatus,
    pub received_at: DateTime<Utc>,
}

/// Input to the memory coordinator: an entry that has a transcript but no
/// identity in any store yet.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub user_id: i64,
    pub idempotency_key: String,
    pub occurred_on: NaiveDate,
    pub audio_ref: String,
    pub raw_text: String,
}

/// Result of a coordinator commit.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub entry: Entry,
    /// True when an entry with the same idempotency key already existed
    /// and was returned unchanged (idempotent no-op, not an error).
    pub duplicate: bool,
    pub streak: StreakState,
}
