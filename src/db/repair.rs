//! Repair queue: degraded derived stores awaiting background re-runs.
//!
//! Each row names one (entry, tier) pair. Attempts are capped; an
//! exhausted row marks the entry permanently degraded until a human (or
//! a forced re-ingest) intervenes.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::EntryId;

/// Which derived store needs the repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTier {
    Facts,
    Vector,
}

impl std::fmt::Display for RepairTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepairTier::Facts => "facts",
            RepairTier::Vector => "vector",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RepairTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "facts" => Ok(RepairTier::Facts),
            "vector" => Ok(RepairTier::Vector),
            other => Err(Error::Other(format!("unknown repair tier: {other}"))),
        }
    }
}

/// A due repair item.
#[derive(Debug, Clone)]
pub struct RepairItem {
    pub id: i64,
    pub entry_id: EntryId,
    pub tier: RepairTier,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl super::Db {
    /// Repairs whose next attempt is due, oldest first.
    pub async fn due_repairs(&self, limit: i64) -> Result<Vec<RepairItem>> {
        let rows: Vec<(i64, Uuid, String, i32, Option<String>)> = sqlx::query_as(
            "SELECT id, entry_id, tier, attempts, last_error
             FROM repair_queue
             WHERE NOT exhausted AND next_attempt_at <= now()
             ORDER BY next_attempt_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(id, entry_id, tier, attempts, last_error)| {
                Ok(RepairItem {
                    id,
                    entry_id: EntryId(entry_id),
                    tier: tier.parse()?,
                    attempts: attempts as u32,
                    last_error,
                })
            })
            .collect()
    }

    /// The repair succeeded: drop the row. Returns how many rows remain
    /// for the entry, so the caller can clear the degraded flag at zero.
    pub async fn resolve_repair(&self, item_id: i64, entry_id: EntryId) -> Result<i64> {
        sqlx::query("DELETE FROM repair_queue WHERE id = $1")
            .bind(item_id)
            .execute(self.pool())
            .await?;

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM repair_queue WHERE entry_id = $1")
                .bind(entry_id.0)
                .fetch_one(self.pool())
                .await?;
        Ok(remaining)
    }

    /// The repair failed: bump attempts and push out the next try, or
    /// mark the row exhausted once the cap is reached.
    pub async fn defer_repair(
        &self,
        item_id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool> {
        let (attempts,): (i32,) = sqlx::query_as(
            "UPDATE repair_queue
             SET attempts = attempts + 1, last_error = $1, next_attempt_at = $2
             WHERE id = $3
             RETURNING attempts",
        )
        .bind(error)
        .bind(next_attempt_at)
        .bind(item_id)
        .fetch_one(self.pool())
        .await?;

        let exhausted = attempts as u32 >= max_attempts;
        if exhausted {
            sqlx::query("UPDATE repair_queue SET exhausted = TRUE WHERE id = $1")
                .bind(item_id)
                .execute(self.pool())
                .await?;
        }
        Ok(exhausted)
    }
}

/// Queue a tier for repair. Idempotent per (entry, tier); a later retry
/// of the same failure just refreshes the error text.
pub(crate) async fn enqueue_repair_on<'e>(
    exec: impl PgExecutor<'e>,
    entry_id: EntryId,
    tier: RepairTier,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO repair_queue (entry_id, tier, last_error, next_attempt_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (entry_id, tier) DO UPDATE SET last_error = $3",
    )
    .bind(entry_id.0)
    .bind(tier.to_string())
    .bind(error)
    .bind(next_attempt_at)
    .execute(exec)
    .await?;
    Ok(())
}
