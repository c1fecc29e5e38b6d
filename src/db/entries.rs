//! Raw and relational entry stores, plus the dashboard read API.
//!
//! The raw store is the append-only audit log; rows only ever advance
//! their ingest_status. The relational journal_entries table is the
//! denormalized, canonical source for pagination and aggregation queries.
//!
//! Inner functions accept an executor so they run against either the
//! pool or an open transaction.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::EntryId;
use crate::model::entry::{Entry, IngestStatus};
use crate::model::fact::{Category, Sentiment, StructuredFact};

/// Filter for dashboard entry listings.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub category: Option<Category>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Case-insensitive substring match over summary and raw text.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

/// One row of a dashboard listing, from the relational store.
#[derive(Debug, Clone)]
pub struct EntryListItem {
    pub entry_id: EntryId,
    pub occurred_on: NaiveDate,
    pub category: Option<Category>,
    pub summary: Option<String>,
    pub sentiment: Option<Sentiment>,
    /// Committed but missing derived data; shown as "needs reprocessing".
    pub needs_repair: bool,
    pub received_at: DateTime<Utc>,
}

/// Relational row as consumed by the aggregation engine.
#[derive(Debug, Clone)]
pub struct JournalRow {
    pub entry_id: EntryId,
    pub occurred_on: NaiveDate,
    pub category: Option<Category>,
    pub summary: Option<String>,
    pub accomplishment_count: i32,
    pub blocker_count: i32,
    pub learning_count: i32,
    pub needs_repair: bool,
}

impl super::Db {
    /// Fetch an entry by id from the raw store.
    pub async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        let row: Option<RawEntryRow> = sqlx::query_as(
            "SELECT id, user_id, idempotency_key, occurred_on, audio_ref, raw_text, ingest_status, received_at
             FROM raw_entries WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("entry {id}")))?
            .try_into_entry()
    }

    /// Look up an entry by its idempotency key.
    pub async fn find_entry_by_key(
        &self,
        user_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Entry>> {
        let row: Option<RawEntryRow> = sqlx::query_as(
            "SELECT id, user_id, idempotency_key, occurred_on, audio_ref, raw_text, ingest_status, received_at
             FROM raw_entries WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await?;

        row.map(RawEntryRow::try_into_entry).transpose()
    }

    /// Dashboard listing over the relational store, newest first.
    pub async fn list_entries(
        &self,
        user_id: i64,
        filter: &EntryFilter,
        page: Page,
    ) -> Result<Vec<EntryListItem>> {
        let text_pattern = filter.text.as_ref().map(|t| format!("%{t}%"));
        let rows: Vec<JournalListRow> = sqlx::query_as(
            "SELECT j.entry_id, j.occurred_on, j.category, j.summary, j.sentiment, j.needs_repair, j.received_at
             FROM journal_entries j
             JOIN raw_entries r ON r.id = j.entry_id
             WHERE j.user_id = $1
             AND ($2::text IS NULL OR j.category = $2)
             AND ($3::date IS NULL OR j.occurred_on >= $3)
             AND ($4::date IS NULL OR j.occurred_on <= $4)
             AND ($5::text IS NULL OR j.summary ILIKE $5 OR r.raw_text ILIKE $5)
             ORDER BY j.occurred_on DESC, j.received_at DESC
             LIMIT $6 OFFSET $7",
        )
        .bind(user_id)
        .bind(filter.category.map(|c| c.to_string()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(text_pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JournalListRow::try_into_item).collect()
    }

    /// Entries permanently flagged after exhausted repair, for the
    /// dashboard's needs-attention view.
    pub async fn list_unrepaired_entries(&self, user_id: i64, page: Page) -> Result<Vec<EntryListItem>> {
        let rows: Vec<JournalListRow> = sqlx::query_as(
            "SELECT j.entry_id, j.occurred_on, j.category, j.summary, j.sentiment, j.needs_repair, j.received_at
             FROM journal_entries j
             WHERE j.user_id = $1 AND j.needs_repair
             ORDER BY j.received_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JournalListRow::try_into_item).collect()
    }

    /// Relational rows in an inclusive date window, ordered by date.
    pub async fn entries_in_window(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<JournalRow>> {
        let rows: Vec<JournalWindowRow> = sqlx::query_as(
            "SELECT entry_id, occurred_on, category, summary,
                    accomplishment_count, blocker_count, learning_count, needs_repair
             FROM journal_entries
             WHERE user_id = $1 AND occurred_on BETWEEN $2 AND $3
             ORDER BY occurred_on ASC, received_at ASC",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JournalWindowRow::try_into_row).collect()
    }

    /// Whether the user has any entry in the window. Used by the trigger
    /// evaluator to skip empty aggregation jobs.
    pub async fn has_entries_in_window(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                 SELECT 1 FROM journal_entries
                 WHERE user_id = $1 AND occurred_on BETWEEN $2 AND $3
             )",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Wall-clock time of the user's most recent entry, for nudge gaps.
    pub async fn last_entry_at(&self, user_id: i64) -> Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT max(received_at) FROM raw_entries WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool())
                .await?;
        Ok(row.0)
    }

    /// User-initiated removal. The raw-store delete cascades through the
    /// structured, vector, and relational stores plus the repair queue.
    /// Returns false when the entry does not exist or belongs to someone
    /// else.
    pub async fn delete_entry_row(&self, user_id: i64, id: EntryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM raw_entries WHERE id = $1 AND user_id = $2")
            .bind(id.0)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Executor-generic writes, shared between the coordinator's commit
// transaction and the repair sweep.
// ---------------------------------------------------------------------------

pub(crate) async fn insert_raw_entry_on<'e>(
    exec: impl PgExecutor<'e>,
    entry: &Entry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO raw_entries (id, user_id, idempotency_key, occurred_on, audio_ref, raw_text, ingest_status, received_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id.0)
    .bind(entry.user_id)
    .bind(&entry.idempotency_key)
    .bind(entry.occurred_on)
    .bind(&entry.audio_ref)
    .bind(&entry.raw_text)
    .bind(entry.ingest_status.to_string())
    .bind(entry.received_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub(crate) async fn update_ingest_status_on<'e>(
    exec: impl PgExecutor<'e>,
    id: EntryId,
    status: IngestStatus,
) -> Result<()> {
    sqlx::query("UPDATE raw_entries SET ingest_status = $1 WHERE id = $2")
        .bind(status.to_string())
        .bind(id.0)
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn insert_journal_row_on<'e>(
    exec: impl PgExecutor<'e>,
    entry: &Entry,
    fact: Option<&StructuredFact>,
    needs_repair: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO journal_entries (entry_id, user_id, occurred_on, category, summary, keywords, sentiment,
                                      accomplishment_count, blocker_count, learning_count, needs_repair, received_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(entry.id.0)
    .bind(entry.user_id)
    .bind(entry.occurred_on)
    .bind(fact.map(|f| f.category.to_string()))
    .bind(fact.map(|f| f.summary.clone()))
    .bind(fact.map(|f| serde_json::json!(f.keywords)))
    .bind(fact.map(|f| f.sentiment.to_string()))
    .bind(fact.map(|f| f.accomplishments.len() as i32).unwrap_or(0))
    .bind(fact.map(|f| f.blockers.len() as i32).unwrap_or(0))
    .bind(fact.map(|f| f.learnings.len() as i32).unwrap_or(0))
    .bind(needs_repair)
    .bind(entry.received_at)
    .execute(exec)
    .await?;
    Ok(())
}

/// Fill the structured columns after a successful facts repair.
pub(crate) async fn update_journal_fact_columns_on<'e>(
    exec: impl PgExecutor<'e>,
    id: EntryId,
    fact: &StructuredFact,
) -> Result<()> {
    sqlx::query(
        "UPDATE journal_entries
         SET category = $1, summary = $2, keywords = $3, sentiment = $4,
             accomplishment_count = $5, blocker_count = $6, learning_count = $7
         WHERE entry_id = $8",
    )
    .bind(fact.category.to_string())
    .bind(&fact.summary)
    .bind(serde_json::json!(fact.keywords))
    .bind(fact.sentiment.to_string())
    .bind(fact.accomplishments.len() as i32)
    .bind(fact.blockers.len() as i32)
    .bind(fact.learnings.len() as i32)
    .bind(id.0)
    .execute(exec)
    .await?;
    Ok(())
}

pub(crate) async fn set_journal_needs_repair_on<'e>(
    exec: impl PgExecutor<'e>,
    id: EntryId,
    needs_repair: bool,
) -> Result<()> {
    sqlx::query("UPDATE journal_entries SET needs_repair = $1 WHERE entry_id = $2")
        .bind(needs_repair)
        .bind(id.0)
        .execute(exec)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RawEntryRow {
    id: Uuid,
    user_id: i64,
    idempotency_key: String,
    occurred_on: NaiveDate,
    audio_ref: String,
    raw_text: String,
    ingest_status: String,
    received_at: DateTime<Utc>,
}

impl RawEntryRow {
    fn try_into_entry(self) -> Result<Entry> {
        Ok(Entry {
            id: EntryId(self.id),
            user_id: self.user_id,
            idempotency_key: self.idempotency_key,
            occurred_on: self.occurred_on,
            audio_ref: self.audio_ref,
            raw_text: self.raw_text,
            ingest_status: self.ingest_status.parse()?,
            received_at: self.received_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JournalListRow {
    entry_id: Uuid,
    occurred_on: NaiveDate,
    category: Option<String>,
    summary: Option<String>,
    sentiment: Option<String>,
    needs_repair: bool,
    received_at: DateTime<Utc>,
}

impl JournalListRow {
    fn try_into_item(self) -> Result<EntryListItem> {
        Ok(EntryListItem {
            entry_id: EntryId(self.entry_id),
            occurred_on: self.occurred_on,
            category: self.category.as_deref().map(str::parse).transpose()?,
            summary: self.summary,
            sentiment: self.sentiment.as_deref().map(str::parse).transpose()?,
            needs_repair: self.needs_repair,
            received_at: self.received_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JournalWindowRow {
    entry_id: Uuid,
    occurred_on: NaiveDate,
    category: Option<String>,
    summary: Option<String>,
    accomplishment_count: i32,
    blocker_count: i32,
    learning_count: i32,
    needs_repair: bool,
}

impl JournalWindowRow {
    fn try_into_row(self) -> Result<JournalRow> {
        Ok(JournalRow {
            entry_id: EntryId(self.entry_id),
            occurred_on: self.occurred_on,
            category: self.category.as_deref().map(str::parse).transpose()?,
            summary: self.summary,
            accomplishment_count: self.accomplishment_count,
            blocker_count: self.blocker_count,
            learning_count: self.learning_count,
            needs_repair: self.needs_repair,
        })
    }
}
