//! Memory coordinator: the one writer across all four entry stores.
//!
//! A commit lands the raw audit row, the relational row, and the streak
//! update in a single transaction; the structured and vector stores are
//! written afterwards and any failure there degrades the entry and queues
//! a background repair instead of losing the commit. Streak credit
//! depends only on the raw write: losing derived data never erases
//! credit for having logged.

pub mod repair;
pub mod streak;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Duration, Utc};
use opentelemetry::KeyValue;
use tracing::warn;

use crate::config::RetryConfig;
use crate::db::repair::{RepairTier, enqueue_repair_on};
use crate::db::{Db, entries, facts, streaks};
use crate::error::Result;
use crate::model::EntryId;
use crate::model::entry::{CommitResult, Entry, EntryDraft, IngestStatus};
use crate::model::fact::StructuredFact;
use crate::model::user::StreakState;
use crate::telemetry::metrics;

/// An embedding ready for the vector store.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub vector: Vec<f32>,
    /// What was embedded: the fact summary when classification
    /// succeeded, the raw text otherwise.
    pub text_used: String,
}

/// Per-user async locks. All streak-bearing writes for one user are
/// serialized; cross-user traffic never contends.
#[derive(Default)]
struct UserLocks {
    inner: StdMutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    fn for_user(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(user_id).or_default())
    }
}

pub struct MemoryCoordinator {
    db: Arc<Db>,
    locks: UserLocks,
    retry: RetryConfig,
}

impl MemoryCoordinator {
    pub fn new(db: Arc<Db>, retry: RetryConfig) -> Self {
        Self {
            db,
            locks: UserLocks::default(),
            retry,
        }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// Commit one entry across the stores.
    ///
    /// Idempotent: if an entry with the draft's idempotency key already
    /// exists, the stored result is returned as a duplicate success —
    /// this is the exactly-once guarantee under at-least-once delivery
    /// from upstream.
    pub async fn commit(
        &self,
        draft: EntryDraft,
        fact: Option<StructuredFact>,
        embedding: Option<EmbeddingInput>,
    ) -> Result<CommitResult> {
        let lock = self.locks.for_user(draft.user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self
            .db
            .find_entry_by_key(draft.user_id, &draft.idempotency_key)
            .await?
        {
            let existing = self.heal_pending(existing).await?;
            metrics::entries_ingested().add(1, &[KeyValue::new("result", "duplicate")]);
            let streak = self.db.get_streak(draft.user_id).await?;
            return Ok(CommitResult {
                entry: existing,
                duplicate: true,
                streak,
            });
        }

        let mut entry = Entry {
            id: EntryId::new(),
            user_id: draft.user_id,
            idempotency_key: draft.idempotency_key,
            occurred_on: draft.occurred_on,
            audio_ref: draft.audio_ref,
            raw_text: draft.raw_text,
            ingest_status: IngestStatus::Pending,
            received_at: Utc::now(),
        };

        // Raw row, relational row, and streak move together or not at all.
        let streak = {
            let mut tx = self.db.pool().begin().await?;
            entries::insert_raw_entry_on(&mut *tx, &entry).await?;
            entries::insert_journal_row_on(&mut *tx, &entry, fact.as_ref(), fact.is_none())
                .await?;

            let prev = streaks::lock_streak_on(&mut tx, entry.user_id).await?;
            let next = match streak::advance(&prev, entry.occurred_on) {
                Some(next) => next,
                None => {
                    // Backfilled date: the simple increment would lie, so
                    // re-derive from the full history (which already
                    // includes this entry's row inside the transaction).
                    let dates = streaks::entry_dates_on(&mut *tx, entry.user_id).await?;
                    streak::derive(entry.user_id, &dates)
                }
            };
            streaks::write_streak_on(&mut *tx, &next).await?;
            tx.commit().await?;
            next
        };

        let status = self.write_derived_stores(&entry, fact.as_ref(), embedding).await?;
        entry.ingest_status = status;

        metrics::entries_ingested().add(
            1,
            &[KeyValue::new(
                "result",
                if status == IngestStatus::Committed {
                    "committed"
                } else {
                    "degraded"
                },
            )],
        );

        Ok(CommitResult {
            entry,
            duplicate: false,
            streak,
        })
    }

    /// Write the structured and vector stores, downgrading to `Degraded`
    /// and queueing repair on any miss. Returns the final status, which
    /// is also persisted on the raw row.
    async fn write_derived_stores(
        &self,
        entry: &Entry,
        fact: Option<&StructuredFact>,
        embedding: Option<EmbeddingInput>,
    ) -> Result<IngestStatus> {
        let mut status = IngestStatus::Committed;

        match fact {
            Some(fact) => match facts::insert_fact_on(self.db.pool(), entry.id, fact).await {
                Ok(()) => {
                    metrics::store_writes().add(
                        1,
                        &[KeyValue::new("store", "facts"), KeyValue::new("result", "ok")],
                    );
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "facts store write failed");
                    status = IngestStatus::Degraded;
                    self.queue_repair(entry.id, RepairTier::Facts, &e.to_string())
                        .await?;
                }
            },
            None => {
                status = IngestStatus::Degraded;
                self.queue_repair(entry.id, RepairTier::Facts, "classification unavailable")
                    .await?;
            }
        }

        match embedding {
            Some(embedding) => {
                match self
                    .db
                    .store_entry_embedding(
                        entry.id,
                        entry.user_id,
                        &embedding.vector,
                        &embedding.text_used,
                    )
                    .await
                {
                    Ok(()) => {
                        metrics::store_writes().add(
                            1,
                            &[KeyValue::new("store", "vector"), KeyValue::new("result", "ok")],
                        );
                    }
                    Err(e) => {
                        warn!(entry_id = %entry.id, error = %e, "vector store write failed");
                        status = IngestStatus::Degraded;
                        self.queue_repair(entry.id, RepairTier::Vector, &e.to_string())
                            .await?;
                    }
                }
            }
            None => {
                status = IngestStatus::Degraded;
                self.queue_repair(entry.id, RepairTier::Vector, "embedding unavailable")
                    .await?;
            }
        }

        if status == IngestStatus::Degraded {
            entries::set_journal_needs_repair_on(self.db.pool(), entry.id, true).await?;
        }
        entries::update_ingest_status_on(self.db.pool(), entry.id, status).await?;
        Ok(status)
    }

    async fn queue_repair(&self, id: EntryId, tier: RepairTier, reason: &str) -> Result<()> {
        metrics::store_writes().add(
            1,
            &[
                KeyValue::new("store", tier.to_string()),
                KeyValue::new("result", "queued_repair"),
            ],
        );
        enqueue_repair_on(
            self.db.pool(),
            id,
            tier,
            reason,
            Utc::now() + Duration::seconds(self.retry.base_delay_secs as i64),
        )
        .await
    }

    /// An entry stuck in `pending` means a crash landed between the
    /// commit transaction and the derived-store stage. Queue both
    /// repairs and settle it as degraded.
    async fn heal_pending(&self, entry: Entry) -> Result<Entry> {
        if entry.ingest_status != IngestStatus::Pending {
            return Ok(entry);
        }
        warn!(entry_id = %entry.id, "healing entry left pending by an interrupted commit");
        let status = self.write_derived_stores(&entry, None, None).await?;
        Ok(Entry {
            ingest_status: status,
            ..entry
        })
    }

    /// User-initiated removal: cascades through all four stores and the
    /// repair queue, then re-derives the streak from what remains.
    pub async fn delete_entry(&self, user_id: i64, id: EntryId) -> Result<bool> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let deleted = self.db.delete_entry_row(user_id, id).await?;
        if !deleted {
            return Ok(false);
        }

        let mut tx = self.db.pool().begin().await?;
        let _prev = streaks::lock_streak_on(&mut tx, user_id).await?;
        let dates = streaks::entry_dates_on(&mut *tx, user_id).await?;
        let next = streak::derive(user_id, &dates);
        streaks::write_streak_on(&mut *tx, &next).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Streak as stored; `StreakState::empty` for an unseen user.
    pub async fn streak(&self, user_id: i64) -> Result<StreakState> {
        self.db.get_streak(user_id).await
    }
}
