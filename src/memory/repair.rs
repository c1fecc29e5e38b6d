//! Background repair of degraded entries.
//!
//! Re-runs classification or embedding only — never transcription; the
//! raw transcript is already durable. Attempts are bounded: an exhausted
//! item leaves the entry permanently degraded and visible in the
//! dashboard's needs-attention listing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::adapters::{Classifier, Embedder};
use crate::config::RetryConfig;
use crate::db::repair::{RepairItem, RepairTier};
use crate::db::{Db, entries, facts};
use crate::error::{Error, Result};
use crate::model::entry::IngestStatus;
use crate::retry::backoff_delay;
use crate::telemetry::metrics;

pub struct RepairSweeper {
    db: Arc<Db>,
    classifier: Arc<dyn Classifier>,
    embedder: Arc<dyn Embedder>,
    retry: RetryConfig,
}

impl RepairSweeper {
    pub fn new(
        db: Arc<Db>,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            classifier,
            embedder,
            retry,
        }
    }

    /// Process all currently-due repair items. Returns how many healed.
    pub async fn run_due(&self, limit: i64) -> Result<usize> {
        let due = self.db.due_repairs(limit).await?;
        let mut healed = 0;

        for item in due {
            match self.repair_one(&item).await {
                Ok(()) => {
                    let remaining = self.db.resolve_repair(item.id, item.entry_id).await?;
                    if remaining == 0 {
                        entries::set_journal_needs_repair_on(self.db.pool(), item.entry_id, false)
                            .await?;
                        entries::update_ingest_status_on(
                            self.db.pool(),
                            item.entry_id,
                            IngestStatus::Committed,
                        )
                        .await?;
                        info!(entry_id = %item.entry_id, "entry fully repaired");
                    }
                    metrics::repairs().add(
                        1,
                        &[
                            KeyValue::new("tier", item.tier.to_string()),
                            KeyValue::new("result", "ok"),
                        ],
                    );
                    healed += 1;
                }
                Err(e) => {
                    let next = Utc::now()
                        + chrono::Duration::from_std(backoff_delay(
                            item.attempts + 1,
                            self.retry.base_delay_secs,
                            self.retry.max_delay_secs,
                        ))
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    let exhausted = self
                        .db
                        .defer_repair(item.id, &e.to_string(), next, self.retry.repair_max_attempts)
                        .await?;
                    if exhausted {
                        warn!(
                            entry_id = %item.entry_id,
                            tier = %item.tier,
                            error = %e,
                            "repair attempts exhausted, entry stays degraded"
                        );
                    }
                    metrics::repairs().add(
                        1,
                        &[
                            KeyValue::new("tier", item.tier.to_string()),
                            KeyValue::new(
                                "result",
                                if exhausted { "exhausted" } else { "deferred" },
                            ),
                        ],
                    );
                }
            }
        }

        Ok(healed)
    }

    async fn repair_one(&self, item: &RepairItem) -> Result<()> {
        let entry = self.db.get_entry(item.entry_id).await?;
        let timeout = Duration::from_secs(self.retry.adapter_timeout_secs);

        match item.tier {
            RepairTier::Facts => {
                let fact = tokio::time::timeout(timeout, self.classifier.classify(&entry.raw_text))
                    .await
                    .map_err(|_| Error::ClassificationFailed("timed out".to_string()))??;
                facts::insert_fact_on(self.db.pool(), entry.id, &fact).await?;
                entries::update_journal_fact_columns_on(self.db.pool(), entry.id, &fact).await?;
            }
            RepairTier::Vector => {
                // Prefer the summary when classification already landed.
                let text = match self.db.get_fact(entry.id).await? {
                    Some(fact) => fact.summary,
                    None => entry.raw_text.clone(),
                };
                let vector = tokio::time::timeout(timeout, self.embedder.embed(&text))
                    .await
                    .map_err(|_| Error::StorageTier {
                        tier: "vector",
                        reason: "embedding timed out".to_string(),
                    })??;
                self.db
                    .store_entry_embedding(entry.id, entry.user_id, &vector, &text)
                    .await?;
            }
        }
        Ok(())
    }
}
