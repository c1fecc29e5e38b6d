//! Ingestion pipeline: transcription, classification, embedding, commit.
//!
//! A transcript is the minimum viable unit — transcription failure fails
//! the whole attempt and nothing is written. Classification and
//! embedding failures degrade the commit instead; the repair sweep
//! finishes the job later. The idempotency key is checked before any
//! paid adapter call so webhook retries never re-invoke transcription.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::adapters::{Classifier, Embedder, Notifier, Transcriber};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::memory::{EmbeddingInput, MemoryCoordinator};
use crate::model::EntryId;
use crate::model::entry::{EntryDraft, IngestStatus};
use crate::model::fact::StructuredFact;
use crate::model::user::StreakState;

/// What the caller (bot shell, CLI) gets back from an ingest.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub entry_id: EntryId,
    pub ingest_status: IngestStatus,
    /// True when this call was absorbed by a previous commit of the same
    /// voice note.
    pub duplicate: bool,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub streak: StreakState,
}

pub struct IngestionPipeline {
    coordinator: Arc<MemoryCoordinator>,
    transcriber: Arc<dyn Transcriber>,
    classifier: Arc<dyn Classifier>,
    embedder: Arc<dyn Embedder>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
}

impl IngestionPipeline {
    pub fn new(
        coordinator: Arc<MemoryCoordinator>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
        notifier: Arc<dyn Notifier>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            coordinator,
            transcriber,
            classifier,
            embedder,
            notifier,
            retry,
        }
    }

    /// Ingest one voice note.
    pub async fn ingest(
        &self,
        user_id: i64,
        audio_ref: &str,
        occurred_on: NaiveDate,
    ) -> Result<IngestReceipt> {
        let key = idempotency_key(user_id, audio_ref, occurred_on);

        // Short-circuit on a known key before paying for transcription.
        if let Some(existing) = self
            .coordinator
            .db()
            .find_entry_by_key(user_id, &key)
            .await?
        {
            info!(entry_id = %existing.id, "duplicate ingest absorbed");
            let fact = self.coordinator.db().get_fact(existing.id).await?;
            let streak = self.coordinator.streak(user_id).await?;
            return Ok(receipt(existing.id, existing.ingest_status, true, fact, streak));
        }

        let timeout = Duration::from_secs(self.retry.adapter_timeout_secs);

        let raw_text = tokio::time::timeout(timeout, self.transcriber.transcribe(audio_ref))
            .await
            .map_err(|_| Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: "timed out".to_string(),
            })??;

        let fact = match tokio::time::timeout(timeout, self.classifier.classify(&raw_text)).await
        {
            Ok(Ok(fact)) => Some(fact),
            Ok(Err(e)) => {
                warn!(error = %e, "classification failed, committing degraded");
                None
            }
            Err(_) => {
                warn!("classification timed out, committing degraded");
                None
            }
        };

        let embed_text = fact
            .as_ref()
            .map(|f| f.summary.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| raw_text.clone());
        let embedding = match tokio::time::timeout(timeout, self.embedder.embed(&embed_text)).await
        {
            Ok(Ok(vector)) => Some(EmbeddingInput {
                vector,
                text_used: embed_text,
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "embedding failed, vector store will repair");
                None
            }
            Err(_) => {
                warn!("embedding timed out, vector store will repair");
                None
            }
        };

        let draft = EntryDraft {
            user_id,
            idempotency_key: key,
            occurred_on,
            audio_ref: audio_ref.to_string(),
            raw_text,
        };

        let committed_fact = fact.clone();
        let result = self.coordinator.commit(draft, fact, embedding).await?;

        let receipt = receipt(
            result.entry.id,
            result.entry.ingest_status,
            result.duplicate,
            committed_fact,
            result.streak,
        );

        // Confirmation is best effort; a notification failure must not
        // fail an already-committed ingest.
        if !result.duplicate {
            let confirmation = confirmation_message(&receipt);
            if let Err(e) = self.notifier.deliver(user_id, &confirmation).await {
                warn!(error = %e, "confirmation delivery failed");
            }
        }

        Ok(receipt)
    }
}

/// Key for exactly-once ingestion: one voice note on one user-local day
/// hashes to the same value however often upstream retries delivery.
pub fn idempotency_key(user_id: i64, audio_ref: &str, occurred_on: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(b":");
    hasher.update(audio_ref.as_bytes());
    hasher.update(b":");
    hasher.update(occurred_on.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn receipt(
    entry_id: EntryId,
    status: IngestStatus,
    duplicate: bool,
    fact: Option<StructuredFact>,
    streak: StreakState,
) -> IngestReceipt {
    IngestReceipt {
        entry_id,
        ingest_status: status,
        duplicate,
        category: fact.as_ref().map(|f| f.category.to_string()),
        summary: fact.map(|f| f.summary),
        streak,
    }
}

fn confirmation_message(receipt: &IngestReceipt) -> String {
    match (&receipt.category, &receipt.summary) {
        (Some(category), Some(summary)) => format!(
            "Logged ({category}): {summary} — streak {}",
            receipt.streak.current_streak
        ),
        _ => format!(
            "Logged; details are still processing — streak {}",
            receipt.streak.current_streak
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_and_distinct() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let a = idempotency_key(7, "audio/abc", day);
        let b = idempotency_key(7, "audio/abc", day);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, idempotency_key(8, "audio/abc", day));
        assert_ne!(a, idempotency_key(7, "audio/xyz", day));
        assert_ne!(
            a,
            idempotency_key(7, "audio/abc", day + chrono::Days::new(1))
        );
    }
}
