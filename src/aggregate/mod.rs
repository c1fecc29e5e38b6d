//! Aggregation engine: daily reflections and weekly reports.
//!
//! Exactly-once per (user, period, kind) via the artifact table's unique
//! constraint. The numeric facts are deterministic and never depend on a
//! model call; only the narrative does, and when generation is exhausted
//! the artifact ships with a fact-assembled fallback body instead of
//! blocking downstream consumers.

pub mod score;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::adapters::{Embedder, NarrativeGenerator, NarrativeInput};
use crate::config::{RetryConfig, ScoreWeights};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::ArtifactId;
use crate::model::artifact::{AggregationArtifact, ArtifactKind, PeriodKey};
use crate::retry::backoff_delay;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

use score::PeriodStats;

pub struct AggregationEngine {
    db: Arc<Db>,
    narrator: Arc<dyn NarrativeGenerator>,
    embedder: Arc<dyn Embedder>,
    weights: ScoreWeights,
    retry: RetryConfig,
}

impl AggregationEngine {
    pub fn new(
        db: Arc<Db>,
        narrator: Arc<dyn NarrativeGenerator>,
        embedder: Arc<dyn Embedder>,
        weights: ScoreWeights,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            narrator,
            embedder,
            weights,
            retry,
        }
    }

    /// Generate (or fetch) the artifact for a period.
    ///
    /// Without `force`, an existing artifact is returned unchanged — the
    /// exactly-once guarantee. With `force`, content is regenerated under
    /// the same identity.
    pub async fn generate(
        &self,
        user_id: i64,
        period_key: PeriodKey,
        force: bool,
    ) -> Result<AggregationArtifact> {
        let kind = period_key.kind();
        let key = period_key.to_string();

        if !force {
            if let Some(existing) = self.db.get_artifact(user_id, &key, kind).await? {
                info!(user_id, period = %key, "artifact already committed, returning it");
                return Ok(existing);
            }
        }

        let profile = self.db.get_user(user_id).await?;
        let (start, end) = period_key.window(profile.week_start);
        let rows = self.db.entries_in_window(user_id, start, end).await?;
        if rows.is_empty() {
            return Err(Error::EmptyPeriod {
                user_id,
                period_key: key,
            });
        }

        let stats = score::compute(&rows, &self.weights);
        let input = NarrativeInput {
            display_name: profile.display_name.clone(),
            period_label: match kind {
                ArtifactKind::Daily => format!("daily reflection for {key}"),
                ArtifactKind::Weekly => format!("weekly report for {key}"),
            },
            entry_count: stats.entry_count,
            categories: stats
                .category_histogram
                .iter()
                .map(|(c, n)| (c.clone(), *n))
                .collect(),
            summaries: stats.summaries.clone(),
            accomplishment_count: stats.accomplishment_count,
            pending_blocker_count: stats.pending_blocker_count,
            learning_count: stats.learning_count,
            productivity_score: stats.productivity_score,
        };

        // Style examples bias the weekly narrative away from repeating
        // prior phrasing. Quality input only: any failure yields none.
        let style_examples = if kind == ArtifactKind::Weekly {
            self.style_examples(user_id, &stats).await
        } else {
            Vec::new()
        };

        let (content, degraded) = self.narrative_with_retry(&input, &style_examples).await;

        let artifact = AggregationArtifact {
            id: ArtifactId::new(),
            user_id,
            period_key: key,
            kind,
            content,
            degraded,
            entry_count: stats.entry_count,
            category_histogram: stats.category_histogram,
            productivity_score: stats.productivity_score,
            source_entry_ids: stats.source_entry_ids,
            generated_at: Utc::now(),
            regenerated_at: None,
        };

        let stored = if force {
            self.db.supersede_artifact(&artifact).await?
        } else {
            // First committer wins; a concurrent winner's row comes back.
            self.db.commit_artifact(&artifact).await?.into_artifact()
        };

        self.index_artifact(&stored).await;

        metrics::artifacts_generated().add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("result", if stored.degraded { "fallback" } else { "ok" }),
            ],
        );

        Ok(stored)
    }

    /// Call the narrative generator with bounded retries and backoff.
    /// Exhaustion returns the deterministic fallback, flagged degraded.
    async fn narrative_with_retry(
        &self,
        input: &NarrativeInput,
        style_examples: &[String],
    ) -> (String, bool) {
        let timeout = Duration::from_secs(self.retry.adapter_timeout_secs);

        for attempt in 1..=self.retry.generation_max_attempts {
            match tokio::time::timeout(timeout, self.narrator.generate(input, style_examples))
                .await
            {
                Ok(Ok(text)) => return (text, false),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "narrative generation failed");
                }
                Err(_) => {
                    warn!(attempt, "narrative generation timed out");
                }
            }
            if attempt < self.retry.generation_max_attempts {
                tokio::time::sleep(backoff_delay(
                    attempt,
                    self.retry.base_delay_secs,
                    self.retry.max_delay_secs,
                ))
                .await;
            }
        }

        warn!("narrative generation exhausted, using fallback artifact");
        (fallback_content(input), true)
    }

    async fn style_examples(&self, user_id: i64, stats: &PeriodStats) -> Vec<String> {
        let probe = stats.summaries.join("\n");
        if probe.is_empty() {
            return Vec::new();
        }
        let embedding = match self.embedder.embed(&probe).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "style-example embedding unavailable");
                return Vec::new();
            }
        };
        match self
            .db
            .similar_artifacts(user_id, ArtifactKind::Weekly, &embedding, 3)
            .await
        {
            Ok(similar) => similar.into_iter().map(|s| s.content).collect(),
            Err(e) => {
                warn!(error = %e, "similar-artifact lookup failed");
                Vec::new()
            }
        }
    }

    /// Index the stored artifact for future similarity queries. Vector
    /// store is an enhancement: failures are logged and dropped.
    async fn index_artifact(&self, artifact: &AggregationArtifact) {
        let embedding = match self.embedder.embed(&artifact.content).await {
            Ok(v) => v,
            Err(e) => {
                warn!(artifact_id = %artifact.id, error = %e, "artifact embedding skipped");
                return;
            }
        };
        if let Err(e) = self
            .db
            .store_artifact_embedding(artifact.id, artifact.user_id, artifact.kind, &embedding)
            .await
        {
            warn!(artifact_id = %artifact.id, error = %e, "artifact embedding store failed");
        }
    }
}

/// Assemble a readable artifact body from facts alone. Downstream
/// consumers can always render this; the degraded flag tells them apart
/// from a narrative-rich artifact.
fn fallback_content(input: &NarrativeInput) -> String {
    let categories = if input.categories.is_empty() {
        "none recorded".to_string()
    } else {
        input
            .categories
            .iter()
            .map(|(c, n)| format!("{c} x{n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut body = format!(
        "{}\n\nEntries: {}\nCategories: {}\nAccomplishments: {}\nUnresolved blockers: {}\nLearnings: {}\nScore: {:.1}/10\n",
        input.period_label,
        input.entry_count,
        categories,
        input.accomplishment_count,
        input.pending_blocker_count,
        input.learning_count,
        input.productivity_score,
    );
    if !input.summaries.is_empty() {
        body.push('\n');
        for summary in &input.summaries {
            body.push_str("- ");
            body.push_str(summary);
            body.push('\n');
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_renders_all_facts() {
        let input = NarrativeInput {
            display_name: "Ada".into(),
            period_label: "weekly report for 2025-W11".into(),
            entry_count: 3,
            categories: vec![("coding".into(), 2), ("learning".into(), 1)],
            summaries: vec!["Built the parser.".into()],
            accomplishment_count: 2,
            pending_blocker_count: 1,
            learning_count: 1,
            productivity_score: 5.1,
        };

        let body = fallback_content(&input);
        assert!(body.contains("weekly report for 2025-W11"));
        assert!(body.contains("Entries: 3"));
        assert!(body.contains("coding x2"));
        assert!(body.contains("- Built the parser."));
        assert!(body.contains("5.1/10"));
    }
}
