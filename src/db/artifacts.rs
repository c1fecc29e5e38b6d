//! Artifact store: at most one committed artifact per
//! (user_id, period_key, kind).
//!
//! The unique constraint is the exactly-once guarantee: concurrent
//! generation attempts race on the insert and the loser adopts the
//! winner's row instead of erroring.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::artifact::{AggregationArtifact, ArtifactKind};
use crate::model::{ArtifactId, EntryId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

use super::entries::Page;

/// Outcome of a commit attempt.
#[derive(Debug)]
pub enum ArtifactCommit {
    /// This call created the artifact.
    Created(Box<AggregationArtifact>),
    /// Another committer won the race (or the artifact already existed);
    /// the stored row is returned unchanged.
    Existing(Box<AggregationArtifact>),
}

impl ArtifactCommit {
    pub fn into_artifact(self) -> AggregationArtifact {
        match self {
            ArtifactCommit::Created(a) | ArtifactCommit::Existing(a) => *a,
        }
    }
}

impl super::Db {
    pub async fn get_artifact(
        &self,
        user_id: i64,
        period_key: &str,
        kind: ArtifactKind,
    ) -> Result<Option<AggregationArtifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(
            "SELECT id, user_id, period_key, kind, content, degraded, entry_count,
                    category_histogram, productivity_score, source_entry_ids,
                    generated_at, regenerated_at
             FROM artifacts WHERE user_id = $1 AND period_key = $2 AND kind = $3",
        )
        .bind(user_id)
        .bind(period_key)
        .bind(kind.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.map(ArtifactRow::try_into_artifact).transpose()
    }

    pub async fn list_artifacts(
        &self,
        user_id: i64,
        kind: Option<ArtifactKind>,
        page: Page,
    ) -> Result<Vec<AggregationArtifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT id, user_id, period_key, kind, content, degraded, entry_count,
                    category_histogram, productivity_score, source_entry_ids,
                    generated_at, regenerated_at
             FROM artifacts
             WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
             ORDER BY generated_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(kind.map(|k| k.to_string()))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(ArtifactRow::try_into_artifact).collect()
    }

    /// Commit a freshly generated artifact. First committer wins; a
    /// concurrent duplicate is a no-op that returns the stored row.
    pub async fn commit_artifact(&self, artifact: &AggregationArtifact) -> Result<ArtifactCommit> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO artifacts (id, user_id, period_key, kind, content, degraded, entry_count,
                                    category_histogram, productivity_score, source_entry_ids, generated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (user_id, period_key, kind) DO NOTHING
             RETURNING id",
        )
        .bind(artifact.id.0)
        .bind(artifact.user_id)
        .bind(&artifact.period_key)
        .bind(artifact.kind.to_string())
        .bind(&artifact.content)
        .bind(artifact.degraded)
        .bind(artifact.entry_count as i32)
        .bind(serde_json::json!(artifact.category_histogram))
        .bind(artifact.productivity_score)
        .bind(serde_json::json!(artifact.source_entry_ids))
        .bind(artifact.generated_at)
        .fetch_optional(self.pool())
        .await?;

        let result = if inserted.is_some() {
            metrics::artifacts_committed().add(
                1,
                &[
                    KeyValue::new("kind", artifact.kind.to_string()),
                    KeyValue::new("result", "created"),
                ],
            );
            let stored = self
                .get_artifact(artifact.user_id, &artifact.period_key, artifact.kind)
                .await?
                .ok_or_else(|| Error::NotFound("committed artifact vanished".to_string()))?;
            ArtifactCommit::Created(Box::new(stored))
        } else {
            let existing = self
                .get_artifact(artifact.user_id, &artifact.period_key, artifact.kind)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "artifact {}/{}/{}",
                        artifact.user_id, artifact.period_key, artifact.kind
                    ))
                })?;
            metrics::artifacts_committed().add(
                1,
                &[
                    KeyValue::new("kind", artifact.kind.to_string()),
                    KeyValue::new("result", "duplicate"),
                ],
            );
            ArtifactCommit::Existing(Box::new(existing))
        };

        Ok(result)
    }

    /// Forced regeneration: overwrite content under the existing identity
    /// (same id, same period key), never create a second row.
    pub async fn supersede_artifact(
        &self,
        artifact: &AggregationArtifact,
    ) -> Result<AggregationArtifact> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE artifacts
             SET content = $1, degraded = $2, entry_count = $3, category_histogram = $4,
                 productivity_score = $5, source_entry_ids = $6, regenerated_at = now()
             WHERE user_id = $7 AND period_key = $8 AND kind = $9
             RETURNING id",
        )
        .bind(&artifact.content)
        .bind(artifact.degraded)
        .bind(artifact.entry_count as i32)
        .bind(serde_json::json!(artifact.category_histogram))
        .bind(artifact.productivity_score)
        .bind(serde_json::json!(artifact.source_entry_ids))
        .bind(artifact.user_id)
        .bind(&artifact.period_key)
        .bind(artifact.kind.to_string())
        .fetch_optional(self.pool())
        .await?;

        match updated {
            Some(_) => {
                metrics::artifacts_committed().add(
                    1,
                    &[
                        KeyValue::new("kind", artifact.kind.to_string()),
                        KeyValue::new("result", "superseded"),
                    ],
                );
                self.get_artifact(artifact.user_id, &artifact.period_key, artifact.kind)
                    .await?
                    .ok_or_else(|| Error::NotFound("superseded artifact vanished".to_string()))
            }
            // Nothing to supersede — fall back to a plain commit.
            None => Ok(self.commit_artifact(artifact).await?.into_artifact()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: Uuid,
    user_id: i64,
    period_key: String,
    kind: String,
    content: String,
    degraded: bool,
    entry_count: i32,
    category_histogram: serde_json::Value,
    productivity_score: f32,
    source_entry_ids: serde_json::Value,
    generated_at: DateTime<Utc>,
    regenerated_at: Option<DateTime<Utc>>,
}

impl ArtifactRow {
    fn try_into_artifact(self) -> Result<AggregationArtifact> {
        let histogram: BTreeMap<String, i64> =
            serde_json::from_value(self.category_histogram).unwrap_or_default();
        let source_ids: Vec<Uuid> =
            serde_json::from_value(self.source_entry_ids).unwrap_or_default();

        Ok(AggregationArtifact {
            id: ArtifactId(self.id),
            user_id: self.user_id,
            period_key: self.period_key,
            kind: self.kind.parse()?,
            content: self.content,
            degraded: self.degraded,
            entry_count: self.entry_count as i64,
            category_histogram: histogram,
            productivity_score: self.productivity_score,
            source_entry_ids: source_ids.into_iter().map(EntryId).collect(),
            generated_at: self.generated_at,
            regenerated_at: self.regenerated_at,
        })
    }
}
