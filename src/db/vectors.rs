//! Vector store: entry and artifact embeddings via pgvector.
//!
//! An optional tier — unavailability degrades quality (weaker style
//! examples, no similarity search), never correctness.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ArtifactId, EntryId};
use crate::model::artifact::ArtifactKind;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// A stored entry embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub entry_id: EntryId,
    pub text_used: String,
    pub created_at: DateTime<Utc>,
}

/// A prior artifact surfaced by similarity search, used as a style
/// example to avoid repeated phrasing.
#[derive(Debug, Clone)]
pub struct SimilarArtifact {
    pub artifact_id: ArtifactId,
    pub content: String,
}

impl super::Db {
    /// Store an entry embedding. Replaces any previous vector for the
    /// entry (repair may re-embed).
    pub async fn store_entry_embedding(
        &self,
        entry_id: EntryId,
        user_id: i64,
        embedding: &[f32],
        text_used: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO entry_embeddings (entry_id, user_id, embedding, text_used)
             VALUES ($1, $2, $3::vector, $4)
             ON CONFLICT (entry_id) DO UPDATE SET embedding = $3::vector, text_used = $4",
        )
        .bind(entry_id.0)
        .bind(user_id)
        .bind(format_vector(embedding))
        .bind(text_used)
        .execute(self.pool())
        .await?;
        metrics::vector_operations().add(1, &[KeyValue::new("operation", "store_entry")]);
        Ok(())
    }

    pub async fn get_entry_embedding(&self, entry_id: EntryId) -> Result<Option<EmbeddingRecord>> {
        let row: Option<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT entry_id, text_used, created_at FROM entry_embeddings WHERE entry_id = $1",
        )
        .bind(entry_id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id, text_used, created_at)| EmbeddingRecord {
            entry_id: EntryId(id),
            text_used,
            created_at,
        }))
    }

    /// Store an artifact embedding for future similarity queries.
    pub async fn store_artifact_embedding(
        &self,
        artifact_id: ArtifactId,
        user_id: i64,
        kind: ArtifactKind,
        embedding: &[f32],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifact_embeddings (artifact_id, user_id, kind, embedding)
             VALUES ($1, $2, $3, $4::vector)
             ON CONFLICT (artifact_id) DO UPDATE SET embedding = $4::vector",
        )
        .bind(artifact_id.0)
        .bind(user_id)
        .bind(kind.to_string())
        .bind(format_vector(embedding))
        .execute(self.pool())
        .await?;
        metrics::vector_operations().add(1, &[KeyValue::new("operation", "store_artifact")]);
        Ok(())
    }

    /// The user's prior artifacts nearest to `embedding` (cosine
    /// distance), joined back to their content.
    pub async fn similar_artifacts(
        &self,
        user_id: i64,
        kind: ArtifactKind,
        embedding: &[f32],
        limit: i64,
    ) -> Result<Vec<SimilarArtifact>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT e.artifact_id, a.content
             FROM artifact_embeddings e
             JOIN artifacts a ON a.id = e.artifact_id
             WHERE e.user_id = $1 AND e.kind = $2
             ORDER BY e.embedding <=> $3::vector
             LIMIT $4",
        )
        .bind(user_id)
        .bind(kind.to_string())
        .bind(format_vector(embedding))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        metrics::vector_operations().add(1, &[KeyValue::new("operation", "search_artifacts")]);

        Ok(rows
            .into_iter()
            .map(|(artifact_id, content)| SimilarArtifact {
                artifact_id: ArtifactId(artifact_id),
                content,
            })
            .collect())
    }
}

/// Format a f32 slice as a pgvector string literal: `"[0.1,0.2,0.3]"`
fn format_vector(v: &[f32]) -> String {
    let inner: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", inner.join(","))
}
