//! Structured store: one immutable fact row per classified entry.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::Result;
use crate::model::EntryId;
use crate::model::fact::StructuredFact;

impl super::Db {
    /// Fetch the fact for an entry, if classification has landed.
    pub async fn get_fact(&self, id: EntryId) -> Result<Option<StructuredFact>> {
        let row: Option<FactRow> = sqlx::query_as(
            "SELECT entry_id, category, activities, blockers, accomplishments, learnings, keywords, sentiment, summary
             FROM structured_facts WHERE entry_id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(FactRow::try_into_fact).transpose()
    }

    /// Insert a fact row. First write wins: facts are immutable and a
    /// repair re-run against an already-filled store is a no-op.
    pub async fn insert_fact(&self, id: EntryId, fact: &StructuredFact) -> Result<()> {
        insert_fact_on(self.pool(), id, fact).await
    }
}

pub(crate) async fn insert_fact_on<'e>(
    exec: impl PgExecutor<'e>,
    id: EntryId,
    fact: &StructuredFact,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO structured_facts (entry_id, category, activities, blockers, accomplishments, learnings, keywords, sentiment, summary)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (entry_id) DO NOTHING",
    )
    .bind(id.0)
    .bind(fact.category.to_string())
    .bind(serde_json::json!(fact.activities))
    .bind(serde_json::json!(fact.blockers))
    .bind(serde_json::json!(fact.accomplishments))
    .bind(serde_json::json!(fact.learnings))
    .bind(serde_json::json!(fact.keywords))
    .bind(fact.sentiment.to_string())
    .bind(&fact.summary)
    .execute(exec)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct FactRow {
    #[allow(dead_code)]
    entry_id: Uuid,
    category: String,
    activities: serde_json::Value,
    blockers: serde_json::Value,
    accomplishments: serde_json::Value,
    learnings: serde_json::Value,
    keywords: serde_json::Value,
    sentiment: String,
    summary: String,
}

impl FactRow {
    fn try_into_fact(self) -> Result<StructuredFact> {
        Ok(StructuredFact {
            category: self.category.parse()?,
            activities: string_list(self.activities),
            blockers: string_list(self.blockers),
            accomplishments: string_list(self.accomplishments),
            learnings: string_list(self.learnings),
            keywords: string_list(self.keywords),
            sentiment: self.sentiment.parse()?,
            summary: self.summary,
        })
    }
}

fn string_list(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}
