//! LLM provider setup and adapter implementations via rig-core.
//!
//! Anthropic (rig) backs classification and narrative generation; OpenAI
//! (rig) backs embeddings, since Anthropic does not support embeddings
//! through rig-core. Transcription lives in [`transcribe`] as a plain
//! HTTP adapter.
//!
//! [`transcribe`]: crate::llm::transcribe

pub mod transcribe;

use async_trait::async_trait;
use rig::client::{CompletionClient, EmbeddingsClient};
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel as _;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::Instrument;

use crate::adapters::{Classifier, Embedder, NarrativeGenerator, NarrativeInput};
use crate::error::{Error, Result};
use crate::model::fact::{Category, Sentiment, StructuredFact};
use crate::telemetry::genai;

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> Result<rig::providers::anthropic::Client> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
        .map_err(|e| Error::Config(format!("anthropic client: {e}")))
}

/// Create an OpenAI client for embedding models.
pub fn openai_client(api_key: &SecretString) -> Result<rig::providers::openai::Client> {
    rig::providers::openai::Client::new(api_key.expose_secret())
        .map_err(|e| Error::Config(format!("openai client: {e}")))
}

const CLASSIFY_PREAMBLE: &str = "You analyze work-log voice notes. Categorize the note, extract \
activities, blockers, accomplishments, and learnings, write a summary of at most 50 words, pick \
3-5 lowercase keywords, and judge sentiment. Respond with a single JSON object and nothing else, \
with keys: category (one of coding, learning, debugging, research, meeting, planning, blockers, \
achievement, other), activities, blockers, accomplishments, learnings, keywords (arrays of \
strings), summary (string), sentiment (positive, neutral, or negative).";

/// Classifier backed by a rig Anthropic agent in JSON mode.
pub struct RigClassifier {
    agent: rig::agent::Agent<rig::providers::anthropic::completion::CompletionModel>,
    model: String,
}

impl RigClassifier {
    pub fn new(client: &rig::providers::anthropic::Client, model: &str) -> Self {
        let agent = client
            .agent(model)
            .preamble(CLASSIFY_PREAMBLE)
            .temperature(0.3)
            .max_tokens(1024)
            .build();
        Self {
            agent,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Classifier for RigClassifier {
    async fn classify(&self, text: &str) -> Result<StructuredFact> {
        let span = genai::start_chat_span(&self.model, "anthropic");
        let prompt = format!("TRANSCRIPT:\n{text}");
        let response = async { self.agent.prompt(prompt).await }
            .instrument(span)
            .await
            .map_err(|e| Error::ClassificationFailed(e.to_string()))?;

        parse_classification(&response)
    }
}

/// Tolerant wire shape for classifier output. Unknown categories and
/// sentiments degrade to defaults instead of failing the entry.
#[derive(Deserialize)]
struct ClassificationWire {
    #[serde(default)]
    category: String,
    #[serde(default)]
    activities: Vec<String>,
    #[serde(default)]
    blockers: Vec<String>,
    #[serde(default)]
    accomplishments: Vec<String>,
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    sentiment: String,
}

fn parse_classification(response: &str) -> Result<StructuredFact> {
    let json = strip_code_fences(response);
    let wire: ClassificationWire = serde_json::from_str(json)
        .map_err(|e| Error::ClassificationFailed(format!("bad classifier JSON: {e}")))?;

    Ok(StructuredFact {
        category: Category::from_classifier(&wire.category.to_lowercase()),
        activities: wire.activities,
        blockers: wire.blockers,
        accomplishments: wire.accomplishments,
        learnings: wire.learnings,
        keywords: wire.keywords,
        sentiment: wire
            .sentiment
            .to_lowercase()
            .parse()
            .unwrap_or(Sentiment::Neutral),
        summary: wire.summary,
    }
    .normalized())
}

/// Models occasionally wrap JSON in a markdown fence despite instructions.
fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

const NARRATIVE_PREAMBLE: &str = "You are a thoughtful productivity coach writing short \
reflections from journal facts. Be encouraging, specific about accomplishments, constructive \
about blockers. Two or three paragraphs of plain text, no preamble, no headers.";

/// Narrative generator backed by a rig Anthropic agent.
pub struct RigNarrator {
    agent: rig::agent::Agent<rig::providers::anthropic::completion::CompletionModel>,
    model: String,
}

impl RigNarrator {
    pub fn new(client: &rig::providers::anthropic::Client, model: &str) -> Self {
        let agent = client
            .agent(model)
            .preamble(NARRATIVE_PREAMBLE)
            .temperature(0.7)
            .max_tokens(2048)
            .build();
        Self {
            agent,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl NarrativeGenerator for RigNarrator {
    async fn generate(&self, input: &NarrativeInput, style_examples: &[String]) -> Result<String> {
        let mut prompt = format!(
            "Write a {} for {}.\n\nFACTS:\n- entries: {}\n- categories: {}\n- accomplishments: {}\n- unresolved blockers: {}\n- learnings: {}\n- productivity score: {:.1}/10\n\nENTRY SUMMARIES:\n",
            input.period_label,
            input.display_name,
            input.entry_count,
            input
                .categories
                .iter()
                .map(|(c, n)| format!("{c} x{n}"))
                .collect::<Vec<_>>()
                .join(", "),
            input.accomplishment_count,
            input.pending_blocker_count,
            input.learning_count,
            input.productivity_score,
        );
        for summary in &input.summaries {
            prompt.push_str("- ");
            prompt.push_str(summary);
            prompt.push('\n');
        }
        if !style_examples.is_empty() {
            prompt.push_str(
                "\nPRIOR PIECES (vary your phrasing, do not repeat these):\n",
            );
            for example in style_examples {
                prompt.push_str("---\n");
                prompt.push_str(example);
                prompt.push('\n');
            }
        }

        let span = genai::start_chat_span(&self.model, "anthropic");
        let text = async { self.agent.prompt(prompt).await }
            .instrument(span)
            .await
            .map_err(|e| Error::GenerationFailed(e.to_string()))?;

        let text = text.trim().to_string();
        // Length sanity only; content is opaque to the engine.
        if text.is_empty() {
            return Err(Error::GenerationFailed("empty narrative".to_string()));
        }
        Ok(text)
    }
}

/// Embedder backed by a rig OpenAI embedding model.
pub struct RigEmbedder {
    model: rig::providers::openai::embedding::EmbeddingModel,
    model_name: String,
    dimension: usize,
}

impl RigEmbedder {
    pub fn new(client: &rig::providers::openai::Client, model: &str, dimension: usize) -> Self {
        Self {
            model: client.embedding_model_with_ndims(model, dimension),
            model_name: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for RigEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let span = genai::start_embedding_span(&self.model_name, "openai");
        let embedding = async { self.model.embed_text(text).await }
            .instrument(span)
            .await
            .map_err(|e| Error::StorageTier {
                tier: "vector",
                reason: format!("embedding: {e}"),
            })?;
        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_parses_plain_json() {
        let fact = parse_classification(
            r#"{"category": "debugging", "activities": ["traced the deadlock"],
                "blockers": [], "accomplishments": ["fixed it"], "learnings": [],
                "keywords": ["Deadlock", "tokio"], "summary": "Fixed a deadlock.",
                "sentiment": "positive"}"#,
        )
        .unwrap();
        assert_eq!(fact.category, Category::Debugging);
        assert_eq!(fact.sentiment, Sentiment::Positive);
        assert_eq!(fact.keywords, vec!["deadlock", "tokio"]);
    }

    #[test]
    fn classification_tolerates_fences_and_unknown_values() {
        let fact = parse_classification(
            "```json\n{\"category\": \"yak-shaving\", \"summary\": \"odd day\", \"sentiment\": \"confused\"}\n```",
        )
        .unwrap();
        assert_eq!(fact.category, Category::Other);
        assert_eq!(fact.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn classification_rejects_non_json() {
        assert!(parse_classification("I cannot help with that.").is_err());
    }
}
