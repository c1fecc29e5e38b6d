//! Boundary traits for the external collaborators.
//!
//! The engine core never talks to a provider directly; it holds trait
//! objects so production wiring (rig/HTTP, `crate::llm`) and test fakes
//! are interchangeable. Every call site wraps these in a timeout and
//! treats timeout exactly like failure.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::fact::StructuredFact;
use crate::model::nudge::Nudge;

/// Converts a stored audio reference to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_ref: &str) -> Result<String>;
}

/// Extracts the closed fact schema from a transcript.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<StructuredFact>;
}

/// Produces a fixed-dimension embedding for a text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Deterministic facts gathered for narrative synthesis. The generator
/// receives only these; it never queries storage itself.
#[derive(Debug, Clone)]
pub struct NarrativeInput {
    pub display_name: String,
    pub period_label: String,
    pub entry_count: i64,
    pub categories: Vec<(String, i64)>,
    pub summaries: Vec<String>,
    pub accomplishment_count: i64,
    pub pending_blocker_count: i64,
    pub learning_count: i64,
    pub productivity_score: f32,
}

/// Turns gathered facts into narrative text. Output is opaque; callers
/// only sanity-check length.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, input: &NarrativeInput, style_examples: &[String]) -> Result<String>;
}

/// Delivers a message to the user through whatever transport the outer
/// shell provides (chat, push — not this crate's concern).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, user_id: i64, message: &str) -> Result<()>;

    /// Deliver a nudge intent. Default rendering is a plain sentence;
    /// real shells template this themselves.
    async fn deliver_nudge(&self, nudge: &Nudge) -> Result<()> {
        let message = match nudge.hours_since_last_entry {
            Some(hours) => format!(
                "{} nudge for {} (streak {}, {}h since last entry)",
                nudge.kind, nudge.display_name, nudge.current_streak, hours
            ),
            None => format!(
                "{} nudge for {} (streak {})",
                nudge.kind, nudge.display_name, nudge.current_streak
            ),
        };
        self.deliver(nudge.user_id, &message).await
    }
}

/// Notifier for headless runs: messages land in the log stream instead
/// of a chat transport.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn deliver(&self, user_id: i64, message: &str) -> Result<()> {
        tracing::info!(user_id, message, "notification");
        Ok(())
    }
}
