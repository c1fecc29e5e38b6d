//! Error types for echolog.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transcription failed or timed out. Fatal to the ingest attempt:
    /// without text there is nothing to store.
    #[error("transcription failed for {audio_ref}: {reason}")]
    TranscriptionFailed { audio_ref: String, reason: String },

    /// Classification failed or timed out. The entry still commits,
    /// degraded, and classification is retried by the repair sweep.
    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    /// Narrative generation failed after bounded retries. The caller
    /// falls back to a deterministic artifact.
    #[error("narrative generation failed: {0}")]
    GenerationFailed(String),

    /// A storage tier write failed. Recorded and repaired in background.
    #[error("{tier} store write failed: {reason}")]
    StorageTier { tier: &'static str, reason: String },

    /// A scheduled job exceeded its wall-clock budget.
    #[error("job {0} exceeded its execution budget")]
    JobTimeout(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// An aggregation window with no committed entries.
    #[error("no entries for {user_id} in period {period_key}")]
    EmptyPeriod { user_id: i64, period_key: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
