//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub anthropic_api_key: SecretString,
    pub openai_api_key: SecretString,
    /// Whisper-compatible transcription endpoint.
    pub transcription_url: String,
    pub transcription_api_key: SecretString,
    pub completion_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub score: ScoreWeights,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

/// Weights for the deterministic productivity score. Reproducible with no
/// network access; tune via ECHOLOG_SCORE_* env vars.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub baseline: f32,
    /// Per-entry contribution, counted up to `volume_cap` entries.
    pub volume: f32,
    pub volume_cap: u32,
    pub accomplishment: f32,
    pub learning: f32,
    /// Subtracted per unresolved blocker.
    pub blocker_penalty: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            baseline: 1.0,
            volume: 0.6,
            volume_cap: 5,
            accomplishment: 1.0,
            learning: 0.8,
            blocker_penalty: 0.5,
        }
    }
}

/// Retry/backoff knobs shared by narrative generation and the repair sweep.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub generation_max_attempts: u32,
    pub repair_max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Per-call timeout for every external adapter.
    pub adapter_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            generation_max_attempts: 3,
            repair_max_attempts: 5,
            base_delay_secs: 2,
            max_delay_secs: 60,
            adapter_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub job_max_attempts: u32,
    /// Wall-clock budget per job run; also the pgmq visibility timeout.
    pub job_budget_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Hours without an entry before a reminder nudge is considered.
    pub nudge_threshold_hours: i64,
    /// Cadence of the inactivity check, in hours.
    pub inactivity_check_hours: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            job_max_attempts: 3,
            job_budget_secs: 300,
            max_concurrent_jobs: 4,
            nudge_threshold_hours: 24,
            inactivity_check_hours: 4,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            anthropic_api_key: SecretString::from(required_var("ANTHROPIC_API_KEY")?),
            openai_api_key: SecretString::from(required_var("OPENAI_API_KEY")?),
            transcription_url: std::env::var("TRANSCRIPTION_URL").unwrap_or_else(|_| {
                "https://api.groq.com/openai/v1/audio/transcriptions".to_string()
            }),
            transcription_api_key: SecretString::from(required_var("TRANSCRIPTION_API_KEY")?),
            completion_model: std::env::var("COMPLETION_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: parsed_var("EMBEDDING_DIMENSION", 1536)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            score: ScoreWeights::from_env()?,
            retry: RetryConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}

impl ScoreWeights {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            baseline: parsed_var("ECHOLOG_SCORE_BASELINE", d.baseline)?,
            volume: parsed_var("ECHOLOG_SCORE_VOLUME", d.volume)?,
            volume_cap: parsed_var("ECHOLOG_SCORE_VOLUME_CAP", d.volume_cap)?,
            accomplishment: parsed_var("ECHOLOG_SCORE_ACCOMPLISHMENT", d.accomplishment)?,
            learning: parsed_var("ECHOLOG_SCORE_LEARNING", d.learning)?,
            blocker_penalty: parsed_var("ECHOLOG_SCORE_BLOCKER_PENALTY", d.blocker_penalty)?,
        })
    }
}

impl RetryConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            generation_max_attempts: parsed_var("GENERATION_MAX_ATTEMPTS", d.generation_max_attempts)?,
            repair_max_attempts: parsed_var("REPAIR_MAX_ATTEMPTS", d.repair_max_attempts)?,
            base_delay_secs: parsed_var("RETRY_BASE_DELAY_SECS", d.base_delay_secs)?,
            max_delay_secs: parsed_var("RETRY_MAX_DELAY_SECS", d.max_delay_secs)?,
            adapter_timeout_secs: parsed_var("ADAPTER_TIMEOUT_SECS", d.adapter_timeout_secs)?,
        })
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            poll_interval_secs: parsed_var("SCHEDULER_POLL_INTERVAL_SECS", d.poll_interval_secs)?,
            job_max_attempts: parsed_var("JOB_MAX_ATTEMPTS", d.job_max_attempts)?,
            job_budget_secs: parsed_var("JOB_BUDGET_SECS", d.job_budget_secs)?,
            max_concurrent_jobs: parsed_var("MAX_CONCURRENT_JOBS", d.max_concurrent_jobs)?,
            nudge_threshold_hours: parsed_var("NUDGE_THRESHOLD_HOURS", d.nudge_threshold_hours)?,
            inactivity_check_hours: parsed_var("INACTIVITY_CHECK_HOURS", d.inactivity_check_hours)?,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("cannot parse {name}={raw}"))),
        Err(_) => Ok(default),
    }
}
