//! Nudge intents.
//!
//! A nudge is a reminder decision, not a rendered message: the engine
//! emits the kind plus template variables and leaves wording to an
//! external template or text-generation collaborator.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeKind {
    /// Configured morning hour, nothing logged yet today.
    Morning,
    /// Gap since the last entry exceeded the reminder threshold.
    Reminder,
    /// Evening window, streak alive, today still unlogged.
    Streak,
}

impl std::fmt::Display for NudgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NudgeKind::Morning => "morning",
            NudgeKind::Reminder => "reminder",
            NudgeKind::Streak => "streak",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NudgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "morning" => Ok(NudgeKind::Morning),
            "reminder" => Ok(NudgeKind::Reminder),
            "streak" => Ok(NudgeKind::Streak),
            other => Err(Error::Other(format!("unknown nudge kind: {other}"))),
        }
    }
}

/// A nudge intent with its template variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nudge {
    pub kind: NudgeKind,
    pub user_id: i64,
    pub display_name: String,
    pub current_streak: u32,
    pub hours_since_last_entry: Option<i64>,
}
