//! User profiles, preferences, and streak state.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Per-user profile and scheduling preferences.
///
/// Every schedule trigger is evaluated in `timezone`; the engine never
/// consults the server clock's local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub display_name: String,
    pub timezone: Tz,
    /// First day of the user's reporting week.
    pub week_start: Weekday,
    /// Local hour after which the daily reflection may run.
    pub reflection_hour: u32,
    /// Local weekday + hour for the weekly report.
    pub report_day: Weekday,
    pub report_hour: u32,
    pub morning_hour: u32,
    pub evening_hour: u32,
    pub nudges_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Rolling commitment counter. Mutated only by the memory coordinator,
/// inside the same transaction as the entry commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub user_id: i64,
    /// Consecutive logging days ending at `last_entry_date`.
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_entry_date: Option<NaiveDate>,
}

impl StreakState {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_entry_date: None,
        }
    }
}
