//! Aggregation artifacts and the period keys that make them exactly-once.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{ArtifactId, EntryId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Daily,
    Weekly,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::Daily => "daily",
            ArtifactKind::Weekly => "weekly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(ArtifactKind::Daily),
            "weekly" => Ok(ArtifactKind::Weekly),
            other => Err(Error::Other(format!("unknown artifact kind: {other}"))),
        }
    }
}

/// Aggregation idempotency key: a calendar day (`2025-03-10`) or an ISO
/// week (`2025-W11`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    Daily(NaiveDate),
    Weekly { year: i32, week: u32 },
}

impl PeriodKey {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            PeriodKey::Daily(_) => ArtifactKind::Daily,
            PeriodKey::Weekly { .. } => ArtifactKind::Weekly,
        }
    }

    /// The period containing `date`, for the given artifact kind.
    pub fn containing(date: NaiveDate, kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Daily => PeriodKey::Daily(date),
            ArtifactKind::Weekly => {
                let iso = date.iso_week();
                PeriodKey::Weekly {
                    year: iso.year(),
                    week: iso.week(),
                }
            }
        }
    }

    /// Inclusive date window covered by this period.
    ///
    /// Weekly windows honor the user's configured week-start day: the
    /// window is the 7-day span beginning on the `week_start` that falls
    /// on or before the ISO week's Monday.
    pub fn window(&self, week_start: Weekday) -> (NaiveDate, NaiveDate) {
        match *self {
            PeriodKey::Daily(d) => (d, d),
            PeriodKey::Weekly { year, week } => {
                // from_isoywd only fails for out-of-range weeks, which
                // parse() already rejects.
                let monday =
                    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).unwrap_or_default();
                let back = (7 - week_start.num_days_from_monday()) % 7;
                let start = monday - chrono::Days::new(back as u64);
                (start, start + chrono::Days::new(6))
            }
        }
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PeriodKey::Daily(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            PeriodKey::Weekly { year, week } => write!(f, "{year}-W{week:02}"),
        }
    }
}

impl std::str::FromStr for PeriodKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some((year, week)) = s.split_once("-W") {
            let year: i32 = year
                .parse()
                .map_err(|_| Error::Other(format!("bad period key: {s}")))?;
            let week: u32 = week
                .parse()
                .map_err(|_| Error::Other(format!("bad period key: {s}")))?;
            if NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).is_none() {
                return Err(Error::Other(format!("bad period key: {s}")));
            }
            return Ok(PeriodKey::Weekly { year, week });
        }
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| Error::Other(format!("bad period key: {s}")))?;
        Ok(PeriodKey::Daily(date))
    }
}

/// A daily reflection or weekly report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationArtifact {
    pub id: ArtifactId,
    pub user_id: i64,
    pub period_key: String,
    pub kind: ArtifactKind,
    /// Narrative text, or the deterministic fallback when generation was
    /// exhausted (then `degraded` is set).
    pub content: String,
    pub degraded: bool,
    pub entry_count: i64,
    pub category_histogram: BTreeMap<String, i64>,
    pub productivity_score: f32,
    pub source_entry_ids: Vec<EntryId>,
    pub generated_at: DateTime<Utc>,
    pub regenerated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_key_round_trips() {
        for raw in ["2025-03-10", "2025-W11", "2026-W01"] {
            let key: PeriodKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
        assert!("2025-W60".parse::<PeriodKey>().is_err());
        assert!("not-a-key".parse::<PeriodKey>().is_err());
    }

    #[test]
    fn weekly_window_monday_start() {
        let key: PeriodKey = "2025-W11".parse().unwrap();
        let (start, end) = key.window(Weekday::Mon);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 16).unwrap());
    }

    #[test]
    fn weekly_window_sunday_start_shifts_back_one_day() {
        let key: PeriodKey = "2025-W11".parse().unwrap();
        let (start, end) = key.window(Weekday::Sun);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());
    }

    #[test]
    fn containing_maps_dates_into_iso_weeks() {
        let wed = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        let key = PeriodKey::containing(wed, ArtifactKind::Weekly);
        assert_eq!(key.to_string(), "2025-W11");

        let key = PeriodKey::containing(wed, ArtifactKind::Daily);
        assert_eq!(key.to_string(), "2025-03-12");
    }
}
