//! User profiles and scheduling preferences.

use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{Error, Result};
use crate::model::user::UserProfile;

impl super::Db {
    pub async fn get_user(&self, user_id: i64) -> Result<UserProfile> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, display_name, timezone, week_start_day, reflection_hour,
                    report_day, report_hour, morning_hour, evening_hour, nudges_enabled,
                    created_at, last_seen_at
             FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("user {user_id}")))?
            .try_into_profile()
    }

    /// Every user, for per-user trigger evaluation.
    pub async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT user_id, display_name, timezone, week_start_day, reflection_hour,
                    report_day, report_hour, morning_hour, evening_hour, nudges_enabled,
                    created_at, last_seen_at
             FROM users ORDER BY user_id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(UserRow::try_into_profile).collect()
    }

    /// Create or update a profile. New users get the column defaults for
    /// everything not supplied.
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, display_name, timezone, week_start_day, reflection_hour,
                                report_day, report_hour, morning_hour, evening_hour, nudges_enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (user_id) DO UPDATE SET
                 display_name = $2, timezone = $3, week_start_day = $4, reflection_hour = $5,
                 report_day = $6, report_hour = $7, morning_hour = $8, evening_hour = $9,
                 nudges_enabled = $10, last_seen_at = now()",
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.timezone.name())
        .bind(profile.week_start.number_from_monday() as i16)
        .bind(profile.reflection_hour as i16)
        .bind(profile.report_day.number_from_monday() as i16)
        .bind(profile.report_hour as i16)
        .bind(profile.morning_hour as i16)
        .bind(profile.evening_hour as i16)
        .bind(profile.nudges_enabled)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn touch_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_seen_at = now() WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// When the user's most recent nudge of the given kind went out.
    pub async fn last_nudge_at(
        &self,
        user_id: i64,
        kind: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT max(sent_at) FROM nudge_log
             WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)",
        )
        .bind(user_id)
        .bind(kind)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    pub async fn log_nudge(&self, user_id: i64, kind: &str) -> Result<()> {
        sqlx::query("INSERT INTO nudge_log (user_id, kind) VALUES ($1, $2)")
            .bind(user_id)
            .bind(kind)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: i64,
    display_name: String,
    timezone: String,
    week_start_day: i16,
    reflection_hour: i16,
    report_day: i16,
    report_hour: i16,
    morning_hour: i16,
    evening_hour: i16,
    nudges_enabled: bool,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_profile(self) -> Result<UserProfile> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|_| Error::Other(format!("bad timezone for user {}: {}", self.user_id, self.timezone)))?;
        Ok(UserProfile {
            user_id: self.user_id,
            display_name: self.display_name,
            timezone,
            week_start: weekday_from_number(self.week_start_day)?,
            reflection_hour: self.reflection_hour as u32,
            report_day: weekday_from_number(self.report_day)?,
            report_hour: self.report_hour as u32,
            morning_hour: self.morning_hour as u32,
            evening_hour: self.evening_hour as u32,
            nudges_enabled: self.nudges_enabled,
            created_at: self.created_at,
            last_seen_at: self.last_seen_at,
        })
    }
}

/// 1 = Monday .. 7 = Sunday, matching chrono's number_from_monday.
fn weekday_from_number(n: i16) -> Result<Weekday> {
    match n {
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        7 => Ok(Weekday::Sun),
        other => Err(Error::Other(format!("bad weekday number: {other}"))),
    }
}
