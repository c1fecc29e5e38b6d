//! Streak rows. Written only by the memory coordinator, inside the
//! entry-commit transaction, with the row locked for the duration.

use chrono::NaiveDate;
use sqlx::{PgConnection, PgExecutor};

use crate::error::Result;
use crate::model::user::StreakState;

impl super::Db {
    pub async fn get_streak(&self, user_id: i64) -> Result<StreakState> {
        let row: Option<(i32, i32, Option<NaiveDate>)> = sqlx::query_as(
            "SELECT current_streak, longest_streak, last_entry_date FROM streaks WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some((current, longest, last)) => StreakState {
                user_id,
                current_streak: current as u32,
                longest_streak: longest as u32,
                last_entry_date: last,
            },
            None => StreakState::empty(user_id),
        })
    }
}

/// Read the streak row under FOR UPDATE, creating it first if absent.
/// Must run inside a transaction; the lock holds until commit.
pub(crate) async fn lock_streak_on(
    conn: &mut PgConnection,
    user_id: i64,
) -> Result<StreakState> {
    sqlx::query(
        "INSERT INTO streaks (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    let (current, longest, last): (i32, i32, Option<NaiveDate>) = sqlx::query_as(
        "SELECT current_streak, longest_streak, last_entry_date FROM streaks
         WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(StreakState {
        user_id,
        current_streak: current as u32,
        longest_streak: longest as u32,
        last_entry_date: last,
    })
}

pub(crate) async fn write_streak_on<'e>(
    exec: impl PgExecutor<'e>,
    streak: &StreakState,
) -> Result<()> {
    sqlx::query(
        "UPDATE streaks
         SET current_streak = $1, longest_streak = $2, last_entry_date = $3, updated_at = now()
         WHERE user_id = $4",
    )
    .bind(streak.current_streak as i32)
    .bind(streak.longest_streak as i32)
    .bind(streak.last_entry_date)
    .bind(streak.user_id)
    .execute(exec)
    .await?;
    Ok(())
}

/// Distinct entry dates for a user, ascending. Input to the full streak
/// re-derivation after an out-of-order commit or a deletion.
pub(crate) async fn entry_dates_on<'e>(
    exec: impl PgExecutor<'e>,
    user_id: i64,
) -> Result<Vec<NaiveDate>> {
    let rows: Vec<(NaiveDate,)> = sqlx::query_as(
        "SELECT DISTINCT occurred_on FROM raw_entries WHERE user_id = $1 ORDER BY occurred_on ASC",
    )
    .bind(user_id)
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(|(d,)| d).collect())
}
