//! Streak arithmetic.
//!
//! The fast path advances a streak from its previous state and one new
//! date. An out-of-order date (a backfilled entry) invalidates that
//! shortcut, and the caller re-derives from the full distinct-date
//! history instead.

use chrono::NaiveDate;

use crate::model::user::StreakState;

/// Advance a streak with a new entry date.
///
/// Returns `None` when `new_date` is earlier than the last recorded date:
/// the increment rule no longer applies and the streak must be re-derived
/// from history via [`derive`].
pub fn advance(prev: &StreakState, new_date: NaiveDate) -> Option<StreakState> {
    let current = match prev.last_entry_date {
        None => 1,
        Some(last) if new_date == last => return Some(*prev),
        Some(last) if new_date < last => return None,
        Some(last) if new_date == last + chrono::Days::new(1) => prev.current_streak + 1,
        Some(_) => 1, // gap of more than one day
    };

    Some(StreakState {
        user_id: prev.user_id,
        current_streak: current,
        longest_streak: prev.longest_streak.max(current),
        last_entry_date: Some(new_date),
    })
}

/// Re-derive a streak from the full distinct-date history (ascending).
///
/// `current_streak` is the length of the consecutive run ending at the
/// latest date; `longest_streak` is the longest run anywhere in history.
pub fn derive(user_id: i64, dates: &[NaiveDate]) -> StreakState {
    let mut current = 0u32;
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;

    for &date in dates {
        if prev == Some(date) {
            continue;
        }
        run = match prev {
            Some(p) if date == p + chrono::Days::new(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        current = run;
        prev = Some(date);
    }

    StreakState {
        user_id,
        current_streak: current,
        longest_streak: longest,
        last_entry_date: prev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn state(current: u32, longest: u32, last: Option<NaiveDate>) -> StreakState {
        StreakState {
            user_id: 7,
            current_streak: current,
            longest_streak: longest,
            last_entry_date: last,
        }
    }

    #[test]
    fn first_entry_starts_at_one() {
        let next = advance(&state(0, 0, None), d(1)).unwrap();
        assert_eq!(next.current_streak, 1);
        assert_eq!(next.longest_streak, 1);
        assert_eq!(next.last_entry_date, Some(d(1)));
    }

    #[test]
    fn consecutive_day_increments() {
        let next = advance(&state(2, 5, Some(d(2))), d(3)).unwrap();
        assert_eq!(next.current_streak, 3);
        assert_eq!(next.longest_streak, 5);
    }

    #[test]
    fn same_day_is_unchanged() {
        let prev = state(3, 3, Some(d(3)));
        assert_eq!(advance(&prev, d(3)).unwrap(), prev);
    }

    #[test]
    fn gap_resets_to_one() {
        let next = advance(&state(3, 3, Some(d(1))), d(4)).unwrap();
        assert_eq!(next.current_streak, 1);
        assert_eq!(next.longest_streak, 3);
    }

    #[test]
    fn backfill_requires_rederive() {
        assert!(advance(&state(2, 2, Some(d(5))), d(4)).is_none());
    }

    #[test]
    fn derive_counts_run_ending_at_latest_date() {
        // day1..day3 consecutive, regardless of arrival order the dates
        // come back sorted from storage.
        let streak = derive(7, &[d(1), d(2), d(3)]);
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
        assert_eq!(streak.last_entry_date, Some(d(3)));
    }

    #[test]
    fn derive_after_gap_keeps_longest() {
        let streak = derive(7, &[d(1), d(2), d(3), d(10)]);
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 3);
    }

    #[test]
    fn derive_ignores_duplicate_dates() {
        let streak = derive(7, &[d(1), d(1), d(2)]);
        assert_eq!(streak.current_streak, 2);
        assert_eq!(streak.longest_streak, 2);
    }

    #[test]
    fn derive_empty_history_is_zero() {
        let streak = derive(7, &[]);
        assert_eq!(streak.current_streak, 0);
        assert_eq!(streak.last_entry_date, None);
    }
}
