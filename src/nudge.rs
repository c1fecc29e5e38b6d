//! Nudge policy.
//!
//! A pure function of its inputs: streak state, gap since the last
//! entry, the user's local clock, and nudge history. Emits at most one
//! intent per trigger tick; the opt-out flag short-circuits everything.

use crate::model::nudge::{Nudge, NudgeKind};

/// Don't repeat a morning nudge within the same day.
const MORNING_SUPPRESS_HOURS: i64 = 12;
/// Don't stack streak nudges across an evening.
const STREAK_SUPPRESS_HOURS: i64 = 4;
/// Streak nudges fire within this many hours after the evening hour.
const EVENING_WINDOW_HOURS: u32 = 2;

/// Inputs for one nudge decision, all resolved by the caller.
#[derive(Debug, Clone)]
pub struct NudgeContext {
    pub user_id: i64,
    pub display_name: String,
    pub nudges_enabled: bool,
    pub morning_hour: u32,
    pub evening_hour: u32,
    /// Hour of day on the user's local clock.
    pub local_hour: u32,
    pub has_entry_today: bool,
    pub current_streak: u32,
    pub hours_since_last_entry: Option<i64>,
    pub hours_since_last_nudge: Option<i64>,
    pub reminder_threshold_hours: i64,
}

impl NudgeContext {
    fn nudge(&self, kind: NudgeKind) -> Nudge {
        Nudge {
            kind,
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            current_streak: self.current_streak,
            hours_since_last_entry: self.hours_since_last_entry,
        }
    }

    /// A nudge already went out after the last entry — the current gap
    /// has been covered.
    fn nudged_within_gap(&self) -> bool {
        match (self.hours_since_last_nudge, self.hours_since_last_entry) {
            (Some(nudge), Some(entry)) => nudge < entry,
            (Some(_), None) => true, // never logged, but already nudged
            (None, _) => false,
        }
    }

    fn nudged_within(&self, hours: i64) -> bool {
        self.hours_since_last_nudge.is_some_and(|h| h < hours)
    }
}

/// Decide whether this tick emits a nudge, and which. Most urgent rule
/// wins: an overdue reminder beats the morning prompt beats the streak
/// keeper.
pub fn decide(ctx: &NudgeContext) -> Option<Nudge> {
    if !ctx.nudges_enabled {
        return None;
    }

    let overdue = ctx
        .hours_since_last_entry
        .is_some_and(|h| h >= ctx.reminder_threshold_hours);
    if overdue && !ctx.nudged_within_gap() {
        return Some(ctx.nudge(NudgeKind::Reminder));
    }

    if ctx.local_hour == ctx.morning_hour
        && !ctx.has_entry_today
        && !ctx.nudged_within(MORNING_SUPPRESS_HOURS)
    {
        return Some(ctx.nudge(NudgeKind::Morning));
    }

    let in_evening_window = ctx.local_hour >= ctx.evening_hour
        && ctx.local_hour < ctx.evening_hour + EVENING_WINDOW_HOURS;
    if in_evening_window
        && ctx.current_streak > 0
        && !ctx.has_entry_today
        && !ctx.nudged_within(STREAK_SUPPRESS_HOURS)
    {
        return Some(ctx.nudge(NudgeKind::Streak));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NudgeContext {
        NudgeContext {
            user_id: 7,
            display_name: "Ada".into(),
            nudges_enabled: true,
            morning_hour: 9,
            evening_hour: 21,
            local_hour: 12,
            has_entry_today: false,
            current_streak: 0,
            hours_since_last_entry: Some(5),
            hours_since_last_nudge: None,
            reminder_threshold_hours: 24,
        }
    }

    #[test]
    fn opt_out_short_circuits() {
        let mut c = ctx();
        c.nudges_enabled = false;
        c.hours_since_last_entry = Some(48);
        assert_eq!(decide(&c), None);
    }

    #[test]
    fn morning_hour_without_entry_fires_morning_nudge() {
        let mut c = ctx();
        c.local_hour = 9;
        assert_eq!(decide(&c).unwrap().kind, NudgeKind::Morning);
    }

    #[test]
    fn morning_nudge_respects_entry_and_repeat() {
        let mut c = ctx();
        c.local_hour = 9;
        c.has_entry_today = true;
        assert_eq!(decide(&c), None);

        let mut c = ctx();
        c.local_hour = 9;
        c.hours_since_last_nudge = Some(3);
        assert_eq!(decide(&c), None);
    }

    #[test]
    fn long_gap_fires_reminder_once_per_gap() {
        let mut c = ctx();
        c.hours_since_last_entry = Some(30);
        assert_eq!(decide(&c).unwrap().kind, NudgeKind::Reminder);

        // A nudge sent 2h ago (inside the 30h gap) suppresses the next.
        c.hours_since_last_nudge = Some(2);
        assert_eq!(decide(&c), None);

        // A nudge older than the gap (sent before the last entry) does not.
        c.hours_since_last_nudge = Some(40);
        assert_eq!(decide(&c).unwrap().kind, NudgeKind::Reminder);
    }

    #[test]
    fn reminder_outranks_morning() {
        let mut c = ctx();
        c.local_hour = 9;
        c.hours_since_last_entry = Some(48);
        assert_eq!(decide(&c).unwrap().kind, NudgeKind::Reminder);
    }

    #[test]
    fn evening_with_live_streak_fires_streak_nudge() {
        let mut c = ctx();
        c.local_hour = 21;
        c.current_streak = 4;
        assert_eq!(decide(&c).unwrap().kind, NudgeKind::Streak);

        c.local_hour = 23; // outside the window
        assert_eq!(decide(&c), None);
    }

    #[test]
    fn streak_nudge_needs_a_streak_and_an_unlogged_day() {
        let mut c = ctx();
        c.local_hour = 21;
        assert_eq!(decide(&c), None); // streak == 0

        c.current_streak = 2;
        c.has_entry_today = true;
        assert_eq!(decide(&c), None);
    }

    #[test]
    fn at_most_one_nudge_per_tick() {
        // Everything eligible at once: exactly one intent comes out.
        let mut c = ctx();
        c.local_hour = 9;
        c.morning_hour = 9;
        c.evening_hour = 9;
        c.current_streak = 3;
        c.hours_since_last_entry = Some(72);
        let nudge = decide(&c).unwrap();
        assert_eq!(nudge.kind, NudgeKind::Reminder);
    }
}
