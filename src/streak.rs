//! Daily check-in state machine.
//!
//! Pure transition logic; persistence and crediting happen in
//! [`crate::services::checkin`].

use chrono::{Days, NaiveDate};

use crate::model::Streak;

/// Observable streak state as of a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakState {
    /// Never checked in.
    Fresh,
    /// Streak of `n` days that can still be continued today.
    Active(u32),
    /// Last check-in is too old to continue, even with a saver.
    Broken,
}

/// How a check-in changed the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Already checked in today (or the request is for a day before the
    /// last check-in). Nothing changes.
    Unchanged,
    /// First ever check-in.
    Started,
    /// Checked in the day after the last check-in.
    Continued,
    /// One day was missed and a streak saver covered it.
    Saved,
    /// Gap too large, streak restarts at 1.
    Reset,
}

impl TransitionKind {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub streak: Streak,
}

fn days_before(day: NaiveDate, n: u64) -> Option<NaiveDate> {
    day.checked_sub_days(Days::new(n))
}

/// Classify `streak` as seen on `today`.
pub fn state_on(streak: &Streak, today: NaiveDate) -> StreakState {
    let Some(last) = streak.last_checkin_date else {
        return StreakState::Fresh;
    };
    if last >= today || Some(last) == days_before(today, 1) {
        return StreakState::Active(streak.current_streak);
    }
    if Some(last) == days_before(today, 2) && streak.streak_savers > 0 {
        return StreakState::Active(streak.current_streak);
    }
    StreakState::Broken
}

/// Apply a check-in on `today`.
pub fn check_in(current: &Streak, today: NaiveDate) -> Transition {
    let mut next = current.clone();

    let kind = match current.last_checkin_date {
        Some(last) if last >= today => {
            return Transition {
                kind: TransitionKind::Unchanged,
                streak: next,
            };
        }
        None => {
            next.current_streak = 1;
            TransitionKind::Started
        }
        Some(last) if Some(last) == days_before(today, 1) => {
            next.current_streak = current.current_streak.saturating_add(1);
            TransitionKind::Continued
        }
        Some(last) if Some(last) == days_before(today, 2) && current.streak_savers > 0 => {
            next.streak_savers -= 1;
            next.current_streak = current.current_streak.saturating_add(1);
            TransitionKind::Saved
        }
        Some(_) => {
            next.current_streak = 1;
            TransitionKind::Reset
        }
    };

    next.longest_streak = next.longest_streak.max(next.current_streak);
    next.last_checkin_date = Some(today);

    Transition { kind, streak: next }
}
