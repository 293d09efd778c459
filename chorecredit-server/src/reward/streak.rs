//! Consecutive-day completion streaks.

use std::collections::HashSet;

use chrono::{Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use chorecredit_shared::domain::SubmissionStatus;
use diesel::prelude::*;

use crate::storage::StorageError;
use crate::storage::schema::submissions::dsl as s;

/// How far back the walk goes, in days.
pub const MAX_LOOKBACK_DAYS: u64 = 365;

/// Count consecutive days with at least one approved submission, walking
/// backward from `today`. Today itself having no approval yet does not
/// break the run; it is simply not counted. Any earlier empty day ends the
/// walk.
pub fn streak_from_days(days: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut streak = 0;
    for i in 0..MAX_LOOKBACK_DAYS {
        let Some(day) = today.checked_sub_days(Days::new(i)) else {
            break;
        };
        if days.contains(&day) {
            streak += 1;
        } else if i == 0 {
            continue; // today may simply have no completion yet
        } else {
            break;
        }
    }
    streak
}

/// Current streak for a child, with days evaluated in the family's local
/// timezone.
pub fn current_streak(
    conn: &mut SqliteConnection,
    child_id: &str,
    tz: Tz,
) -> Result<u32, StorageError> {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let cutoff = Utc::now().naive_utc() - chrono::Duration::days(MAX_LOOKBACK_DAYS as i64 + 1);
    let stamps: Vec<chrono::NaiveDateTime> = s::submissions
        .filter(s::child_id.eq(child_id))
        .filter(s::status.eq(SubmissionStatus::Approved.as_str()))
        .filter(s::created_at.ge(cutoff))
        .select(s::created_at)
        .load(conn)?;
    let days: HashSet<NaiveDate> = stamps
        .into_iter()
        .map(|ndt| Utc.from_utc_datetime(&ndt).with_timezone(&tz).date_naive())
        .collect();
    Ok(streak_from_days(&days, today))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_history_has_no_streak() {
        assert_eq!(streak_from_days(&HashSet::new(), date(2026, 3, 10)), 0);
    }

    #[test]
    fn today_counts_when_present() {
        let days = [date(2026, 3, 10), date(2026, 3, 9)].into_iter().collect();
        assert_eq!(streak_from_days(&days, date(2026, 3, 10)), 2);
    }

    #[test]
    fn missing_today_does_not_break_the_run() {
        // Approved on D-1 and D-2, nothing yet on D: streak is 2, not 0.
        let days = [date(2026, 3, 9), date(2026, 3, 8)].into_iter().collect();
        assert_eq!(streak_from_days(&days, date(2026, 3, 10)), 2);
    }

    #[test]
    fn gap_before_yesterday_ends_the_walk() {
        let days = [date(2026, 3, 9), date(2026, 3, 7)].into_iter().collect();
        assert_eq!(streak_from_days(&days, date(2026, 3, 10)), 1);
    }

    #[test]
    fn missing_yesterday_breaks_even_with_today_present() {
        let days = [date(2026, 3, 10), date(2026, 3, 8)].into_iter().collect();
        assert_eq!(streak_from_days(&days, date(2026, 3, 10)), 1);
    }
}
