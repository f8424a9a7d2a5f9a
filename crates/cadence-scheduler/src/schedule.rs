use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::types::{DaysOfWeek, Schedule};

/// Width of the firing window after a time-of-day target. Also the minimum
/// gap between two time-of-day runs, so a job fires once per window.
pub const TIME_OF_DAY_WINDOW_SECS: i64 = 60;

/// Decide whether a job is due at `now`.
///
/// `last_execution` is whatever the caller measures against: the shared
/// registry timestamp, or this process's own last start for per-server jobs.
/// Forced runs never call this.
pub fn is_due(
    schedule: &Schedule,
    days: DaysOfWeek,
    last_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if !days.contains(now.weekday()) {
        return false;
    }

    match schedule {
        Schedule::Interval { every } => {
            let Some(last) = last_execution else {
                return true;
            };
            // An interval too large for chrono is never due again.
            let Ok(every) = Duration::from_std(*every) else {
                return false;
            };
            now - last >= every
        }

        Schedule::TimeOfDay { at, timezone } => {
            let Some(target) = target_instant(*at, *timezone, now) else {
                debug!(%at, "local time skipped by a DST transition; not due today");
                return false;
            };
            let window = Duration::seconds(TIME_OF_DAY_WINDOW_SECS);
            let in_window = now >= target && now < target + window;
            let fired_recently = last_execution.is_some_and(|last| now - last <= window);
            in_window && !fired_recently
        }
    }
}

/// Today's firing instant for a time-of-day schedule, in UTC.
///
/// With a timezone, "today" is the local date at `now` and the wall-clock
/// time is converted through the zone so daylight saving is honoured. An
/// ambiguous local time (clocks going back) resolves to its first
/// occurrence; a non-existent one (clocks going forward) yields `None`.
pub fn target_instant(at: NaiveTime, timezone: Option<Tz>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match timezone {
        None => Some(now.date_naive().and_time(at).and_utc()),
        Some(tz) => {
            let local_date = now.with_timezone(&tz).date_naive();
            tz.from_local_datetime(&local_date.and_time(at))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}
