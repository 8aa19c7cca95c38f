use std::time::Duration;

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};

/// Wait before recomputing when the next run cannot be placed in local time
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Step and bound used to walk out of a DST gap
const GAP_STEP_MINUTES: i64 = 15;
const MAX_GAP_STEPS: i64 = 12;

/// Commands accepted by the auto-backup task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleCommand {
    /// Run one backup cycle immediately, then keep the monthly schedule
    RunNow,
    /// Stop the task
    Shutdown,
}

/// Midnight on the first day of the month after `after`
pub fn next_monthly_run(after: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if after.month() == 12 {
        (after.year() + 1, 1)
    } else {
        (after.year(), after.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// First instant at or after the wall-clock time `naive` that exists
///
/// A time inside a DST gap moves forward to the end of the gap.
fn resolve_forward<Tz: TimeZone>(
    naive: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> LocalResult<DateTime<Tz>>,
) -> Option<DateTime<Tz>> {
    (0..=MAX_GAP_STEPS).find_map(|step| {
        let candidate = naive + chrono::Duration::minutes(step * GAP_STEP_MINUTES);
        resolve(&candidate).earliest()
    })
}

/// Instant of the next monthly run in local time
pub fn next_run_at(now: &DateTime<Local>) -> Option<DateTime<Local>> {
    let next = next_monthly_run(now.naive_local())?;
    resolve_forward(next, |t| Local.from_local_datetime(t))
}

/// Time to sleep from `now` until the next monthly run
///
/// `None` when the run cannot be placed; the caller waits and recomputes
/// instead of running a cycle.
pub fn delay_until_next_run(now: DateTime<Local>) -> Option<Duration> {
    let next = next_run_at(&now)?;
    (next - now).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_next_run_is_first_of_next_month() {
        assert_eq!(next_monthly_run(at(2024, 3, 15, 9, 30)), Some(at(2024, 4, 1, 0, 0)));
        assert_eq!(next_monthly_run(at(2024, 1, 31, 23, 59)), Some(at(2024, 2, 1, 0, 0)));
    }

    #[test]
    fn test_next_run_wraps_year() {
        assert_eq!(next_monthly_run(at(2024, 12, 5, 0, 0)), Some(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn test_exactly_on_boundary_moves_to_next_month() {
        assert_eq!(next_monthly_run(at(2024, 6, 1, 0, 0)), Some(at(2024, 7, 1, 0, 0)));
    }

    #[test]
    fn test_midnight_in_dst_gap_moves_to_gap_end() {
        use chrono::FixedOffset;

        let utc = FixedOffset::east_opt(0).unwrap();
        let gap_start = at(2024, 4, 1, 0, 0);
        let gap_end = at(2024, 4, 1, 1, 0);
        let resolve = |t: &NaiveDateTime| {
            if *t >= gap_start && *t < gap_end {
                LocalResult::None
            } else {
                utc.from_local_datetime(t)
            }
        };

        let resolved = resolve_forward(gap_start, resolve).unwrap();
        assert_eq!(resolved.naive_local(), gap_end);
    }

    #[test]
    fn test_unresolvable_time_yields_none() {
        let resolved = resolve_forward(at(2024, 4, 1, 0, 0), |_| {
            LocalResult::<DateTime<Local>>::None
        });
        assert!(resolved.is_none());
    }

    #[test]
    fn test_delay_is_positive_and_bounded() {
        let delay = delay_until_next_run(Local::now()).unwrap();
        assert!(delay > Duration::ZERO);
        assert!(delay <= Duration::from_secs(32 * 24 * 3600));
    }
}
