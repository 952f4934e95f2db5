use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

pub const LAST_MINUTE_OF_DAY: u16 = 1439;

pub type NowProvider = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn local_now_provider(timezone: Option<Tz>) -> NowProvider {
    match timezone {
        Some(timezone) => Arc::new(move || Utc::now().with_timezone(&timezone).naive_local()),
        None => Arc::new(|| Local::now().naive_local()),
    }
}

/// Minutes since midnight. With `round_up`, any elapsed seconds count as a
/// started minute; the result never exceeds 1439.
pub fn minute_of_day(time: NaiveTime, round_up: bool) -> u16 {
    let minute = (time.hour() * 60 + time.minute()) as u16;
    if round_up && time.second() > 0 {
        return (minute + 1).min(LAST_MINUTE_OF_DAY);
    }
    minute
}

pub fn current_minute(now_provider: &NowProvider, round_up: bool) -> u16 {
    minute_of_day(now_provider().time(), round_up)
}

pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        std::iter::successors(Some(self.start), |day| day.succ_opt())
            .take_while(|day| *day <= self.end)
    }
}

/// Day-granularity overlap. A range with a missing bound is unrestricted and
/// overlaps everything.
pub fn date_ranges_overlap(
    a_start: Option<NaiveDate>,
    a_end: Option<NaiveDate>,
    b_start: Option<NaiveDate>,
    b_end: Option<NaiveDate>,
) -> bool {
    match (a_start, a_end, b_start, b_end) {
        (Some(a_start), Some(a_end), Some(b_start), Some(b_end)) => {
            DateRange::new(a_start, a_end).overlaps(&DateRange::new(b_start, b_end))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn time(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).expect("valid time")
    }

    #[test]
    fn minute_of_day_rounds_up_started_minutes() {
        assert_eq!(minute_of_day(time(8, 30, 0), false), 510);
        assert_eq!(minute_of_day(time(8, 30, 0), true), 510);
        assert_eq!(minute_of_day(time(8, 30, 1), false), 510);
        assert_eq!(minute_of_day(time(8, 30, 1), true), 511);
    }

    #[test]
    fn minute_of_day_round_up_clamps_at_end_of_day() {
        assert_eq!(minute_of_day(time(23, 59, 30), true), LAST_MINUTE_OF_DAY);
    }

    #[test]
    fn current_minute_reads_the_injected_clock() {
        let now = date("2026-10-21").and_time(time(23, 59, 30));
        let clock: NowProvider = Arc::new(move || now);
        assert_eq!(current_minute(&clock, false), 1439);
        assert_eq!(current_minute(&clock, true), LAST_MINUTE_OF_DAY);

        let now = date("2026-10-21").and_time(time(9, 15, 1));
        let clock: NowProvider = Arc::new(move || now);
        assert_eq!(current_minute(&clock, true), 556);
        assert!(current_minute(&local_now_provider(None), true) <= LAST_MINUTE_OF_DAY);
    }

    #[test]
    fn configured_timezone_drives_the_clock() {
        let shanghai = local_now_provider(Some(chrono_tz::Asia::Shanghai));
        let expected = Utc::now().with_timezone(&chrono_tz::Asia::Shanghai).naive_local();
        let drift = (shanghai() - expected).num_seconds().abs();
        assert!(drift < 5);
    }

    #[test]
    fn weekday_index_is_sunday_based() {
        assert_eq!(weekday_index(date("2026-02-01")), 0);
        assert_eq!(weekday_index(date("2026-10-21")), 3);
        assert_eq!(weekday_index(date("2026-02-28")), 6);
    }

    #[test]
    fn undefined_ranges_always_overlap() {
        assert!(date_ranges_overlap(None, None, Some(date("2026-01-01")), Some(date("2026-01-01"))));
        assert!(date_ranges_overlap(Some(date("2020-01-01")), None, Some(date("2026-01-01")), Some(date("2026-01-31"))));
    }

    #[test]
    fn ranges_touching_on_a_day_overlap() {
        let a = (Some(date("2026-03-01")), Some(date("2026-03-10")));
        assert!(date_ranges_overlap(a.0, a.1, Some(date("2026-03-10")), Some(date("2026-03-20"))));
        assert!(!date_ranges_overlap(a.0, a.1, Some(date("2026-03-11")), Some(date("2026-03-20"))));
        assert!(!date_ranges_overlap(a.0, a.1, Some(date("2026-02-01")), Some(date("2026-02-28"))));
    }

    #[test]
    fn days_iterates_inclusive_range() {
        let range = DateRange::new(date("2024-02-27"), date("2024-03-01"));
        let days = range.days().collect::<Vec<_>>();
        assert_eq!(days.len(), 4);
        assert_eq!(days[2], date("2024-02-29"));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in 0i64..60, a_len in 0i64..30, b in 0i64..60, b_len in 0i64..30) {
            let base = date("2026-01-01");
            let a_start = base + chrono::Duration::days(a);
            let a_end = a_start + chrono::Duration::days(a_len);
            let b_start = base + chrono::Duration::days(b);
            let b_end = b_start + chrono::Duration::days(b_len);
            prop_assert_eq!(
                date_ranges_overlap(Some(a_start), Some(a_end), Some(b_start), Some(b_end)),
                date_ranges_overlap(Some(b_start), Some(b_end), Some(a_start), Some(a_end))
            );
        }
    }
}
