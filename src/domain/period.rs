use crate::domain::models::Plan;
use crate::domain::time::{date_ranges_overlap, weekday_index, DateRange};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    All,
    Today,
    Week,
    Month,
}

impl FromStr for Period {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown period '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodWindow {
    pub range: DateRange,
    pub match_days: Vec<u8>,
}

impl Period {
    /// `None` for [`Period::All`], which is not date-bounded.
    pub fn window(self, today: NaiveDate) -> Option<PeriodWindow> {
        match self {
            Self::All => None,
            Self::Today => Some(PeriodWindow {
                range: DateRange::single(today),
                match_days: vec![weekday_index(today)],
            }),
            Self::Week => {
                let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
                Some(PeriodWindow {
                    range: DateRange::new(monday, monday + Duration::days(6)),
                    match_days: (0..7).collect(),
                })
            }
            Self::Month => Some(PeriodWindow {
                range: month_bounds(today),
                match_days: Vec::new(),
            }),
        }
    }
}

fn month_bounds(today: NaiveDate) -> DateRange {
    let first = today.with_day(1).unwrap_or(today);
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    let last = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next_first| next_first.pred_opt())
        .unwrap_or(today);
    DateRange::new(first, last)
}

pub fn plans_for_period(plans: &[Plan], period: Period, today: NaiveDate) -> Vec<Plan> {
    let window = period.window(today);
    plans
        .iter()
        .filter(|plan| !plan.is_once())
        .filter(|plan| match &window {
            Some(window) => matches_window(plan, window),
            None => true,
        })
        .cloned()
        .collect()
}

fn matches_window(plan: &Plan, window: &PeriodWindow) -> bool {
    if !date_ranges_overlap(
        plan.start_date,
        plan.end_date,
        Some(window.range.start),
        Some(window.range.end),
    ) {
        return false;
    }

    if window.match_days.is_empty() {
        return window
            .range
            .days()
            .any(|day| plan.repeat.includes(weekday_index(day)));
    }
    window.match_days.iter().any(|day| plan.repeat.includes(*day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PlanMode, Repeat};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn plan(id: &str, repeat: Repeat) -> Plan {
        Plan::from_times(id, "09:00", "10:00", repeat, PlanMode::Shield).expect("valid plan")
    }

    #[test]
    fn period_parses_keywords() {
        assert_eq!("today".parse::<Period>(), Ok(Period::Today));
        assert_eq!(" Week ".parse::<Period>(), Ok(Period::Week));
        assert_eq!("".parse::<Period>(), Ok(Period::All));
        assert!("year".parse::<Period>().is_err());
    }

    #[test]
    fn today_on_wednesday_keeps_matching_weekday_only() {
        let plans = vec![
            plan("weekday", Repeat::Weekdays(vec![1, 3, 5])),
            plan("weekend", Repeat::Weekdays(vec![0, 6])),
        ];
        let filtered = plans_for_period(&plans, Period::Today, date("2026-10-21"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "weekday");
    }

    #[test]
    fn once_plans_are_excluded_from_every_period() {
        let plans = vec![plan("once", Repeat::Once), plan("daily", Repeat::Weekdays((0..7).collect()))];
        for period in [Period::All, Period::Today, Period::Week, Period::Month] {
            let filtered = plans_for_period(&plans, period, date("2026-10-21"));
            assert_eq!(filtered.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["daily"]);
        }
    }

    #[test]
    fn week_window_is_monday_anchored() {
        let window = Period::Week.window(date("2026-10-25")).expect("week window");
        assert_eq!(window.range, DateRange::new(date("2026-10-19"), date("2026-10-25")));
        assert_eq!(window.match_days.len(), 7);

        let window = Period::Week.window(date("2026-10-19")).expect("week window");
        assert_eq!(window.range.start, date("2026-10-19"));
    }

    #[test]
    fn week_drops_plans_outside_date_bounds_and_without_days() {
        let mut bounded = plan("bounded", Repeat::Weekdays(vec![2]));
        bounded.start_date = Some(date("2026-11-01"));
        bounded.end_date = Some(date("2026-11-30"));
        let plans = vec![bounded, plan("empty", Repeat::Weekdays(Vec::new())), plan("tue", Repeat::Weekdays(vec![2]))];

        let filtered = plans_for_period(&plans, Period::Week, date("2026-10-21"));
        assert_eq!(filtered.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["tue"]);
    }

    #[test]
    fn month_window_covers_calendar_month() {
        let window = Period::Month.window(date("2024-02-10")).expect("month window");
        assert_eq!(window.range, DateRange::new(date("2024-02-01"), date("2024-02-29")));
        assert!(window.match_days.is_empty());

        let december = Period::Month.window(date("2026-12-31")).expect("month window");
        assert_eq!(december.range, DateRange::new(date("2026-12-01"), date("2026-12-31")));
    }

    #[test]
    fn month_checks_weekdays_inside_overlapping_days() {
        let mut short = plan("short", Repeat::Weekdays(vec![6]));
        short.start_date = Some(date("2026-02-01"));
        short.end_date = Some(date("2026-02-03"));
        let plans = vec![short, plan("sunday", Repeat::Weekdays(vec![0]))];

        let filtered = plans_for_period(&plans, Period::Month, date("2026-02-15"));
        // The month contains Saturdays, so the date-bounded plan is kept too.
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, "short");
    }

    #[test]
    fn all_returns_every_recurring_plan_in_order() {
        let plans = vec![
            plan("b", Repeat::Weekdays(Vec::new())),
            plan("a", Repeat::Weekdays(vec![1])),
        ];
        let filtered = plans_for_period(&plans, Period::All, date("2026-10-21"));
        assert_eq!(filtered.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
