use crate::domain::time::{date_ranges_overlap, weekday_index, DateRange, LAST_MINUTE_OF_DAY};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const ONCE: &str = "once";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    #[default]
    Shield,
    Focus,
}

/// Recurrence of a plan: a single-fire window or a set of weekdays
/// (0 = Sunday ... 6 = Saturday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Weekdays(Vec<u8>),
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Weekdays(Vec::new())
    }
}

impl Repeat {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(ONCE) {
            return Self::Once;
        }
        Self::Weekdays(normalize_weekdays(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .filter_map(|part| part.parse::<i64>().ok()),
        ))
    }

    fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(raw) => Self::parse(raw),
            serde_json::Value::Array(items) => Self::Weekdays(normalize_weekdays(
                items.iter().filter_map(|item| match item {
                    serde_json::Value::Number(number) => number.as_i64(),
                    serde_json::Value::String(text) => text.trim().parse::<i64>().ok(),
                    _ => None,
                }),
            )),
            _ => Self::default(),
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }

    pub fn weekdays(&self) -> &[u8] {
        match self {
            Self::Once => &[],
            Self::Weekdays(days) => days,
        }
    }

    pub fn includes(&self, weekday: u8) -> bool {
        self.weekdays().contains(&weekday)
    }

    pub fn to_form_value(&self) -> String {
        match self {
            Self::Once => ONCE.to_string(),
            Self::Weekdays(days) => days
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

fn normalize_weekdays(days: impl Iterator<Item = i64>) -> Vec<u8> {
    days.filter(|day| (0..=6).contains(day))
        .map(|day| day as u8)
        .collect()
}

impl Serialize for Repeat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Once => serializer.serialize_str(ONCE),
            Self::Weekdays(days) => days.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Repeat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    pub start_min: u16,
    pub end_min: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<u32>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub mode: PlanMode,
    #[serde(default)]
    pub apps: Vec<String>,
}

impl Plan {
    pub fn from_times(
        id: impl Into<String>,
        start: &str,
        end: &str,
        repeat: Repeat,
        mode: PlanMode,
    ) -> Result<Self, String> {
        let start_min = parse_hhmm_minutes(start).ok_or_else(|| "plan.start must be HH:MM".to_string())?;
        let end_min = parse_hhmm_minutes(end).ok_or_else(|| "plan.end must be HH:MM".to_string())?;
        Ok(Self {
            id: id.into(),
            name: None,
            start: start.trim().to_string(),
            end: end.trim().to_string(),
            start_min,
            end_min,
            start_sec: None,
            end_sec: None,
            start_date: None,
            end_date: None,
            repeat,
            mode,
            apps: Vec::new(),
        })
    }

    pub fn once_starting_at(
        now: NaiveDateTime,
        id: impl Into<String>,
        minutes: u16,
        mode: PlanMode,
    ) -> Result<Self, String> {
        if minutes == 0 {
            return Err("plan duration must be at least one minute".to_string());
        }
        let start_min = (now.hour() * 60 + now.minute()) as u16;
        let end_min = start_min
            .checked_add(minutes)
            .filter(|end_min| *end_min <= LAST_MINUTE_OF_DAY)
            .ok_or_else(|| "one-time plan must end before midnight".to_string())?;
        let start_sec = u32::from(start_min) * 60 + now.second();
        let mut plan = Self::from_times(
            id,
            &format_hhmm(start_min),
            &format_hhmm(end_min),
            Repeat::Once,
            mode,
        )?;
        plan.name = Some("Quick start".to_string());
        plan.start_sec = Some(start_sec);
        plan.end_sec = Some(start_sec + u32::from(minutes) * 60);
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_hhmm(&self.start, "plan.start")?;
        validate_hhmm(&self.end, "plan.end")?;
        if self.start_min > LAST_MINUTE_OF_DAY || self.end_min > LAST_MINUTE_OF_DAY {
            return Err("plan.start_min and plan.end_min must be within 0..=1439".to_string());
        }
        if parse_hhmm_minutes(&self.start) != Some(self.start_min) {
            return Err("plan.start_min does not match plan.start".to_string());
        }
        if parse_hhmm_minutes(&self.end) != Some(self.end_min) {
            return Err("plan.end_min does not match plan.end".to_string());
        }
        if self.start_min >= self.end_min {
            return Err(
                "plan.end_min must be after plan.start_min (windows crossing midnight are unsupported)"
                    .to_string(),
            );
        }
        if let (Some(start_date), Some(end_date)) = (self.start_date, self.end_date) {
            if start_date > end_date {
                return Err("plan.start_date must be <= plan.end_date".to_string());
            }
        }
        if self.is_once() {
            validate_non_empty(&self.id, "plan.id")?;
            if let (Some(start_sec), Some(end_sec)) = (self.start_sec, self.end_sec) {
                if end_sec <= start_sec {
                    return Err("plan.end_sec must be after plan.start_sec".to_string());
                }
            }
        }
        Ok(())
    }

    pub fn is_once(&self) -> bool {
        self.repeat.is_once()
    }

    /// Half-open membership test: `[start_min, end_min)`.
    pub fn contains_minute(&self, minute: u16) -> bool {
        self.start_min <= minute && minute < self.end_min
    }

    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            _ => None,
        }
    }

    pub fn applies_on(&self, date: NaiveDate) -> bool {
        if self.is_once() {
            return true;
        }
        self.repeat.includes(weekday_index(date))
            && date_ranges_overlap(self.start_date, self.end_date, Some(date), Some(date))
    }

    pub fn duration_minutes(&self) -> i32 {
        i32::from(self.end_min) - i32::from(self.start_min)
    }

    pub fn effective_range(&self) -> EffectiveRange {
        let (start, end) = if self.is_once() {
            (
                self.start_sec.unwrap_or(u32::from(self.start_min) * 60),
                self.end_sec.unwrap_or(u32::from(self.end_min) * 60),
            )
        } else {
            (u32::from(self.start_min) * 60, u32::from(self.end_min) * 60)
        };
        EffectiveRange {
            id: self.id.clone(),
            start,
            end,
            duration: self.duration_minutes(),
            repeat: self.repeat.clone(),
            mode: self.mode,
        }
    }
}

/// One entry of the schedule handed to the native enforcement layer.
/// `start`/`end` are seconds of day, `duration` is minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectiveRange {
    pub id: String,
    pub start: u32,
    pub end: u32,
    pub duration: i32,
    pub repeat: Repeat,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlanForm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start: String,
    pub end: String,
    pub start_min: u16,
    pub end_min: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub repeat: String,
    pub mode: PlanMode,
    pub apps: Vec<String>,
}

impl From<&Plan> for PlanForm {
    fn from(plan: &Plan) -> Self {
        Self {
            id: Some(plan.id.trim())
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned),
            name: plan.name.clone(),
            start: plan.start.clone(),
            end: plan.end.clone(),
            start_min: plan.start_min,
            end_min: plan.end_min,
            start_date: plan.start_date,
            end_date: plan.end_date,
            repeat: plan.repeat.to_form_value(),
            mode: plan.mode,
            apps: plan.apps.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    RecurringFirst,
    OnceFirst,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResolvePolicy {
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default)]
    pub respect_weekdays: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct PlanSnapshot {
    pub current_plan: Option<Plan>,
    pub next_plan: Option<Plan>,
    pub elapsed_minutes: u32,
    pub purged_plan_ids: Vec<String>,
}

fn format_hhmm(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub fn parse_hhmm_minutes(value: &str) -> Option<u16> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour = hour.parse::<u16>().ok()?;
    let minute = minute.parse::<u16>().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}
