//! Goal resolution: standard defaults, calendar events and manual overrides.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::{CalendarEvent, GoalSource, SessionGoal, SessionOverride};

/// How far ahead calendar events are considered
pub const CALENDAR_LOOKAHEAD_HOURS: i64 = 24;

const CALENDAR_TARGET_RANGE: std::ops::RangeInclusive<u32> = 10..=100;

/// Deadline and optional target taken from a calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarGoal {
    pub title: String,
    pub deadline: DateTime<FixedOffset>,
    pub target_soc: Option<f64>,
}

/// Next occurrence of `departure` strictly after `now`, in `tz`.
pub fn standard_deadline(
    now: DateTime<FixedOffset>,
    departure: NaiveTime,
    tz: Tz,
) -> DateTime<FixedOffset> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = local_at(tz, date, departure) {
            if candidate > now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now + Duration::days(1)
}

/// Resolve a local wall-clock time, stepping forward out of a DST gap.
fn local_at(tz: Tz, date: chrono::NaiveDate, time: NaiveTime) -> Option<DateTime<FixedOffset>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.fixed_offset())
}

/// First `NN%` token in `text`, accepted only when NN is within 10..=100.
pub fn parse_target_percent(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let digits = &text[start..i];
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'%' {
            return digits
                .parse::<u32>()
                .ok()
                .filter(|v| CALENDAR_TARGET_RANGE.contains(v))
                .map(f64::from);
        }
    }
    None
}

/// Earliest event starting within the lookahead window.
pub fn calendar_goal(events: &[CalendarEvent], now: DateTime<FixedOffset>) -> Option<CalendarGoal> {
    let limit = now + Duration::hours(CALENDAR_LOOKAHEAD_HOURS);
    events
        .iter()
        .filter(|e| e.start >= now && e.start <= limit)
        .min_by_key(|e| e.start)
        .map(|event| CalendarGoal {
            title: event.title.clone(),
            deadline: event.start,
            target_soc: parse_target_percent(&format!("{} {}", event.title, event.description)),
        })
}

/// Pick the active goal. A manual override wins outright; fields it leaves
/// unset come from the standard defaults. A calendar event replaces the
/// standard deadline and, if it names one, the target.
pub fn resolve_goal(
    standard: &SessionGoal,
    calendar: Option<&CalendarGoal>,
    manual: Option<&SessionOverride>,
) -> SessionGoal {
    if let Some(manual) = manual.filter(|m| !m.is_empty()) {
        return SessionGoal {
            target_soc: manual.target_soc.unwrap_or(standard.target_soc),
            deadline: manual.deadline.unwrap_or(standard.deadline),
            source: GoalSource::ManualOverride,
        };
    }
    if let Some(cal) = calendar {
        return SessionGoal {
            target_soc: cal.target_soc.unwrap_or(standard.target_soc),
            deadline: cal.deadline,
            source: GoalSource::Calendar,
        };
    }
    standard.clone()
}
