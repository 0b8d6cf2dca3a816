use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{PhaseCurrents, RawPriceData};

/// A state-of-charge value together with the time the vehicle reported it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocReading {
    pub percent: f64,
    pub reported_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<FixedOffset>,
}

/// Read side of the host platform.
///
/// `Ok(None)` means the entity is known but currently unavailable; `Err`
/// means the read itself failed. Both degrade to `MissingInput`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorReader: Send + Sync {
    async fn read_soc(&self) -> Result<Option<SocReading>>;
    async fn read_plugged(&self) -> Result<Option<bool>>;
    async fn read_grid_current(&self) -> Result<Option<PhaseCurrents>>;
    /// Dedicated charger current sensors; `None` when not installed
    async fn read_charger_current(&self) -> Result<Option<PhaseCurrents>>;
    async fn read_prices(&self) -> Result<Option<RawPriceData>>;
    /// Events starting within the next 24 hours
    async fn read_calendar_events(&self) -> Result<Vec<CalendarEvent>>;
    /// Ask the vehicle to report its SoC now. The new value arrives through
    /// `read_soc` on a later cycle.
    async fn request_soc_refresh(&self) -> Result<()>;
}

/// How often the vehicle is asked for a fresh SoC while connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SocRefreshPolicy {
    #[default]
    #[serde(rename = "never")]
    #[strum(serialize = "never")]
    Never,
    #[serde(rename = "30m")]
    #[strum(serialize = "30m")]
    Every30Minutes,
    #[serde(rename = "1h")]
    #[strum(serialize = "1h")]
    EveryHour,
    #[serde(rename = "2h")]
    #[strum(serialize = "2h")]
    Every2Hours,
    #[serde(rename = "3h")]
    #[strum(serialize = "3h")]
    Every3Hours,
    #[serde(rename = "4h")]
    #[strum(serialize = "4h")]
    Every4Hours,
    /// Once the estimate claims the target is reached, at most every 12 h
    #[serde(rename = "at_target")]
    #[strum(serialize = "at_target")]
    AtTarget,
}

impl SocRefreshPolicy {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SocRefreshPolicy::Never => None,
            SocRefreshPolicy::Every30Minutes => Some(Duration::minutes(30)),
            SocRefreshPolicy::EveryHour => Some(Duration::hours(1)),
            SocRefreshPolicy::Every2Hours => Some(Duration::hours(2)),
            SocRefreshPolicy::Every3Hours => Some(Duration::hours(3)),
            SocRefreshPolicy::Every4Hours => Some(Duration::hours(4)),
            SocRefreshPolicy::AtTarget => Some(Duration::hours(12)),
        }
    }

    /// Whether a refresh should be requested now.
    pub fn is_due(
        &self,
        last_request: Option<DateTime<FixedOffset>>,
        now: DateTime<FixedOffset>,
        soc_virtual: f64,
        target_soc: f64,
    ) -> bool {
        let Some(interval) = self.interval() else {
            return false;
        };
        let elapsed = last_request.map_or(true, |at| now - at > interval);
        match self {
            SocRefreshPolicy::AtTarget => elapsed && soc_virtual >= target_soc,
            _ => elapsed,
        }
    }
}

/// Parse a free-form plug-state value as reported by vehicle integrations.
pub fn parse_plug_state(raw: &str) -> Option<bool> {
    let normalized = raw.trim().to_lowercase();
    match normalized.as_str() {
        "on" | "true" | "connected" | "charging" | "full" | "plugged_in" | "plugged" | "yes"
        | "y" | "1" => Some(true),
        "off" | "false" | "disconnected" | "unplugged" | "no" | "n" | "0" => Some(false),
        "unknown" | "unavailable" | "" => None,
        other => other.parse::<f64>().ok().map(|v| v > 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("on", Some(true))]
    #[case(" Connected ", Some(true))]
    #[case("plugged_in", Some(true))]
    #[case("OFF", Some(false))]
    #[case("disconnected", Some(false))]
    #[case("unavailable", None)]
    #[case("1.0", Some(true))]
    #[case("0.0", Some(false))]
    #[case("garbage", None)]
    fn test_parse_plug_state(#[case] raw: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_plug_state(raw), expected);
    }

    fn at(minutes: i64) -> DateTime<FixedOffset> {
        let t0 = DateTime::parse_from_rfc3339("2025-01-15T22:00:00+01:00").unwrap();
        t0 + Duration::minutes(minutes)
    }

    #[rstest]
    #[case(SocRefreshPolicy::Never, None, 0, false)]
    #[case(SocRefreshPolicy::Every30Minutes, None, 0, true)]
    #[case(SocRefreshPolicy::Every30Minutes, Some(0), 30, false)]
    #[case(SocRefreshPolicy::Every30Minutes, Some(0), 31, true)]
    #[case(SocRefreshPolicy::Every4Hours, Some(0), 200, false)]
    #[case(SocRefreshPolicy::Every4Hours, Some(0), 241, true)]
    fn test_refresh_interval(
        #[case] policy: SocRefreshPolicy,
        #[case] last: Option<i64>,
        #[case] now: i64,
        #[case] due: bool,
    ) {
        assert_eq!(policy.is_due(last.map(at), at(now), 50.0, 80.0), due);
    }

    #[test]
    fn test_refresh_at_target_waits_for_estimate() {
        let policy = SocRefreshPolicy::AtTarget;
        assert!(!policy.is_due(None, at(0), 70.0, 80.0));
        assert!(policy.is_due(None, at(0), 80.0, 80.0));
        assert!(!policy.is_due(Some(at(0)), at(60), 85.0, 80.0));
    }

    #[test]
    fn test_refresh_policy_names() {
        let policy: SocRefreshPolicy = serde_json::from_str("\"2h\"").unwrap();
        assert_eq!(policy, SocRefreshPolicy::Every2Hours);
        assert_eq!(SocRefreshPolicy::AtTarget.to_string(), "at_target");
    }
}
