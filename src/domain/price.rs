use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// One fixed-duration interval with a spot price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSlot {
    pub start: DateTime<FixedOffset>,
    pub duration_minutes: i64,
    pub price: f64,
}

impl PriceSlot {
    pub fn new(start: DateTime<FixedOffset>, duration_minutes: i64, price: f64) -> Self {
        Self {
            start,
            duration_minutes,
            price,
        }
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.start + Duration::minutes(self.duration_minutes)
    }

    pub fn contains(&self, t: DateTime<FixedOffset>) -> bool {
        t >= self.start && t < self.end()
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_minutes as f64 / 60.0
    }

    /// Hours of this slot that fall inside `[from, until)`.
    pub fn usable_hours(&self, from: DateTime<FixedOffset>, until: DateTime<FixedOffset>) -> f64 {
        let start = self.start.max(from);
        let end = self.end().min(until);
        if end <= start {
            return 0.0;
        }
        (end - start).num_seconds() as f64 / 3600.0
    }
}

/// Price attributes as published by a price sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPriceData {
    pub today: Vec<f64>,
    #[serde(default)]
    pub tomorrow: Option<Vec<f64>>,
    #[serde(default)]
    pub tomorrow_valid: bool,
}

impl RawPriceData {
    pub fn today_only(today: Vec<f64>) -> Self {
        Self {
            today,
            tomorrow: None,
            tomorrow_valid: false,
        }
    }

    pub fn with_tomorrow(today: Vec<f64>, tomorrow: Vec<f64>) -> Self {
        Self {
            today,
            tomorrow: Some(tomorrow),
            tomorrow_valid: true,
        }
    }

    /// Tomorrow's list, if present, non-empty and flagged valid.
    pub fn usable_tomorrow(&self) -> Option<&[f64]> {
        match &self.tomorrow {
            Some(list) if self.tomorrow_valid && !list.is_empty() => Some(list.as_slice()),
            _ => None,
        }
    }
}
