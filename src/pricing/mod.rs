//! Price model
//!
//! Turns the raw per-day price lists published by a price sensor into one
//! ordered sequence of [`PriceSlot`]s running from the slot that contains
//! "now" to the end of the known horizon.
//!
//! Slot length is inferred from list cardinality. The accepted bands absorb
//! daylight-saving days (23/25 hourly entries, 92/100 quarter-hourly).
//! A list outside both bands is rejected rather than guessed at.

pub mod status;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{PriceSlot, RawPriceData};
use crate::error::PlanningError;

pub use status::PriceStatus;

pub const HOURLY_BAND: RangeInclusive<usize> = 23..=25;
pub const QUARTER_HOURLY_BAND: RangeInclusive<usize> = 92..=100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceError {
    #[error("{day} price list has {len} entries, expected 23-25 or 92-100")]
    InvalidLength { day: &'static str, len: usize },
    #[error("no local midnight for {0} in the configured timezone")]
    NoMidnight(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    QuarterHourly,
}

impl Granularity {
    pub fn from_len(day: &'static str, len: usize) -> Result<Self, PriceError> {
        if HOURLY_BAND.contains(&len) {
            Ok(Granularity::Hourly)
        } else if QUARTER_HOURLY_BAND.contains(&len) {
            Ok(Granularity::QuarterHourly)
        } else {
            Err(PriceError::InvalidLength { day, len })
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Granularity::Hourly => 60,
            Granularity::QuarterHourly => 15,
        }
    }
}

/// Normalized price horizon for one planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHorizon {
    pub slots: Vec<PriceSlot>,
    pub granularity: Option<Granularity>,
    pub includes_tomorrow: bool,
    pub anomalies: Vec<PlanningError>,
}

impl PriceHorizon {
    pub fn empty(anomaly: PlanningError) -> Self {
        Self {
            slots: Vec::new(),
            granularity: None,
            includes_tomorrow: false,
            anomalies: vec![anomaly],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn end(&self) -> Option<DateTime<FixedOffset>> {
        self.slots.last().map(PriceSlot::end)
    }

    pub fn covers(&self, t: DateTime<FixedOffset>) -> bool {
        self.end().is_some_and(|end| end >= t)
    }

    pub fn slot_at(&self, t: DateTime<FixedOffset>) -> Option<&PriceSlot> {
        self.slots.iter().find(|s| s.contains(t))
    }

    pub fn price_at(&self, t: DateTime<FixedOffset>) -> Option<f64> {
        self.slot_at(t).map(|s| s.price)
    }

    pub fn average_price(&self) -> Option<f64> {
        if self.slots.is_empty() {
            return None;
        }
        Some(self.slots.iter().map(|s| s.price).sum::<f64>() / self.slots.len() as f64)
    }
}

/// Builds [`PriceHorizon`]s with day boundaries taken in a fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct PriceModel {
    tz: Tz,
}

impl PriceModel {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn normalize(
        &self,
        raw: Option<&RawPriceData>,
        now: DateTime<FixedOffset>,
    ) -> PriceHorizon {
        let Some(raw) = raw else {
            return PriceHorizon::empty(PlanningError::MissingInput(
                "price data unavailable".to_string(),
            ));
        };
        if raw.today.is_empty() {
            return PriceHorizon::empty(PlanningError::MissingInput(
                "price sensor reported no prices for today".to_string(),
            ));
        }

        let today = now.with_timezone(&self.tz).date_naive();
        let Some(tomorrow) = today.succ_opt() else {
            return PriceHorizon::empty(PlanningError::InvalidPriceData(format!(
                "no calendar day after {today}"
            )));
        };

        let today_slots = match self.day_slots("today", today, &raw.today, now) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "dropping price horizon");
                return PriceHorizon::empty(PlanningError::InvalidPriceData(e.to_string()));
            }
        };

        let mut horizon = PriceHorizon {
            slots: today_slots.slots,
            granularity: Some(today_slots.granularity),
            includes_tomorrow: false,
            anomalies: Vec::new(),
        };

        if let Some(list) = raw.usable_tomorrow() {
            match self.day_slots("tomorrow", tomorrow, list, now) {
                Ok(parsed) => {
                    horizon.slots.extend(parsed.slots);
                    horizon.includes_tomorrow = true;
                }
                Err(e) => {
                    warn!(error = %e, "ignoring tomorrow's prices");
                    horizon
                        .anomalies
                        .push(PlanningError::InvalidPriceData(e.to_string()));
                }
            }
        }

        debug!(
            slots = horizon.slots.len(),
            includes_tomorrow = horizon.includes_tomorrow,
            horizon_end = ?horizon.end(),
            "price horizon normalized"
        );
        horizon
    }

    fn day_slots(
        &self,
        day: &'static str,
        date: NaiveDate,
        prices: &[f64],
        now: DateTime<FixedOffset>,
    ) -> Result<DaySlots, PriceError> {
        let granularity = Granularity::from_len(day, prices.len())?;
        let start_of_day = self.midnight(date)?;
        let next_day = date
            .succ_opt()
            .ok_or(PriceError::NoMidnight(date))
            .and_then(|d| self.midnight(d))?;
        let step = granularity.minutes();

        let slots = prices
            .iter()
            .enumerate()
            .map(|(i, price)| {
                PriceSlot::new(start_of_day + Duration::minutes(step * i as i64), step, *price)
            })
            // a 24-entry list on a 23-hour day must not spill into tomorrow
            .take_while(|slot| slot.start < next_day)
            .filter(|slot| slot.end() > now)
            .collect();

        Ok(DaySlots { slots, granularity })
    }

    fn midnight(&self, date: NaiveDate) -> Result<DateTime<FixedOffset>, PriceError> {
        (0..3)
            .filter_map(|h| date.and_hms_opt(h, 0, 0))
            .find_map(|local| self.tz.from_local_datetime(&local).earliest())
            .map(|dt| dt.fixed_offset())
            .ok_or(PriceError::NoMidnight(date))
    }
}

struct DaySlots {
    slots: Vec<PriceSlot>,
    granularity: Granularity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Stockholm;
    use proptest::prelude::*;
    use rstest::rstest;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        Stockholm
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .fixed_offset()
    }

    fn assert_contiguous(slots: &[PriceSlot]) {
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start, "gap or overlap at {}", pair[1].start);
        }
    }

    #[rstest]
    #[case(23, Granularity::Hourly)]
    #[case(24, Granularity::Hourly)]
    #[case(25, Granularity::Hourly)]
    #[case(92, Granularity::QuarterHourly)]
    #[case(96, Granularity::QuarterHourly)]
    #[case(100, Granularity::QuarterHourly)]
    fn test_granularity_bands(#[case] len: usize, #[case] expected: Granularity) {
        assert_eq!(Granularity::from_len("today", len).unwrap(), expected);
    }

    #[rstest]
    #[case(0)]
    #[case(12)]
    #[case(26)]
    #[case(48)]
    #[case(91)]
    #[case(101)]
    fn test_granularity_rejects_out_of_band(#[case] len: usize) {
        assert!(Granularity::from_len("today", len).is_err());
    }

    #[test]
    fn test_today_starts_at_current_slot() {
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 1, 15, 15, 20);
        let horizon = model.normalize(Some(&RawPriceData::today_only(vec![1.0; 24])), now);

        assert_eq!(horizon.slots.len(), 9); // 15:00 .. 23:00
        assert_eq!(horizon.slots[0].start, local(2025, 1, 15, 15, 0));
        assert_eq!(horizon.end(), Some(local(2025, 1, 16, 0, 0)));
        assert!(!horizon.includes_tomorrow);
        assert!(horizon.anomalies.is_empty());
    }

    #[test]
    fn test_tomorrow_extends_horizon() {
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 1, 15, 15, 0);
        let raw = RawPriceData::with_tomorrow(vec![1.0; 96], vec![2.0; 96]);
        let horizon = model.normalize(Some(&raw), now);

        assert_eq!(horizon.granularity, Some(Granularity::QuarterHourly));
        assert_eq!(horizon.slots.len(), 36 + 96);
        assert!(horizon.includes_tomorrow);
        assert_eq!(horizon.end(), Some(local(2025, 1, 17, 0, 0)));
        assert_contiguous(&horizon.slots);
    }

    #[test]
    fn test_invalid_tomorrow_flag_ignored() {
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 1, 15, 15, 0);
        let mut raw = RawPriceData::with_tomorrow(vec![1.0; 24], vec![2.0; 24]);
        raw.tomorrow_valid = false;
        let horizon = model.normalize(Some(&raw), now);

        assert!(!horizon.includes_tomorrow);
        assert_eq!(horizon.end(), Some(local(2025, 1, 16, 0, 0)));
    }

    #[test]
    fn test_bad_today_length_drops_horizon() {
        let model = PriceModel::new(Stockholm);
        let horizon = model.normalize(
            Some(&RawPriceData::today_only(vec![1.0; 48])),
            local(2025, 1, 15, 15, 0),
        );
        assert!(horizon.is_empty());
        assert!(matches!(
            horizon.anomalies.as_slice(),
            [PlanningError::InvalidPriceData(_)]
        ));
    }

    #[test]
    fn test_bad_tomorrow_length_keeps_today() {
        let model = PriceModel::new(Stockholm);
        let raw = RawPriceData::with_tomorrow(vec![1.0; 24], vec![2.0; 30]);
        let horizon = model.normalize(Some(&raw), local(2025, 1, 15, 15, 0));
        assert_eq!(horizon.slots.len(), 9);
        assert!(!horizon.includes_tomorrow);
        assert_eq!(horizon.anomalies.len(), 1);
    }

    #[test]
    fn test_missing_prices_is_missing_input() {
        let model = PriceModel::new(Stockholm);
        let horizon = model.normalize(None, local(2025, 1, 15, 15, 0));
        assert!(horizon.is_empty());
        assert!(matches!(
            horizon.anomalies.as_slice(),
            [PlanningError::MissingInput(_)]
        ));
    }

    #[test]
    fn test_dst_spring_forward_day() {
        // 2025-03-30 in Stockholm has 23 hours
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 3, 30, 0, 0);
        let raw = RawPriceData::with_tomorrow(vec![1.0; 23], vec![2.0; 24]);
        let horizon = model.normalize(Some(&raw), now);

        assert_eq!(horizon.slots.len(), 23 + 24);
        assert_contiguous(&horizon.slots);
        assert_eq!(horizon.slots[23].start, local(2025, 3, 31, 0, 0));
    }

    #[test]
    fn test_dst_day_with_padded_list_does_not_overlap() {
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 3, 30, 0, 0);
        let raw = RawPriceData::with_tomorrow(vec![1.0; 24], vec![2.0; 24]);
        let horizon = model.normalize(Some(&raw), now);

        assert_eq!(horizon.slots.len(), 23 + 24);
        assert_contiguous(&horizon.slots);
    }

    #[test]
    fn test_dst_fall_back_day() {
        // 2025-10-26 in Stockholm has 25 hours
        let model = PriceModel::new(Stockholm);
        let now = local(2025, 10, 26, 0, 0);
        let horizon = model.normalize(Some(&RawPriceData::today_only(vec![1.0; 100])), now);

        assert_eq!(horizon.slots.len(), 100);
        assert_eq!(horizon.end(), Some(local(2025, 10, 27, 0, 0)));
        assert_contiguous(&horizon.slots);
    }

    proptest! {
        #[test]
        fn prop_full_day_is_contiguous(hourly in any::<bool>(), price in 0.0f64..5.0) {
            let model = PriceModel::new(Stockholm);
            let len = if hourly { 24 } else { 96 };
            let start = local(2025, 1, 15, 0, 0);
            let raw = RawPriceData::with_tomorrow(vec![price; len], vec![price; len]);
            let horizon = model.normalize(Some(&raw), start);

            prop_assert_eq!(horizon.slots.len(), 2 * len);
            let span = horizon.end().unwrap() - horizon.slots[0].start;
            prop_assert_eq!(span.num_hours(), 48);
            for pair in horizon.slots.windows(2) {
                prop_assert_eq!(pair[0].end(), pair[1].start);
            }
        }

        #[test]
        fn prop_never_returns_finished_slots(minute in 0i64..(24 * 60)) {
            let model = PriceModel::new(Stockholm);
            let now = local(2025, 1, 15, 0, 0) + Duration::minutes(minute);
            let horizon = model.normalize(Some(&RawPriceData::today_only(vec![1.0; 96])), now);
            prop_assert!(horizon.slots.iter().all(|s| s.end() > now));
            prop_assert!(horizon.slots.first().is_some_and(|s| s.contains(now)));
        }
    }
}
