//! Synthetic spot prices with a night trough and morning/evening peaks.

use chrono::{Datelike, NaiveDate};

/// Hour after which the next day's prices are published
pub const PUBLISH_HOUR: u32 = 13;

/// Price for a fractional hour of the day.
pub fn price_at_hour(date: NaiveDate, hour: f64) -> f64 {
    let morning = (-(hour - 8.0).powi(2) / 4.0).exp();
    let evening = (-(hour - 18.5).powi(2) / 6.0).exp();
    let night_dip = (-(hour - 3.0).powi(2) / 5.0).exp();
    // small day-to-day variation so consecutive days are not identical
    let day_shift = f64::from(date.ordinal() % 5) * 0.05;
    let price = 1.1 + 1.4 * morning + 1.9 * evening - 0.7 * night_dip + day_shift;
    (price * 1000.0).round() / 1000.0
}

/// One day of prices with `slots` entries (24 hourly or 96 quarter-hourly).
pub fn day_prices(date: NaiveDate, slots: usize) -> Vec<f64> {
    let slots = slots.max(1);
    let step = 24.0 / slots as f64;
    (0..slots)
        .map(|i| price_at_hour(date, i as f64 * step))
        .collect()
}
