use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minutes of charging lost to fuse limits in the current session.
///
/// Only grows within a session; [`OverloadLedger::reset`] is called at plug-in
/// and unplug and nowhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverloadLedger {
    prevented_minutes_this_session: f64,
}

impl OverloadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minutes(&self) -> f64 {
        self.prevented_minutes_this_session
    }

    /// Add `minutes` of prevented charging. Non-positive or non-finite values are ignored.
    pub fn record(&mut self, minutes: f64) {
        if minutes.is_finite() && minutes > 0.0 {
            self.prevented_minutes_this_session += minutes;
        }
    }

    pub fn reset(&mut self) {
        self.prevented_minutes_this_session = 0.0;
    }
}

/// Minutes covered by the cycle ending at `now`.
///
/// The first cycle counts as one tick. Gaps longer than two ticks (a stalled
/// host, a suspended process) are capped so a single late cycle cannot book
/// hours of prevented charging.
pub fn cycle_minutes(
    last_cycle: Option<DateTime<FixedOffset>>,
    now: DateTime<FixedOffset>,
    tick: Duration,
) -> f64 {
    let tick_minutes = tick.as_secs_f64() / 60.0;
    match last_cycle {
        Some(last) => {
            let elapsed = (now - last).num_milliseconds().max(0) as f64 / 60_000.0;
            elapsed.min(tick_minutes * 2.0)
        }
        None => tick_minutes,
    }
}
