//! Household load model
//!
//! Deterministic time-of-day profile, split unevenly across the three phases
//! the way single-phase appliances usually are.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::PhaseCurrents;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdProfile {
    /// Average night-time load in kW
    pub base_load_kw: f64,
    /// Share of the load on L1, L2, L3
    pub phase_split: [f64; 3],
    pub voltage_v: f64,
}

impl Default for HouseholdProfile {
    fn default() -> Self {
        Self {
            base_load_kw: 0.6,
            phase_split: [0.5, 0.3, 0.2],
            voltage_v: 230.0,
        }
    }
}

impl HouseholdProfile {
    /// Load multiplier for a local time
    pub fn time_of_day_multiplier(time: NaiveDateTime) -> f64 {
        let hour = time.hour() as f64 + time.minute() as f64 / 60.0;
        let weekend = time.weekday().num_days_from_monday() >= 5;

        let base = if hour < 6.0 {
            0.5
        } else if hour < 9.0 {
            // breakfast, showers
            2.5 + (hour - 6.0) * 0.5
        } else if hour < 16.0 {
            1.0
        } else if hour < 21.0 {
            // cooking, laundry
            3.5 + (hour - 16.0) * 0.3
        } else {
            (5.0 - (hour - 21.0) * 1.5).max(0.5)
        };

        match (weekend, hour) {
            (true, h) if h < 9.0 => base * 0.7,
            (true, h) if h < 22.0 => base * 1.2,
            _ => base,
        }
    }

    pub fn load_kw(&self, time: NaiveDateTime) -> f64 {
        self.base_load_kw * Self::time_of_day_multiplier(time)
    }

    pub fn phase_currents(&self, time: NaiveDateTime) -> PhaseCurrents {
        let watts = self.load_kw(time) * 1000.0;
        let mut amps = [0.0; 3];
        for (slot, share) in amps.iter_mut().zip(self.phase_split) {
            *slot = watts * share / self.voltage_v;
        }
        PhaseCurrents(amps)
    }
}
