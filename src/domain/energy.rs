use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Best-known energy state of the connected vehicle.
///
/// `soc_virtual` is what every decision uses; `soc_actual` is the last
/// authoritative reading and overwrites the virtual value when it arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyState {
    pub soc_actual: Option<f64>,
    pub soc_virtual: f64,
    pub soc_source_timestamp: Option<DateTime<FixedOffset>>,
    pub capacity_kwh: f64,
    /// Charging losses in percent
    pub efficiency_loss_pct: f64,
}

impl EnergyState {
    pub fn new(capacity_kwh: f64, efficiency_loss_pct: f64) -> Self {
        Self {
            soc_actual: None,
            soc_virtual: 0.0,
            soc_source_timestamp: None,
            capacity_kwh,
            efficiency_loss_pct,
        }
    }

    pub fn with_soc(mut self, soc: f64) -> Self {
        let soc = clamp_soc(soc);
        self.soc_actual = Some(soc);
        self.soc_virtual = soc;
        self
    }

    /// Fraction of grid energy that ends up in the battery.
    pub fn efficiency(&self) -> f64 {
        (1.0 - self.efficiency_loss_pct / 100.0).clamp(0.01, 1.0)
    }

    /// Battery-side energy needed to reach `target_soc`.
    pub fn kwh_needed(&self, target_soc: f64) -> f64 {
        (self.capacity_kwh * (target_soc - self.soc_virtual) / 100.0).max(0.0)
    }

    /// Grid-side energy needed to reach `target_soc`, losses included.
    pub fn kwh_to_pull(&self, target_soc: f64) -> f64 {
        self.kwh_needed(target_soc) / self.efficiency()
    }

    /// SoC gained by drawing `grid_kwh` from the grid.
    pub fn soc_gain(&self, grid_kwh: f64) -> f64 {
        if self.capacity_kwh <= 0.0 {
            return 0.0;
        }
        grid_kwh * self.efficiency() / self.capacity_kwh * 100.0
    }
}

pub fn clamp_soc(soc: f64) -> f64 {
    if soc.is_nan() {
        return 0.0;
    }
    soc.clamp(0.0, 100.0)
}
