use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Runtime-adjustable preferences. Seeded from configuration, then replaced by
/// whatever was last persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UserSettings {
    #[validate(range(min = 0.0, max = 100.0))]
    pub target_soc: f64,
    /// Local wall-clock departure time
    pub departure_time: NaiveTime,
    /// Minimum guaranteed SoC; the effective target never drops below it
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc: f64,
    pub smart_charging_enabled: bool,
    #[validate(range(min = 0.0))]
    pub price_extra_fee: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub price_vat_pct: f64,
}
