use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::domain::{clamp_soc, EnergyState, PriceSlot, SocPoint};

/// Converts spot prices into what the household actually pays per kWh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub extra_fee: f64,
    pub vat_pct: f64,
}

impl CostModel {
    pub fn adjusted(&self, spot: f64) -> f64 {
        (spot + self.extra_fee) * (1.0 + self.vat_pct / 100.0)
    }
}

impl From<&PricingConfig> for CostModel {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            extra_fee: cfg.extra_fee,
            vat_pct: cfg.vat_pct,
        }
    }
}

/// Energy placed into the selected slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub total_cost: f64,
    pub trajectory: Vec<SocPoint>,
}

/// Spread `kwh_to_pull` over `slots` in time order at `power_kw`, clipped to
/// `[from, until)`. Slots that are not needed once the energy is placed
/// contribute nothing.
pub fn allocate(
    slots: &[PriceSlot],
    from: DateTime<FixedOffset>,
    until: DateTime<FixedOffset>,
    kwh_to_pull: f64,
    power_kw: f64,
    energy: &EnergyState,
    cost: &CostModel,
) -> Allocation {
    let mut soc = energy.soc_virtual;
    let mut trajectory = vec![SocPoint { at: from, soc }];
    let mut remaining = kwh_to_pull.max(0.0);
    let mut total_cost = 0.0;

    for slot in slots {
        if remaining <= 0.0 || power_kw <= 0.0 {
            break;
        }
        let hours = slot.usable_hours(from, until);
        if hours <= 0.0 {
            continue;
        }
        let kwh = remaining.min(power_kw * hours);
        remaining -= kwh;
        total_cost += kwh * cost.adjusted(slot.price);

        let start = slot.start.max(from);
        let end = start + Duration::seconds((kwh / power_kw * 3600.0).round() as i64);
        if trajectory.last().map(|p| p.at) != Some(start) {
            trajectory.push(SocPoint { at: start, soc });
        }
        soc = clamp_soc(soc + energy.soc_gain(kwh));
        trajectory.push(SocPoint { at: end, soc });
    }

    Allocation {
        total_cost,
        trajectory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 15, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_adjusted_price() {
        let model = CostModel {
            extra_fee: 0.5,
            vat_pct: 25.0,
        };
        assert!((model.adjusted(1.0) - 1.875).abs() < 1e-9);
    }

    #[test]
    fn test_allocation_fills_slots_in_order() {
        let energy = EnergyState::new(50.0, 0.0).with_soc(50.0);
        let slots = vec![PriceSlot::new(at(1), 60, 1.0), PriceSlot::new(at(3), 60, 2.0)];
        let cost = CostModel {
            extra_fee: 0.0,
            vat_pct: 0.0,
        };
        // 15 kWh at 10 kW: a full first hour and half the second slot
        let alloc = allocate(&slots, at(0), at(6), 15.0, 10.0, &energy, &cost);

        assert!((alloc.total_cost - (10.0 * 1.0 + 5.0 * 2.0)).abs() < 1e-9);
        let last = alloc.trajectory.last().unwrap();
        assert_eq!(last.at, at(3) + Duration::minutes(30));
        assert!((last.soc - 80.0).abs() < 1e-9);
        assert!(alloc.trajectory.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[test]
    fn test_allocation_without_need() {
        let energy = EnergyState::new(50.0, 0.0).with_soc(90.0);
        let slots = vec![PriceSlot::new(at(1), 60, 1.0)];
        let cost = CostModel {
            extra_fee: 0.0,
            vat_pct: 0.0,
        };
        let alloc = allocate(&slots, at(0), at(6), 0.0, 10.0, &energy, &cost);
        assert_eq!(alloc.total_cost, 0.0);
        assert_eq!(alloc.trajectory.len(), 1);
    }
}
