use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{PriceSlot, SessionGoal};
use crate::error::PlanningError;

/// How the charger should run in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChargeMode {
    Off,
    /// Deadline-driven or immediate charging at the balanced current
    Normal,
    /// Target already met; top-up at the maintenance current
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    /// Enough slots selected to reach the target
    Scheduled,
    /// Every candidate slot selected and still short of the target
    Insufficient,
    TargetReached,
    /// Deadline already behind us; charge now
    DeadlinePassed,
    /// No usable prices; charge immediately
    LoadBalancingOnly,
    SmartChargingDisabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocPoint {
    pub at: DateTime<FixedOffset>,
    pub soc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub time_start: DateTime<FixedOffset>,
    pub time_end: DateTime<FixedOffset>,
    pub price: f64,
}

impl From<&PriceSlot> for ScheduleEntry {
    fn from(slot: &PriceSlot) -> Self {
        Self {
            time_start: slot.start,
            time_end: slot.end(),
            price: slot.price,
        }
    }
}

/// Output of one planning pass. Rebuilt from scratch every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingPlan {
    pub computed_at: DateTime<FixedOffset>,
    /// Goal after tier adjustment and the minimum-SoC floor
    pub goal: SessionGoal,
    /// Selected slots in chronological order
    pub selected_slots: Vec<PriceSlot>,
    pub total_cost: f64,
    pub expected_soc_trajectory: Vec<SocPoint>,
    pub should_charge_now: bool,
    pub charge_mode: ChargeMode,
    pub session_end_time: Option<DateTime<FixedOffset>>,
    pub price_horizon_covers_departure: bool,
    pub status: PlanStatus,
    pub kwh_to_pull: f64,
    pub hours_needed: f64,
    pub anomalies: Vec<PlanningError>,
}

impl ChargingPlan {
    /// Plan is provisional until prices reach the deadline.
    pub fn is_provisional(&self) -> bool {
        !self.price_horizon_covers_departure
    }

    pub fn slot_at(&self, t: DateTime<FixedOffset>) -> Option<&PriceSlot> {
        self.selected_slots.iter().find(|s| s.contains(t))
    }

    /// First selected slot starting after `t`.
    pub fn next_start_after(&self, t: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        self.selected_slots
            .iter()
            .map(|s| s.start)
            .filter(|start| *start > t)
            .min()
    }

    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        self.selected_slots.iter().map(ScheduleEntry::from).collect()
    }
}
