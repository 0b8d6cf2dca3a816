//! Charging planner
//!
//! A pure function from (energy state, goal, price horizon, overload
//! deficit, wall-clock time) to a [`ChargingPlan`]. The plan is rebuilt from
//! scratch on every cycle; nothing from a previous plan is patched.

pub mod cost;
pub mod goal;
pub mod greedy;
pub mod tiers;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, MaintenanceConfig, TierConfig};
use crate::domain::{
    ChargeMode, ChargingPlan, EnergyState, PlanStatus, PriceSlot, SessionGoal, SocPoint,
    UserSettings,
};
use crate::error::PlanningError;
use crate::pricing::PriceHorizon;

pub use cost::CostModel;
pub use goal::{calendar_goal, resolve_goal, standard_deadline, CalendarGoal};
pub use greedy::{select_cheapest, Selection};
pub use tiers::{apply_tiers, TierOutcome};

/// Planner parameters that stay fixed between cycles unless settings change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerParams {
    /// Estimated charge power at the nominal current (kW)
    pub power_kw: f64,
    pub min_soc: f64,
    pub smart_charging_enabled: bool,
    pub tiers: TierConfig,
    pub maintenance: MaintenanceConfig,
    pub cost: CostModel,
    /// Minutes charging continues after the planned session end
    pub buffer_minutes: i64,
}

impl PlannerParams {
    pub fn new(config: &Config, settings: &UserSettings) -> Self {
        Self {
            power_kw: config.charger.nominal_power_kw(),
            min_soc: settings.min_soc,
            smart_charging_enabled: settings.smart_charging_enabled,
            tiers: config.tiers.clone(),
            maintenance: config.maintenance.clone(),
            cost: CostModel {
                extra_fee: settings.price_extra_fee,
                vat_pct: settings.price_vat_pct,
            },
            buffer_minutes: config.controller.buffer_minutes,
        }
    }
}

/// Everything one planning pass looks at.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub now: DateTime<FixedOffset>,
    pub energy: &'a EnergyState,
    pub goal: &'a SessionGoal,
    pub horizon: &'a PriceHorizon,
    /// Minutes this session could not charge because of fuse limits
    pub prevented_minutes: f64,
    /// Session end of the last plan that had one
    pub previous_session_end: Option<DateTime<FixedOffset>>,
    pub params: &'a PlannerParams,
}

impl PlanInputs<'_> {
    fn in_buffer(&self) -> bool {
        self.previous_session_end.is_some_and(|end| {
            end <= self.now && self.now < end + Duration::minutes(self.params.buffer_minutes)
        })
    }
}

/// Build the plan for this cycle.
pub fn plan(inputs: &PlanInputs<'_>) -> ChargingPlan {
    let now = inputs.now;
    let params = inputs.params;
    let horizon = inputs.horizon;
    let mut anomalies = horizon.anomalies.clone();

    let live_price = horizon.price_at(now);
    let tiered = apply_tiers(&params.tiers, inputs.goal, live_price);
    let goal = apply_floor(tiered.goal, params.min_soc, &mut anomalies);

    let kwh_to_pull = inputs.energy.kwh_to_pull(goal.target_soc);
    let hours_needed = if kwh_to_pull > 0.0 {
        kwh_to_pull / params.power_kw + inputs.prevented_minutes / 60.0
    } else {
        0.0
    };

    let mut plan = ChargingPlan {
        computed_at: now,
        price_horizon_covers_departure: horizon.covers(goal.deadline),
        goal,
        selected_slots: Vec::new(),
        total_cost: 0.0,
        expected_soc_trajectory: vec![SocPoint {
            at: now,
            soc: inputs.energy.soc_virtual,
        }],
        should_charge_now: false,
        charge_mode: ChargeMode::Off,
        session_end_time: None,
        status: PlanStatus::Scheduled,
        kwh_to_pull,
        hours_needed,
        anomalies,
    };

    if !params.smart_charging_enabled {
        charge_immediately(&mut plan, inputs, PlanStatus::SmartChargingDisabled);
    } else if kwh_to_pull <= 0.0 {
        target_reached(&mut plan, inputs, live_price);
    } else if plan.goal.deadline <= now {
        warn!(
            deadline = %plan.goal.deadline,
            soc = inputs.energy.soc_virtual,
            target_soc = plan.goal.target_soc,
            "Deadline already passed, charging immediately"
        );
        plan.anomalies.push(PlanningError::DeadlinePassed(format!(
            "deadline {} passed at {:.0}% of {:.0}%",
            plan.goal.deadline.to_rfc3339(),
            inputs.energy.soc_virtual,
            plan.goal.target_soc
        )));
        charge_immediately(&mut plan, inputs, PlanStatus::DeadlinePassed);
    } else if horizon.is_empty() {
        charge_immediately(&mut plan, inputs, PlanStatus::LoadBalancingOnly);
    } else {
        schedule(&mut plan, inputs, tiered.cheap_triggered);
    }

    debug!(
        status = %plan.status,
        mode = %plan.charge_mode,
        should_charge_now = plan.should_charge_now,
        target_soc = plan.goal.target_soc,
        source = %plan.goal.source,
        hours_needed = plan.hours_needed,
        slots = plan.selected_slots.len(),
        covers_departure = plan.price_horizon_covers_departure,
        "Plan computed"
    );
    plan
}

fn apply_floor(
    mut goal: SessionGoal,
    min_soc: f64,
    anomalies: &mut Vec<PlanningError>,
) -> SessionGoal {
    if goal.target_soc < min_soc {
        anomalies.push(PlanningError::ConfigurationInvalid(format!(
            "target {:.0}% is below the minimum SoC {:.0}%, using the minimum",
            goal.target_soc, min_soc
        )));
        goal.target_soc = min_soc;
    }
    goal
}

fn charge_immediately(plan: &mut ChargingPlan, inputs: &PlanInputs<'_>, status: PlanStatus) {
    let now = inputs.now;
    plan.status = status;
    plan.should_charge_now = true;
    plan.charge_mode = ChargeMode::Normal;

    if plan.kwh_to_pull <= 0.0 {
        return;
    }
    let upcoming: Vec<PriceSlot> = inputs
        .horizon
        .slots
        .iter()
        .filter(|s| s.end() > now)
        .cloned()
        .collect();
    let until = inputs.horizon.end().unwrap_or(now);
    let alloc = cost::allocate(
        &upcoming,
        now,
        until,
        plan.kwh_to_pull,
        inputs.params.power_kw,
        inputs.energy,
        &inputs.params.cost,
    );
    plan.total_cost = alloc.total_cost;

    let charge_hours = plan.kwh_to_pull / inputs.params.power_kw;
    let end = now + Duration::seconds((charge_hours * 3600.0).round() as i64);
    plan.session_end_time = Some(end);
    plan.expected_soc_trajectory.push(SocPoint {
        at: end,
        soc: crate::domain::clamp_soc(
            inputs.energy.soc_virtual + inputs.energy.soc_gain(plan.kwh_to_pull),
        ),
    });
}

fn target_reached(plan: &mut ChargingPlan, inputs: &PlanInputs<'_>, live_price: Option<f64>) {
    plan.status = PlanStatus::TargetReached;

    if inputs.in_buffer() {
        plan.should_charge_now = true;
        plan.charge_mode = ChargeMode::Normal;
        plan.session_end_time = inputs.previous_session_end;
        return;
    }

    let maintenance = &inputs.params.maintenance;
    if maintenance.enabled && live_price.is_some_and(|p| p <= maintenance.price_threshold) {
        plan.should_charge_now = true;
        plan.charge_mode = ChargeMode::Maintenance;
    }
}

fn schedule(plan: &mut ChargingPlan, inputs: &PlanInputs<'_>, cheap_triggered: bool) {
    let now = inputs.now;
    let deadline = plan.goal.deadline;

    if plan.is_provisional() {
        plan.anomalies.push(PlanningError::HorizonInsufficient(format!(
            "known prices end at {}, departure is {}; plan is provisional",
            inputs
                .horizon
                .end()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            deadline.to_rfc3339()
        )));
    }

    let candidates: Vec<PriceSlot> = inputs
        .horizon
        .slots
        .iter()
        .filter(|s| s.start < deadline && s.end() > now)
        .cloned()
        .collect();
    let selection = select_cheapest(&candidates, now, deadline, plan.hours_needed);

    if selection.sufficient {
        plan.status = PlanStatus::Scheduled;
    } else {
        plan.status = PlanStatus::Insufficient;
        plan.anomalies.push(PlanningError::HorizonInsufficient(format!(
            "{:.2} h available before departure, {:.2} h needed",
            selection.hours, plan.hours_needed
        )));
    }

    let alloc = cost::allocate(
        &selection.slots,
        now,
        deadline,
        plan.kwh_to_pull,
        inputs.params.power_kw,
        inputs.energy,
        &inputs.params.cost,
    );
    plan.total_cost = alloc.total_cost;
    plan.expected_soc_trajectory = alloc.trajectory;

    plan.selected_slots = selection.slots;
    let in_slot = plan.slot_at(now).is_some();
    let in_buffer = inputs.in_buffer();
    plan.should_charge_now = in_slot || cheap_triggered || in_buffer;
    plan.charge_mode = if plan.should_charge_now {
        ChargeMode::Normal
    } else {
        ChargeMode::Off
    };
    plan.session_end_time = plan
        .selected_slots
        .last()
        .map(|s| s.end().min(deadline))
        .or(if in_buffer {
            inputs.previous_session_end
        } else {
            None
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GoalSource, RawPriceData};
    use crate::pricing::PriceModel;
    use chrono::TimeZone;
    use chrono_tz::Europe::Stockholm;
    use proptest::prelude::*;

    fn local(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        Stockholm
            .with_ymd_and_hms(2025, 1, d, h, m, 0)
            .unwrap()
            .fixed_offset()
    }

    fn params() -> PlannerParams {
        PlannerParams {
            power_kw: 11.0,
            min_soc: 20.0,
            smart_charging_enabled: true,
            tiers: TierConfig {
                enabled: true,
                cheap_price: 0.5,
                cheap_target_soc: 100.0,
                expensive_price: 3.0,
                expensive_target_soc: 60.0,
            },
            maintenance: MaintenanceConfig {
                enabled: true,
                price_threshold: 1.0,
                current_amps: 0.0,
            },
            cost: CostModel {
                extra_fee: 0.0,
                vat_pct: 0.0,
            },
            buffer_minutes: 15,
        }
    }

    fn standard_goal() -> SessionGoal {
        SessionGoal {
            target_soc: 80.0,
            deadline: local(16, 7, 0),
            source: GoalSource::Standard,
        }
    }

    /// Hours 23 today and 0, 1 tomorrow are the cheapest.
    fn overnight_prices() -> RawPriceData {
        let mut today = vec![2.0; 24];
        today[23] = 0.8;
        let mut tomorrow = vec![2.0; 24];
        tomorrow[0] = 0.7;
        tomorrow[1] = 0.9;
        RawPriceData::with_tomorrow(today, tomorrow)
    }

    fn horizon(raw: &RawPriceData, now: DateTime<FixedOffset>) -> PriceHorizon {
        PriceModel::new(Stockholm).normalize(Some(raw), now)
    }

    fn plan_at(
        now: DateTime<FixedOffset>,
        energy: &EnergyState,
        goal: &SessionGoal,
        horizon: &PriceHorizon,
        params: &PlannerParams,
    ) -> ChargingPlan {
        plan(&PlanInputs {
            now,
            energy,
            goal,
            horizon,
            prevented_minutes: 0.0,
            previous_session_end: None,
            params,
        })
    }

    #[test]
    fn test_overnight_cheapest_slots() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(25.0);
        let horizon = horizon(&overnight_prices(), now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        // 30.56 kWh at 11 kW is 2.78 h: three whole hours
        let starts: Vec<_> = p.selected_slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![local(15, 23, 0), local(16, 0, 0), local(16, 1, 0)]);
        assert!(!p.should_charge_now);
        assert_eq!(p.charge_mode, ChargeMode::Off);
        assert_eq!(p.status, PlanStatus::Scheduled);
        assert!(p.price_horizon_covers_departure);
        assert_eq!(p.session_end_time, Some(local(16, 2, 0)));

        // 11 kWh at 0.8, 11 kWh at 0.7, remainder at 0.9
        let rest = p.kwh_to_pull - 22.0;
        let expected_cost = 11.0 * 0.8 + 11.0 * 0.7 + rest * 0.9;
        assert!((p.total_cost - expected_cost).abs() < 1e-6);
        let last = p.expected_soc_trajectory.last().unwrap();
        assert!((last.soc - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_charges_inside_selected_slot() {
        let now = local(15, 23, 10);
        let energy = EnergyState::new(50.0, 10.0).with_soc(25.0);
        let horizon = horizon(&overnight_prices(), now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());
        assert!(p.should_charge_now);
        assert_eq!(p.charge_mode, ChargeMode::Normal);
    }

    #[test]
    fn test_missing_tomorrow_is_provisional() {
        let now = local(15, 15, 0);
        let mut raw = overnight_prices();
        raw.tomorrow_valid = false;
        let energy = EnergyState::new(50.0, 10.0).with_soc(25.0);
        let horizon = horizon(&raw, now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert!(!p.price_horizon_covers_departure);
        assert!(p.is_provisional());
        assert!(p.selected_slots.iter().all(|s| s.end() <= local(16, 0, 0)));
        assert!(p.selected_slots.iter().any(|s| s.start == local(15, 23, 0)));
        assert!(p
            .anomalies
            .iter()
            .any(|a| matches!(a, PlanningError::HorizonInsufficient(_))));
    }

    #[test]
    fn test_short_horizon_takes_everything() {
        let now = local(15, 21, 0);
        let raw = RawPriceData::today_only(vec![1.0; 24]);
        let energy = EnergyState::new(80.0, 10.0).with_soc(20.0);
        let horizon = horizon(&raw, now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.status, PlanStatus::Insufficient);
        assert_eq!(p.selected_slots.len(), 3);
        assert!(p.should_charge_now);
    }

    #[test]
    fn test_overload_minutes_pull_in_more_slots() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(25.0);
        let horizon = horizon(&overnight_prices(), now);
        let base = plan_at(now, &energy, &standard_goal(), &horizon, &params());
        let extended = plan(&PlanInputs {
            now,
            energy: &energy,
            goal: &standard_goal(),
            horizon: &horizon,
            prevented_minutes: 30.0,
            previous_session_end: None,
            params: &params(),
        });

        assert!((extended.hours_needed - base.hours_needed - 0.5).abs() < 1e-9);
        assert_eq!(extended.selected_slots.len(), base.selected_slots.len() + 1);
    }

    #[test]
    fn test_target_reached_without_maintenance() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(85.0);
        let horizon = horizon(&overnight_prices(), now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.status, PlanStatus::TargetReached);
        assert_eq!(p.hours_needed, 0.0);
        assert!(!p.should_charge_now);
        assert!(p.selected_slots.is_empty());
    }

    #[test]
    fn test_maintenance_when_cheap_enough() {
        let now = local(15, 23, 30);
        let energy = EnergyState::new(50.0, 10.0).with_soc(85.0);
        let horizon = horizon(&overnight_prices(), now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.status, PlanStatus::TargetReached);
        assert!(p.should_charge_now);
        assert_eq!(p.charge_mode, ChargeMode::Maintenance);
        assert!(p.selected_slots.is_empty());
    }

    #[test]
    fn test_buffer_keeps_charging_after_session_end() {
        let now = local(16, 2, 5);
        let energy = EnergyState::new(50.0, 10.0).with_soc(80.0);
        let horizon = horizon(&overnight_prices(), local(15, 15, 0));
        let inputs = PlanInputs {
            now,
            energy: &energy,
            goal: &standard_goal(),
            horizon: &horizon,
            prevented_minutes: 0.0,
            previous_session_end: Some(local(16, 2, 0)),
            params: &params(),
        };
        let p = plan(&inputs);
        assert!(p.should_charge_now);
        assert_eq!(p.charge_mode, ChargeMode::Normal);

        let later = PlanInputs {
            now: local(16, 2, 20),
            ..inputs
        };
        assert!(!plan(&later).should_charge_now);
    }

    #[test]
    fn test_deadline_passed_charges_now() {
        let now = local(16, 8, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(40.0);
        let horizon = horizon(&overnight_prices(), now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.status, PlanStatus::DeadlinePassed);
        assert!(p.should_charge_now);
        assert!(p.selected_slots.is_empty());
        assert!(p
            .anomalies
            .iter()
            .any(|a| matches!(a, PlanningError::DeadlinePassed(_))));
    }

    #[test]
    fn test_no_prices_charges_now() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(40.0);
        let horizon = PriceModel::new(Stockholm).normalize(None, now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.status, PlanStatus::LoadBalancingOnly);
        assert!(p.should_charge_now);
        assert!(p
            .anomalies
            .iter()
            .any(|a| matches!(a, PlanningError::MissingInput(_))));
    }

    #[test]
    fn test_smart_charging_disabled() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(90.0);
        let horizon = horizon(&overnight_prices(), now);
        let mut params = params();
        params.smart_charging_enabled = false;
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params);

        assert_eq!(p.status, PlanStatus::SmartChargingDisabled);
        assert!(p.should_charge_now);
    }

    #[test]
    fn test_cheap_tier_raises_target_and_charges() {
        let now = local(15, 15, 0);
        let mut raw = overnight_prices();
        raw.today[15] = 0.3;
        let energy = EnergyState::new(50.0, 10.0).with_soc(85.0);
        let horizon = horizon(&raw, now);
        let p = plan_at(now, &energy, &standard_goal(), &horizon, &params());

        assert_eq!(p.goal.target_soc, 100.0);
        assert_eq!(p.goal.source, GoalSource::OpportunisticPrice);
        assert!(p.should_charge_now);
    }

    #[test]
    fn test_cheap_price_charges_at_full_standard_target() {
        let now = local(15, 15, 0);
        let mut raw = overnight_prices();
        raw.today[15] = 0.4;
        // the three cheapest hours are overnight, not now
        if let Some(tomorrow) = raw.tomorrow.as_mut() {
            tomorrow[..3].fill(0.1);
        }
        let energy = EnergyState::new(50.0, 10.0).with_soc(50.0);
        let horizon = horizon(&raw, now);
        let goal = SessionGoal {
            target_soc: 100.0,
            ..standard_goal()
        };
        let p = plan_at(now, &energy, &goal, &horizon, &params());

        assert_eq!(p.goal.target_soc, 100.0);
        assert_eq!(p.goal.source, GoalSource::Standard);
        assert!(p.slot_at(now).is_none());
        assert!(p.should_charge_now);
        assert_eq!(p.charge_mode, ChargeMode::Normal);
    }

    #[test]
    fn test_target_floor_is_enforced() {
        let now = local(15, 15, 0);
        let energy = EnergyState::new(50.0, 10.0).with_soc(10.0);
        let horizon = horizon(&overnight_prices(), now);
        let goal = SessionGoal {
            target_soc: 15.0,
            ..standard_goal()
        };
        let p = plan_at(now, &energy, &goal, &horizon, &params());

        assert_eq!(p.goal.target_soc, 20.0);
        assert!(p
            .anomalies
            .iter()
            .any(|a| matches!(a, PlanningError::ConfigurationInvalid(_))));
    }

    proptest! {
        #[test]
        fn prop_plan_is_idempotent(
            soc in 0.0f64..100.0,
            minute in 0i64..(9 * 60),
            prevented in 0.0f64..120.0,
            prices in prop::collection::vec(0.0f64..4.0, 24),
        ) {
            let now = local(15, 15, 0) + Duration::minutes(minute);
            let raw = RawPriceData::with_tomorrow(prices.clone(), prices);
            let horizon = horizon(&raw, now);
            let energy = EnergyState::new(60.0, 10.0).with_soc(soc);
            let goal = standard_goal();
            let params = params();
            let inputs = PlanInputs {
                now,
                energy: &energy,
                goal: &goal,
                horizon: &horizon,
                prevented_minutes: prevented,
                previous_session_end: None,
                params: &params,
            };
            prop_assert_eq!(plan(&inputs), plan(&inputs));
        }
    }
}
