use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ChargerConfig;
use crate::domain::{CommandedState, LoadBalanceState, PhaseCurrents};

/// Fuse-limit parameters for the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Rated current of the main fuse per phase (A)
    pub main_fuse_amps: f64,
    /// Fraction of the fuse held back (0.05 = 5%)
    pub safety_margin: f64,
    /// Lowest current the charger can operate at (A)
    pub min_operating_amps: f64,
    /// Phases the charger draws from
    pub phases: u8,
}

impl From<&ChargerConfig> for BalancerConfig {
    fn from(cfg: &ChargerConfig) -> Self {
        Self {
            main_fuse_amps: cfg.main_fuse_amps,
            safety_margin: cfg.safety_margin,
            min_operating_amps: cfg.min_operating_amps,
            phases: cfg.phases,
        }
    }
}

/// Computes the current the charger may draw without tripping the main fuse.
///
/// Stateless: every call works only from the readings it is given, so a bad
/// cycle is corrected by the next one.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    config: BalancerConfig,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self { config }
    }

    /// Usable fuse capacity after the safety margin.
    pub fn headroom_amps(&self) -> f64 {
        self.config.main_fuse_amps * (1.0 - self.config.safety_margin)
    }

    /// Balance one cycle.
    ///
    /// `charger` is the dedicated charger current reading; when it is absent
    /// the charger's own draw is estimated from the last confirmed command so
    /// the grid reading is not double counted. `requested_amps` is what the
    /// planner wants; zero means the charger should not draw at all.
    pub fn balance(
        &self,
        grid: &PhaseCurrents,
        charger: Option<&PhaseCurrents>,
        commanded: &CommandedState,
        requested_amps: f64,
    ) -> LoadBalanceState {
        let (charger_used, estimated) = match charger {
            Some(measured) => (*measured, false),
            None => (
                PhaseCurrents::balanced(commanded.presumed_amps(), self.config.phases),
                true,
            ),
        };

        let household = grid.saturating_sub(&charger_used).max();
        let available =
            (self.headroom_amps() - household).clamp(0.0, self.config.main_fuse_amps);

        let (limit, overload_prevented) = if requested_amps <= 0.0 {
            (0.0, false)
        } else if available < self.config.min_operating_amps {
            (0.0, true)
        } else {
            (available.min(requested_amps), false)
        };

        if overload_prevented {
            warn!(
                available_amps = available,
                min_operating_amps = self.config.min_operating_amps,
                household_amps = household,
                "Not enough fuse headroom for charging, holding current at 0A"
            );
        } else {
            debug!(
                available_amps = available,
                household_amps = household,
                current_limit_amps = limit,
                charger_estimated = estimated,
                "Load balanced"
            );
        }

        LoadBalanceState {
            main_fuse_amps: self.config.main_fuse_amps,
            safety_margin_pct: self.config.safety_margin * 100.0,
            min_operating_amps: self.config.min_operating_amps,
            grid_current_per_phase: *grid,
            charger_current_per_phase: charger.copied(),
            charger_current_used: charger_used,
            charger_current_estimated: estimated,
            household_amps: household,
            available_amps: available,
            current_limit_amps: limit,
            overload_prevented,
        }
    }

    /// Safe result when the grid meter cannot be read.
    pub fn unavailable(&self, charger: Option<&PhaseCurrents>) -> LoadBalanceState {
        LoadBalanceState {
            main_fuse_amps: self.config.main_fuse_amps,
            safety_margin_pct: self.config.safety_margin * 100.0,
            min_operating_amps: self.config.min_operating_amps,
            grid_current_per_phase: PhaseCurrents::default(),
            charger_current_per_phase: charger.copied(),
            charger_current_used: charger.copied().unwrap_or_default(),
            charger_current_estimated: charger.is_none(),
            household_amps: 0.0,
            available_amps: 0.0,
            current_limit_amps: 0.0,
            overload_prevented: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PowerState;
    use rstest::rstest;

    fn balancer(fuse: f64) -> LoadBalancer {
        LoadBalancer::new(BalancerConfig {
            main_fuse_amps: fuse,
            safety_margin: 0.05,
            min_operating_amps: 6.0,
            phases: 3,
        })
    }

    fn charging_at(amps: f64) -> CommandedState {
        CommandedState {
            power: Some(PowerState::On),
            current_limit_amps: Some(amps),
        }
    }

    #[test]
    fn test_headroom_above_floor() {
        // 16A * 0.95 - (12A - 3A) = 6.2A
        let lb = balancer(16.0);
        let grid = PhaseCurrents::new(12.0, 12.0, 12.0);
        let charger = PhaseCurrents::new(3.0, 3.0, 3.0);
        let state = lb.balance(&grid, Some(&charger), &charging_at(3.0), 16.0);

        assert!((state.available_amps - 6.2).abs() < 1e-9);
        assert!((state.current_limit_amps - 6.2).abs() < 1e-9);
        assert!(!state.overload_prevented);
        assert!(!state.charger_current_estimated);
    }

    #[test]
    fn test_below_floor_prevents_charging() {
        let lb = balancer(16.0);
        // 15.2 - 11.2 = 4A
        let grid = PhaseCurrents::new(11.2, 5.0, 5.0);
        let idle = PhaseCurrents::default();
        let state = lb.balance(&grid, Some(&idle), &CommandedState::UNKNOWN, 16.0);

        assert!((state.available_amps - 4.0).abs() < 1e-9);
        assert_eq!(state.current_limit_amps, 0.0);
        assert!(state.overload_prevented);
    }

    #[test]
    fn test_estimates_charger_from_command() {
        let lb = balancer(20.0);
        // grid includes our own 10A; household is really 5A on the worst phase
        let grid = PhaseCurrents::new(15.0, 12.0, 11.0);
        let state = lb.balance(&grid, None, &charging_at(10.0), 16.0);

        assert!(state.charger_current_estimated);
        assert_eq!(state.household_amps, 5.0);
        assert_eq!(state.available_amps, 14.0);
        assert_eq!(state.current_limit_amps, 14.0);
    }

    #[test]
    fn test_respects_requested_amps() {
        let lb = balancer(25.0);
        let state = lb.balance(&PhaseCurrents::default(), None, &CommandedState::UNKNOWN, 10.0);
        assert_eq!(state.current_limit_amps, 10.0);
    }

    #[test]
    fn test_zero_request_is_not_overload() {
        let lb = balancer(16.0);
        let grid = PhaseCurrents::new(15.0, 15.0, 15.0);
        let state = lb.balance(&grid, None, &CommandedState::UNKNOWN, 0.0);
        assert_eq!(state.current_limit_amps, 0.0);
        assert!(!state.overload_prevented);
    }

    #[rstest]
    #[case(PhaseCurrents::new(40.0, 0.0, 0.0), 0.0)]
    #[case(PhaseCurrents::new(-5.0, -5.0, -5.0), 16.0)]
    fn test_available_clamped_to_fuse(#[case] grid: PhaseCurrents, #[case] expected: f64) {
        let lb = balancer(16.0);
        let idle = PhaseCurrents::default();
        let state = lb.balance(&grid, Some(&idle), &CommandedState::UNKNOWN, 32.0);
        assert!(state.available_amps >= 0.0 && state.available_amps <= 16.0);
        assert!((state.available_amps - expected.min(15.2)).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_is_safe() {
        let state = balancer(16.0).unavailable(None);
        assert_eq!(state.current_limit_amps, 0.0);
        assert!(!state.overload_prevented);
    }
}
