use tracing::debug;

use crate::config::TierConfig;
use crate::domain::{GoalSource, SessionGoal};

/// Goal after opportunistic price tiers have been evaluated against the live price.
#[derive(Debug, Clone, PartialEq)]
pub struct TierOutcome {
    pub goal: SessionGoal,
    /// The cheap tier fired and may start charging outside planned slots
    pub cheap_triggered: bool,
}

/// Raise or lower the target based on the live price.
///
/// Only a standard goal is adjusted. Manual overrides and calendar goals are
/// explicit user intent and are left as they are.
pub fn apply_tiers(tiers: &TierConfig, goal: &SessionGoal, live_price: Option<f64>) -> TierOutcome {
    let unchanged = TierOutcome {
        goal: goal.clone(),
        cheap_triggered: false,
    };
    let Some(price) = live_price else {
        return unchanged;
    };
    if !tiers.enabled || goal.source != GoalSource::Standard {
        return unchanged;
    }

    if price <= tiers.cheap_price {
        if tiers.cheap_target_soc <= goal.target_soc {
            debug!(price, "cheap price tier triggered at the standard target");
            return TierOutcome {
                goal: goal.clone(),
                cheap_triggered: true,
            };
        }
        debug!(price, target_soc = tiers.cheap_target_soc, "cheap price tier raised target");
        return TierOutcome {
            goal: SessionGoal {
                target_soc: tiers.cheap_target_soc,
                deadline: goal.deadline,
                source: GoalSource::OpportunisticPrice,
            },
            cheap_triggered: true,
        };
    }

    if price >= tiers.expensive_price && tiers.expensive_target_soc < goal.target_soc {
        debug!(
            price,
            target_soc = tiers.expensive_target_soc,
            "expensive price tier lowered target"
        );
        return TierOutcome {
            goal: SessionGoal {
                target_soc: tiers.expensive_target_soc,
                deadline: goal.deadline,
                source: GoalSource::OpportunisticPrice,
            },
            cheap_triggered: false,
        };
    }

    unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rstest::rstest;

    fn tiers() -> TierConfig {
        TierConfig {
            enabled: true,
            cheap_price: 0.5,
            cheap_target_soc: 100.0,
            expensive_price: 3.0,
            expensive_target_soc: 60.0,
        }
    }

    fn goal(source: GoalSource) -> SessionGoal {
        SessionGoal {
            target_soc: 80.0,
            deadline: DateTime::parse_from_rfc3339("2025-01-16T07:00:00+01:00").unwrap(),
            source,
        }
    }

    #[rstest]
    #[case(Some(0.2), 100.0, true)]
    #[case(Some(0.5), 100.0, true)]
    #[case(Some(1.0), 80.0, false)]
    #[case(Some(3.0), 60.0, false)]
    #[case(Some(9.0), 60.0, false)]
    #[case(None, 80.0, false)]
    fn test_standard_goal_follows_tiers(
        #[case] price: Option<f64>,
        #[case] expected_target: f64,
        #[case] triggered: bool,
    ) {
        let out = apply_tiers(&tiers(), &goal(GoalSource::Standard), price);
        assert_eq!(out.goal.target_soc, expected_target);
        assert_eq!(out.cheap_triggered, triggered);
    }

    #[rstest]
    #[case(GoalSource::ManualOverride)]
    #[case(GoalSource::Calendar)]
    fn test_explicit_goals_ignore_tiers(#[case] source: GoalSource) {
        let g = goal(source);
        assert_eq!(apply_tiers(&tiers(), &g, Some(0.1)).goal, g);
        assert_eq!(apply_tiers(&tiers(), &g, Some(5.0)).goal, g);
    }

    #[test]
    fn test_cheap_trigger_fires_without_raising_target() {
        let mut g = goal(GoalSource::Standard);
        g.target_soc = 100.0;
        let out = apply_tiers(&tiers(), &g, Some(0.3));
        assert!(out.cheap_triggered);
        assert_eq!(out.goal, g);
    }

    #[test]
    fn test_disabled_tiers() {
        let mut cfg = tiers();
        cfg.enabled = false;
        let out = apply_tiers(&cfg, &goal(GoalSource::Standard), Some(0.1));
        assert_eq!(out.goal.target_soc, 80.0);
        assert!(!out.cheap_triggered);
    }
}
