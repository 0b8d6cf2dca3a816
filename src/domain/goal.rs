use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where the active goal came from.
///
/// Precedence, highest first: manual override, calendar, opportunistic
/// price tier, standard defaults.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GoalSource {
    Standard,
    ManualOverride,
    Calendar,
    OpportunisticPrice,
}

impl GoalSource {
    pub fn precedence(self) -> u8 {
        match self {
            GoalSource::ManualOverride => 3,
            GoalSource::Calendar => 2,
            GoalSource::OpportunisticPrice => 1,
            GoalSource::Standard => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGoal {
    pub target_soc: f64,
    pub deadline: DateTime<FixedOffset>,
    pub source: GoalSource,
}

/// User-supplied values for the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOverride {
    #[serde(default)]
    pub target_soc: Option<f64>,
    #[serde(default)]
    pub deadline: Option<DateTime<FixedOffset>>,
}

impl SessionOverride {
    pub fn is_empty(&self) -> bool {
        self.target_soc.is_none() && self.deadline.is_none()
    }
}
