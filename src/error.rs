use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Degradations raised while running a control cycle.
///
/// None of these stop the cycle. They are collected on the cycle output and
/// written to the action log; the affected component falls back to its safe
/// default (ultimately `current_limit = 0`).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum PlanningError {
    /// A sensor, price feed or SoC reading was unavailable
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Price list length outside the accepted tolerance bands
    #[error("Invalid price data: {0}")]
    InvalidPriceData(String),

    /// Known prices do not reach the deadline, or do not hold enough slots
    #[error("Price horizon insufficient: {0}")]
    HorizonInsufficient(String),

    /// Charger did not confirm a command; retried next cycle
    #[error("Actuator command failed: {0}")]
    ActuatorCommandFailed(String),

    /// A setting was out of range and has been clamped
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// The goal deadline is already behind us; charging without a schedule
    #[error("Deadline passed: {0}")]
    DeadlinePassed(String),
}

impl PlanningError {
    /// Variant name, used to tell a new fault from one that persists
    pub fn kind(&self) -> &'static str {
        match self {
            PlanningError::MissingInput(_) => "MissingInput",
            PlanningError::InvalidPriceData(_) => "InvalidPriceData",
            PlanningError::HorizonInsufficient(_) => "HorizonInsufficient",
            PlanningError::ActuatorCommandFailed(_) => "ActuatorCommandFailed",
            PlanningError::ConfigurationInvalid(_) => "ConfigurationInvalid",
            PlanningError::DeadlinePassed(_) => "DeadlinePassed",
        }
    }
}
