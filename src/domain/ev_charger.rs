use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// EV Charger-specific errors
#[derive(Debug, Error)]
pub enum ChargerError {
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Invalid current: {0}A (out of supported range)")]
    InvalidCurrent(f64),
    #[error("Charger in fault state: {0}")]
    Fault(String),
    #[error("Charger offline or unavailable")]
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

/// Command side of the charger. Both commands are idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvCharger: Send + Sync {
    async fn set_current_limit(&self, amps: f64) -> Result<()>;
    async fn set_power(&self, state: PowerState) -> Result<()>;
}

/// Last state the charger confirmed. Never updated optimistically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandedState {
    pub power: Option<PowerState>,
    pub current_limit_amps: Option<f64>,
}

impl CommandedState {
    pub const UNKNOWN: CommandedState = CommandedState {
        power: None,
        current_limit_amps: None,
    };

    pub fn is_charging(&self) -> bool {
        self.power == Some(PowerState::On) && self.current_limit_amps.unwrap_or(0.0) > 0.0
    }

    /// Amps the charger is presumed to draw, used when no current sensors exist.
    pub fn presumed_amps(&self) -> f64 {
        if self.power == Some(PowerState::On) {
            self.current_limit_amps.unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

impl Default for CommandedState {
    fn default() -> Self {
        Self::UNKNOWN
    }
}
