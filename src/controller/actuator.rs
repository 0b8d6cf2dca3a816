use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{CommandedState, EvCharger, PowerState};
use crate::error::PlanningError;

/// Limits closer than this are treated as equal
const AMPS_TOLERANCE: f64 = 0.01;

/// What the charger should be doing after this cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargerIntent {
    pub power: PowerState,
    pub current_limit_amps: f64,
}

impl ChargerIntent {
    pub fn paused() -> Self {
        Self {
            power: PowerState::Off,
            current_limit_amps: 0.0,
        }
    }

    pub fn charging(amps: f64) -> Self {
        Self {
            power: PowerState::On,
            current_limit_amps: amps.max(0.0),
        }
    }
}

/// Drives the charger towards an intent, issuing only the commands needed.
///
/// The confirmed state changes only when the charger acknowledges a command
/// within the timeout. A failed command is retried on the next cycle simply
/// because the intent still differs from what was confirmed.
pub struct ActuatorDriver {
    charger: Arc<dyn EvCharger>,
    timeout: Duration,
    confirmed: CommandedState,
}

impl ActuatorDriver {
    pub fn new(charger: Arc<dyn EvCharger>, timeout: Duration) -> Self {
        Self {
            charger,
            timeout,
            confirmed: CommandedState::UNKNOWN,
        }
    }

    pub fn confirmed(&self) -> CommandedState {
        self.confirmed
    }

    fn limit_matches(&self, amps: f64) -> bool {
        self.confirmed
            .current_limit_amps
            .is_some_and(|c| (c - amps).abs() < AMPS_TOLERANCE)
    }

    /// Apply `intent`. Returns the failures, if any.
    ///
    /// Charging: limit first, then power on, and only once the limit is
    /// confirmed. Pausing: limit to 0, then power off.
    pub async fn apply(&mut self, intent: ChargerIntent) -> Vec<PlanningError> {
        let mut failures = Vec::new();

        if !self.limit_matches(intent.current_limit_amps) {
            let amps = intent.current_limit_amps;
            match self
                .command("set_current_limit", self.charger.set_current_limit(amps))
                .await
            {
                Ok(()) => {
                    info!(amps, "charger current limit set");
                    self.confirmed.current_limit_amps = Some(amps);
                }
                Err(e) => failures.push(e),
            }
        }

        let limit_ok = self.limit_matches(intent.current_limit_amps);
        let wants_power = intent.power == PowerState::On;
        if self.confirmed.power != Some(intent.power) && (!wants_power || limit_ok) {
            match self
                .command("set_power", self.charger.set_power(intent.power))
                .await
            {
                Ok(()) => {
                    info!(power = %intent.power, "charger power switched");
                    self.confirmed.power = Some(intent.power);
                }
                Err(e) => failures.push(e),
            }
        }

        failures
    }

    async fn command<F>(&self, name: &str, fut: F) -> Result<(), PlanningError>
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(command = name, error = %e, "charger command failed");
                Err(PlanningError::ActuatorCommandFailed(format!("{name}: {e}")))
            }
            Err(_) => {
                warn!(
                    command = name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "charger command timed out"
                );
                Err(PlanningError::ActuatorCommandFailed(format!("{name}: timed out")))
            }
        }
    }
}
