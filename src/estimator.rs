use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::domain::{clamp_soc, CommandedState, EnergyState, PhaseCurrents, SocReading};

/// Measured currents below this are treated as sensor noise.
const MEASURED_AMPS_NOISE_FLOOR: f64 = 0.5;

/// Virtual state-of-charge estimator.
///
/// Reconciles sparse vehicle readings with continuous integration of the
/// current actually flowing. A reading newer than the last one seen resets
/// the estimate exactly; between readings the estimate only moves while the
/// charger is drawing current.
#[derive(Debug, Clone)]
pub struct SocEstimator {
    state: EnergyState,
    voltage_v: f64,
    phases: u8,
    /// The vehicle's own charge limit; integration stops here
    ceiling: f64,
    last_update: Option<DateTime<FixedOffset>>,
}

impl SocEstimator {
    pub fn new(capacity_kwh: f64, efficiency_loss_pct: f64, voltage_v: f64, phases: u8) -> Self {
        Self {
            state: EnergyState::new(capacity_kwh, efficiency_loss_pct),
            voltage_v,
            phases,
            ceiling: 100.0,
            last_update: None,
        }
    }

    pub fn with_ceiling(mut self, charge_limit_pct: f64) -> Self {
        self.ceiling = clamp_soc(charge_limit_pct);
        self
    }

    pub fn state(&self) -> &EnergyState {
        &self.state
    }

    pub fn soc(&self) -> f64 {
        self.state.soc_virtual
    }

    /// True once at least one authoritative reading has been applied.
    pub fn is_seeded(&self) -> bool {
        self.state.soc_source_timestamp.is_some()
    }

    /// Apply a reading if it is newer than the last one. Returns whether it was applied.
    pub fn observe(&mut self, reading: &SocReading) -> bool {
        let fresh = self
            .state
            .soc_source_timestamp
            .map_or(true, |seen| reading.reported_at > seen);
        if !fresh {
            return false;
        }
        let soc = clamp_soc(reading.percent);
        debug!(
            soc,
            previous_virtual = self.state.soc_virtual,
            "virtual SoC reset from vehicle reading"
        );
        self.state.soc_actual = Some(soc);
        self.state.soc_virtual = soc;
        self.state.soc_source_timestamp = Some(reading.reported_at);
        true
    }

    /// Integrate `applied_amps` per phase over the time since the last call.
    pub fn integrate(&mut self, now: DateTime<FixedOffset>, applied_amps: f64) {
        let elapsed_hours = self
            .last_update
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        self.last_update = Some(now);

        if applied_amps <= 0.0 || elapsed_hours <= 0.0 {
            return;
        }
        let grid_kwh =
            applied_amps * self.voltage_v * f64::from(self.phases) * elapsed_hours / 1000.0;
        let gain = self.state.soc_gain(grid_kwh);
        let cap = self.ceiling.max(self.state.soc_virtual);
        self.state.soc_virtual = clamp_soc((self.state.soc_virtual + gain).min(cap));
    }

    /// One cycle: integrate the interval that just ended, then reconcile.
    pub fn update(
        &mut self,
        now: DateTime<FixedOffset>,
        reading: Option<&SocReading>,
        applied_amps: f64,
    ) {
        self.integrate(now, applied_amps);
        if let Some(reading) = reading {
            self.observe(reading);
        }
    }

    /// A new vehicle may be connected: nothing from the previous session is
    /// trusted. The estimate is 0% until the first reading arrives.
    pub fn start_session(&mut self) {
        self.state.soc_actual = None;
        self.state.soc_virtual = 0.0;
        self.state.soc_source_timestamp = None;
    }
}

/// Current the charger is drawing per phase.
///
/// A measured value is preferred; otherwise the last confirmed command is
/// used, never a nominal value.
pub fn applied_amps(measured: Option<&PhaseCurrents>, commanded: &CommandedState) -> f64 {
    match measured.map(PhaseCurrents::max) {
        Some(amps) if amps > MEASURED_AMPS_NOISE_FLOOR => amps,
        _ => commanded.presumed_amps(),
    }
}
