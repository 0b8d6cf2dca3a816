use serde::{Deserialize, Serialize};

/// Per-phase current in amps (L1, L2, L3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseCurrents(pub [f64; 3]);

impl PhaseCurrents {
    pub fn new(l1: f64, l2: f64, l3: f64) -> Self {
        Self([l1, l2, l3])
    }

    /// Same current on the first `phases` conductors, zero elsewhere.
    pub fn balanced(amps: f64, phases: u8) -> Self {
        let mut out = [0.0; 3];
        for slot in out.iter_mut().take(usize::from(phases.clamp(1, 3))) {
            *slot = amps;
        }
        Self(out)
    }

    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(0.0, f64::max)
    }

    /// Phase-wise `self - other`, never below zero.
    pub fn saturating_sub(&self, other: &PhaseCurrents) -> PhaseCurrents {
        let mut out = [0.0; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (self.0[i] - other.0[i]).max(0.0);
        }
        PhaseCurrents(out)
    }
}

/// Inputs and result of one load-balancing pass. Derived each cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalanceState {
    pub main_fuse_amps: f64,
    pub safety_margin_pct: f64,
    pub min_operating_amps: f64,
    pub grid_current_per_phase: PhaseCurrents,
    pub charger_current_per_phase: Option<PhaseCurrents>,
    /// Charger draw used in the calculation (measured or estimated)
    pub charger_current_used: PhaseCurrents,
    pub charger_current_estimated: bool,
    pub household_amps: f64,
    pub available_amps: f64,
    pub current_limit_amps: f64,
    pub overload_prevented: bool,
}
