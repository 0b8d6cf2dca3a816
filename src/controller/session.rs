use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::info;

use crate::domain::SessionOverride;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("override must set a target SoC or a deadline")]
    EmptyOverride,
    #[error("override target {0}% is outside 0-100%")]
    InvalidTarget(f64),
    #[error("override deadline {0} is in the past")]
    DeadlineInPast(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    ConnectedStandard,
    ConnectedOverride,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

/// Plug transition observed in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    PluggedIn,
    Unplugged,
}

/// Tracks plug state and the manual override lifecycle.
///
/// An override set while no vehicle is connected is held for the next
/// session. Unplugging always discards it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMachine {
    connected: bool,
    manual: Option<SessionOverride>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        match (self.connected, &self.manual) {
            (false, _) => SessionState::Disconnected,
            (true, Some(_)) => SessionState::ConnectedOverride,
            (true, None) => SessionState::ConnectedStandard,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn active_override(&self) -> Option<&SessionOverride> {
        self.manual.as_ref()
    }

    /// Feed the latest plug reading. `None` (unknown) never causes a transition.
    pub fn observe_plug(&mut self, plugged: Option<bool>) -> Option<Transition> {
        match (self.connected, plugged?) {
            (false, true) => {
                self.connected = true;
                info!(has_override = self.manual.is_some(), "Vehicle plugged in");
                Some(Transition::PluggedIn)
            }
            (true, false) => {
                self.connected = false;
                if self.manual.take().is_some() {
                    info!("Vehicle unplugged, manual override discarded");
                } else {
                    info!("Vehicle unplugged");
                }
                Some(Transition::Unplugged)
            }
            _ => None,
        }
    }

    pub fn set_override(
        &mut self,
        manual: SessionOverride,
        now: DateTime<FixedOffset>,
    ) -> Result<SessionState, SessionError> {
        if manual.is_empty() {
            return Err(SessionError::EmptyOverride);
        }
        if let Some(target) = manual.target_soc {
            if !(0.0..=100.0).contains(&target) || target.is_nan() {
                return Err(SessionError::InvalidTarget(target));
            }
        }
        if let Some(deadline) = manual.deadline {
            if deadline <= now {
                return Err(SessionError::DeadlineInPast(deadline));
            }
        }
        info!(
            target_soc = ?manual.target_soc,
            deadline = ?manual.deadline,
            connected = self.connected,
            "Manual override set"
        );
        self.manual = Some(manual);
        Ok(self.state())
    }

    /// Drop the override. Returns whether one was active.
    pub fn clear_override(&mut self) -> bool {
        let had = self.manual.take().is_some();
        if had {
            info!("Manual override cleared");
        }
        had
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 15, 18, 0, 0)
            .unwrap()
    }

    fn target(soc: f64) -> SessionOverride {
        SessionOverride {
            target_soc: Some(soc),
            deadline: None,
        }
    }

    #[test]
    fn test_plug_cycle() {
        let mut sm = SessionMachine::new();
        assert_eq!(sm.state(), SessionState::Disconnected);
        assert_eq!(sm.observe_plug(Some(true)), Some(Transition::PluggedIn));
        assert_eq!(sm.state(), SessionState::ConnectedStandard);
        assert_eq!(sm.observe_plug(Some(true)), None);
        assert_eq!(sm.observe_plug(Some(false)), Some(Transition::Unplugged));
        assert_eq!(sm.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_unknown_plug_state_keeps_session() {
        let mut sm = SessionMachine::new();
        sm.observe_plug(Some(true));
        assert_eq!(sm.observe_plug(None), None);
        assert!(sm.is_connected());
    }

    #[test]
    fn test_override_then_clear() {
        let mut sm = SessionMachine::new();
        sm.observe_plug(Some(true));
        assert_eq!(sm.set_override(target(90.0), t0()), Ok(SessionState::ConnectedOverride));
        assert_eq!(sm.active_override(), Some(&target(90.0)));
        assert!(sm.clear_override());
        assert_eq!(sm.state(), SessionState::ConnectedStandard);
        assert!(!sm.clear_override());
    }

    #[test]
    fn test_unplug_discards_override() {
        let mut sm = SessionMachine::new();
        sm.observe_plug(Some(true));
        sm.set_override(target(90.0), t0()).unwrap();
        sm.observe_plug(Some(false));
        assert!(sm.active_override().is_none());

        sm.observe_plug(Some(true));
        assert_eq!(sm.state(), SessionState::ConnectedStandard);
    }

    #[test]
    fn test_override_held_for_next_session() {
        let mut sm = SessionMachine::new();
        sm.set_override(target(70.0), t0()).unwrap();
        assert_eq!(sm.state(), SessionState::Disconnected);
        sm.observe_plug(Some(true));
        assert_eq!(sm.state(), SessionState::ConnectedOverride);
    }

    #[test]
    fn test_rejects_bad_overrides() {
        let mut sm = SessionMachine::new();
        assert_eq!(
            sm.set_override(SessionOverride::default(), t0()),
            Err(SessionError::EmptyOverride)
        );
        assert_eq!(
            sm.set_override(target(120.0), t0()),
            Err(SessionError::InvalidTarget(120.0))
        );
        let past = SessionOverride {
            target_soc: None,
            deadline: Some(t0() - Duration::hours(1)),
        };
        assert!(matches!(
            sm.set_override(past, t0()),
            Err(SessionError::DeadlineInPast(_))
        ));
    }
}
