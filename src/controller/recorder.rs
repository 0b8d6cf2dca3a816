use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cycle's worth of session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPoint {
    pub at: DateTime<FixedOffset>,
    pub soc: f64,
    /// Per-phase current flowing during the cycle
    pub amps: f64,
    pub charging: bool,
    /// Price including fees and VAT, when known
    pub price: Option<f64>,
}

/// Summary produced when a vehicle is unplugged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub start_soc: f64,
    pub end_soc: f64,
    pub added_kwh: f64,
    pub total_cost: f64,
    pub overload_minutes: f64,
    pub points: Vec<SessionPoint>,
}

const MAX_POINTS: usize = 5760;

/// Accumulates energy and cost while a vehicle is connected.
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    start: Option<(Uuid, DateTime<FixedOffset>, f64)>,
    points: Vec<SessionPoint>,
    added_kwh: f64,
    total_cost: f64,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.start.map(|(id, _, _)| id)
    }

    pub fn start(&mut self, at: DateTime<FixedOffset>, soc: f64) {
        *self = Self {
            start: Some((Uuid::new_v4(), at, soc)),
            ..Self::default()
        };
    }

    /// Record a cycle. Energy for the interval since the previous point is
    /// booked at the previous point's current and price.
    pub fn record(&mut self, point: SessionPoint, voltage_v: f64, phases: u8) {
        if self.start.is_none() {
            self.start = Some((Uuid::new_v4(), point.at, point.soc));
        }
        if let Some(prev) = self.points.last() {
            let hours = (point.at - prev.at).num_milliseconds().max(0) as f64 / 3_600_000.0;
            if prev.charging && prev.amps > 0.0 {
                let kwh = prev.amps * voltage_v * f64::from(phases) * hours / 1000.0;
                self.added_kwh += kwh;
                self.total_cost += kwh * prev.price.unwrap_or(0.0);
            }
        }
        if self.points.len() >= MAX_POINTS {
            self.points.remove(0);
        }
        self.points.push(point);
    }

    pub fn added_kwh(&self) -> f64 {
        self.added_kwh
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Close the session. `None` if nothing was recorded.
    pub fn finish(
        &mut self,
        at: DateTime<FixedOffset>,
        end_soc: f64,
        overload_minutes: f64,
    ) -> Option<SessionReport> {
        let (session_id, start_time, start_soc) = self.start.take()?;
        let report = SessionReport {
            session_id,
            start_time,
            end_time: at,
            start_soc,
            end_soc,
            added_kwh: self.added_kwh,
            total_cost: self.total_cost,
            overload_minutes,
            points: std::mem::take(&mut self.points),
        };
        *self = Self::default();
        Some(report)
    }
}
