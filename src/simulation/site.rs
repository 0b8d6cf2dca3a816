use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::household::HouseholdProfile;
use super::prices::{day_prices, PUBLISH_HOUR};
use crate::config::Config;
use crate::domain::{
    parse_plug_state, CalendarEvent, ChargerError, CommandedState, EvCharger, PhaseCurrents,
    PowerState, RawPriceData, SensorReader, SocReading,
};

/// Everything the simulated site reports, plus failure switches.
#[derive(Debug, Clone)]
pub struct SiteState {
    /// Plug state as the vehicle integration reports it ("connected", "off", ...)
    pub plug_state: String,
    /// True vehicle state of charge
    pub vehicle_soc: f64,
    /// Last value the vehicle reported
    pub soc_report: Option<SocReading>,
    /// Whether the vehicle reports its SoC on its own every tick
    pub soc_auto_report: bool,
    pub soc_refresh_requests: u32,
    pub household: PhaseCurrents,
    /// Whether the charger has its own current sensors
    pub charger_sensors: bool,
    pub prices: Option<RawPriceData>,
    pub calendar: Vec<CalendarEvent>,
    pub grid_meter_online: bool,
    pub charger_online: bool,
    pub charger: CommandedState,
    last_tick: Option<DateTime<FixedOffset>>,
}

impl SiteState {
    pub fn plugged(&self) -> Option<bool> {
        parse_plug_state(&self.plug_state)
    }
}

/// A house with one charger and one vehicle.
///
/// Implements both the sensor and the charger side, so the controller can be
/// run end to end without hardware. The charger draws exactly its limit while
/// powered and the vehicle is plugged in and not full.
pub struct SimulatedSite {
    state: RwLock<SiteState>,
    profile: HouseholdProfile,
    timezone: Tz,
    capacity_kwh: f64,
    efficiency: f64,
    voltage_v: f64,
    phases: u8,
    max_amps: f64,
}

impl SimulatedSite {
    pub fn new(cfg: &Config) -> Self {
        let now = Utc::now().with_timezone(&cfg.controller.timezone).fixed_offset();
        let profile = HouseholdProfile {
            voltage_v: cfg.charger.voltage_v,
            ..Default::default()
        };
        let vehicle_soc = 35.0;
        let state = SiteState {
            plug_state: "connected".to_string(),
            vehicle_soc,
            soc_report: Some(SocReading {
                percent: vehicle_soc,
                reported_at: now,
            }),
            soc_auto_report: true,
            soc_refresh_requests: 0,
            household: profile.phase_currents(now.naive_local()),
            charger_sensors: true,
            prices: Some(prices_for(now, cfg.controller.timezone)),
            calendar: Vec::new(),
            grid_meter_online: true,
            charger_online: true,
            charger: CommandedState::UNKNOWN,
            last_tick: Some(now),
        };

        Self {
            state: RwLock::new(state),
            profile,
            timezone: cfg.controller.timezone,
            capacity_kwh: cfg.vehicle.capacity_kwh,
            efficiency: 1.0 - cfg.vehicle.efficiency_loss_pct / 100.0,
            voltage_v: cfg.charger.voltage_v,
            phases: cfg.charger.phases,
            max_amps: cfg.charger.max_amps,
        }
    }

    pub async fn snapshot(&self) -> SiteState {
        self.state.read().await.clone()
    }

    pub async fn set_plugged(&self, plugged: Option<bool>) {
        let raw = match plugged {
            Some(true) => "connected",
            Some(false) => "disconnected",
            None => "unavailable",
        };
        self.set_plug_state(raw).await;
    }

    pub async fn set_plug_state(&self, raw: &str) {
        self.state.write().await.plug_state = raw.to_string();
    }

    /// Set the vehicle SoC and report it at `at`.
    pub async fn set_soc(&self, percent: f64, at: DateTime<FixedOffset>) {
        let mut state = self.state.write().await;
        state.vehicle_soc = percent.clamp(0.0, 100.0);
        state.soc_report = Some(SocReading {
            percent: state.vehicle_soc,
            reported_at: at,
        });
    }

    /// Change the true SoC without the vehicle reporting it.
    pub async fn set_vehicle_soc(&self, percent: f64) {
        self.state.write().await.vehicle_soc = percent.clamp(0.0, 100.0);
    }

    pub async fn set_soc_auto_report(&self, enabled: bool) {
        self.state.write().await.soc_auto_report = enabled;
    }

    pub async fn set_household(&self, currents: PhaseCurrents) {
        self.state.write().await.household = currents;
    }

    pub async fn set_prices(&self, prices: Option<RawPriceData>) {
        self.state.write().await.prices = prices;
    }

    pub async fn set_calendar(&self, events: Vec<CalendarEvent>) {
        self.state.write().await.calendar = events;
    }

    pub async fn set_charger_sensors(&self, installed: bool) {
        self.state.write().await.charger_sensors = installed;
    }

    pub async fn set_grid_meter_online(&self, online: bool) {
        self.state.write().await.grid_meter_online = online;
    }

    pub async fn set_charger_online(&self, online: bool) {
        self.state.write().await.charger_online = online;
    }

    fn charger_draw(&self, state: &SiteState) -> PhaseCurrents {
        let drawing = state.plugged() == Some(true)
            && state.charger.power == Some(PowerState::On)
            && state.vehicle_soc < 100.0;
        if !drawing {
            return PhaseCurrents::default();
        }
        let amps = state.charger.current_limit_amps.unwrap_or(0.0).min(self.max_amps);
        PhaseCurrents::balanced(amps, self.phases)
    }

    /// Advance the vehicle to `now` and let it report its SoC.
    pub async fn tick(&self, now: DateTime<FixedOffset>) {
        let mut state = self.state.write().await;
        let elapsed_h = state
            .last_tick
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        state.last_tick = Some(now);

        let amps = self.charger_draw(&state).max();
        if amps > 0.0 && elapsed_h > 0.0 {
            let kwh = amps * self.voltage_v * f64::from(self.phases) / 1000.0 * elapsed_h;
            let gained = kwh * self.efficiency / self.capacity_kwh * 100.0;
            state.vehicle_soc = (state.vehicle_soc + gained).min(100.0);
        }
        if state.soc_auto_report && state.plugged().is_some() {
            state.soc_report = Some(SocReading {
                percent: state.vehicle_soc,
                reported_at: now,
            });
        }
    }

    /// Follow the household profile and the day's published prices.
    pub async fn refresh_environment(&self, now: DateTime<FixedOffset>) {
        let mut state = self.state.write().await;
        state.household = self.profile.phase_currents(now.naive_local());
        state.prices = Some(prices_for(now, self.timezone));
    }
}

/// Today's prices, with tomorrow's once they are published.
fn prices_for(now: DateTime<FixedOffset>, tz: Tz) -> RawPriceData {
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    let today_prices = day_prices(today, 24);
    if local.hour() < PUBLISH_HOUR {
        return RawPriceData::today_only(today_prices);
    }
    let tomorrow = today + ChronoDuration::days(1);
    RawPriceData::with_tomorrow(today_prices, day_prices(tomorrow, 24))
}

#[async_trait]
impl SensorReader for SimulatedSite {
    async fn read_soc(&self) -> Result<Option<SocReading>> {
        Ok(self.state.read().await.soc_report)
    }

    async fn read_plugged(&self) -> Result<Option<bool>> {
        Ok(self.state.read().await.plugged())
    }

    async fn read_grid_current(&self) -> Result<Option<PhaseCurrents>> {
        let state = self.state.read().await;
        if !state.grid_meter_online {
            return Ok(None);
        }
        let draw = self.charger_draw(&state);
        let mut total = state.household.0;
        for (slot, amps) in total.iter_mut().zip(draw.0) {
            *slot += amps;
        }
        Ok(Some(PhaseCurrents(total)))
    }

    async fn read_charger_current(&self) -> Result<Option<PhaseCurrents>> {
        let state = self.state.read().await;
        Ok(state.charger_sensors.then(|| self.charger_draw(&state)))
    }

    async fn read_prices(&self) -> Result<Option<RawPriceData>> {
        Ok(self.state.read().await.prices.clone())
    }

    async fn read_calendar_events(&self) -> Result<Vec<CalendarEvent>> {
        Ok(self.state.read().await.calendar.clone())
    }

    async fn request_soc_refresh(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.plugged() != Some(true) {
            anyhow::bail!("vehicle is not reachable");
        }
        state.soc_refresh_requests += 1;
        state.soc_report = Some(SocReading {
            percent: state.vehicle_soc,
            reported_at: Utc::now().with_timezone(&self.timezone).fixed_offset(),
        });
        debug!(soc = state.vehicle_soc, "simulated vehicle reported SoC on request");
        Ok(())
    }
}

#[async_trait]
impl EvCharger for SimulatedSite {
    async fn set_current_limit(&self, amps: f64) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.charger_online {
            return Err(ChargerError::Offline.into());
        }
        if !amps.is_finite() || amps < 0.0 || amps > self.max_amps {
            return Err(ChargerError::InvalidCurrent(amps).into());
        }
        state.charger.current_limit_amps = Some(amps);
        debug!(amps, "simulated charger limit set");
        Ok(())
    }

    async fn set_power(&self, power: PowerState) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.charger_online {
            return Err(ChargerError::Offline.into());
        }
        state.charger.power = Some(power);
        debug!(%power, "simulated charger power set");
        Ok(())
    }
}

/// Keep the simulated site moving in wall-clock time.
pub fn spawn_site_driver(site: Arc<SimulatedSite>, period: Duration) {
    info!(period_secs = period.as_secs(), "starting simulated site");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let now = Utc::now().with_timezone(&site.timezone).fixed_offset();
            site.tick(now).await;
            site.refresh_environment(now).await;
        }
    });
}
