pub mod action_log;
pub mod actuator;
pub mod overload;
pub mod persistence;
pub mod recorder;
pub mod session;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::balancer::{BalancerConfig, LoadBalancer};
use crate::config::Config;
use crate::domain::{
    ChargeMode, ChargingPlan, CommandedState, EnergyState, EvCharger, GoalSource,
    LoadBalanceState, PlanStatus, ScheduleEntry, SensorReader, SessionGoal, SessionOverride,
    UserSettings,
};
use crate::error::PlanningError;
use crate::estimator::{applied_amps, SocEstimator};
use crate::planner::{self, PlanInputs, PlannerParams};
use crate::pricing::{PriceHorizon, PriceModel, PriceStatus};

pub use action_log::{ActionLog, LogEntry};
pub use actuator::{ActuatorDriver, ChargerIntent};
pub use overload::OverloadLedger;
pub use persistence::{spawn_saver, JsonFileStore, PersistedState, SaveHandle, SettingsStore};
pub use recorder::{SessionPoint, SessionRecorder, SessionReport};
pub use session::{SessionError, SessionMachine, SessionState, Transition};

/// Merged result of one control cycle, as exposed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    pub computed_at: DateTime<FixedOffset>,
    pub session_state: SessionState,
    pub should_charge_now: bool,
    pub current_limit_amps: f64,
    pub charge_mode: ChargeMode,
    pub charging_schedule: Vec<ScheduleEntry>,
    pub planned_target_soc: f64,
    pub goal_source: GoalSource,
    pub deadline: DateTime<FixedOffset>,
    /// Start of the next selected slot after now
    pub next_charge_start: Option<DateTime<FixedOffset>>,
    pub session_end_time: Option<DateTime<FixedOffset>>,
    pub price_horizon_covers_departure: bool,
    pub prevented_minutes_this_session: f64,
    pub soc_virtual: f64,
    pub plan_status: PlanStatus,
    pub total_cost: f64,
    pub current_price: Option<f64>,
    pub price_status: PriceStatus,
    pub session_id: Option<Uuid>,
    /// Energy drawn so far in the running session
    pub session_added_kwh: f64,
    pub session_cost: f64,
    pub anomalies: Vec<PlanningError>,
}

/// Full internal state after a cycle, for offline reproduction of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub taken_at: DateTime<FixedOffset>,
    pub session_state: SessionState,
    pub manual_override: Option<SessionOverride>,
    pub settings: UserSettings,
    pub energy: EnergyState,
    pub goal: SessionGoal,
    pub price_horizon: PriceHorizon,
    pub plan: ChargingPlan,
    pub load_balance: LoadBalanceState,
    pub overload: OverloadLedger,
    pub commanded: CommandedState,
    pub output: ControlOutput,
}

/// Mutable state shared by the timer and the on-demand operations.
/// Always accessed under the controller's mutex.
pub struct ControlContext {
    session: SessionMachine,
    estimator: SocEstimator,
    ledger: OverloadLedger,
    actuator: ActuatorDriver,
    settings: UserSettings,
    action_log: ActionLog,
    recorder: SessionRecorder,
    last_session: Option<SessionReport>,
    last_cycle_at: Option<DateTime<FixedOffset>>,
    last_session_end: Option<DateTime<FixedOffset>>,
    last_snapshot: Option<DebugSnapshot>,
    /// Set by operator actions so the next cycle persists
    save_pending: bool,
    /// Anomaly kinds present last cycle; only new ones reach the action log
    reported_anomalies: BTreeSet<&'static str>,
    last_soc_refresh: Option<DateTime<FixedOffset>>,
    actuation_hold_until: Option<Instant>,
}

impl ControlContext {
    fn new(cfg: &Config, charger: Arc<dyn EvCharger>) -> Self {
        Self {
            session: SessionMachine::new(),
            estimator: SocEstimator::new(
                cfg.vehicle.capacity_kwh,
                cfg.vehicle.efficiency_loss_pct,
                cfg.charger.voltage_v,
                cfg.charger.phases,
            )
            .with_ceiling(cfg.vehicle.charge_limit_pct),
            ledger: OverloadLedger::new(),
            actuator: ActuatorDriver::new(charger, cfg.controller.io_timeout()),
            settings: cfg.user_settings(),
            action_log: ActionLog::new(),
            recorder: SessionRecorder::new(),
            last_session: None,
            last_cycle_at: None,
            last_session_end: None,
            last_snapshot: None,
            save_pending: false,
            reported_anomalies: BTreeSet::new(),
            last_soc_refresh: None,
            actuation_hold_until: None,
        }
    }

    fn persisted(&self) -> PersistedState {
        PersistedState {
            settings: Some(self.settings.clone()),
            action_log: self.action_log.entries(),
            last_session: self.last_session.clone(),
        }
    }
}

/// Sensor values gathered at the start of a cycle
struct Readings {
    soc: Option<crate::domain::SocReading>,
    plugged: Option<bool>,
    grid: Option<crate::domain::PhaseCurrents>,
    charger: Option<crate::domain::PhaseCurrents>,
    prices: Option<crate::domain::RawPriceData>,
    calendar: Vec<crate::domain::CalendarEvent>,
}

pub struct ChargeController {
    cfg: Config,
    sensors: Arc<dyn SensorReader>,
    price_model: PriceModel,
    balancer: LoadBalancer,
    ctx: Mutex<ControlContext>,
    saver: Option<SaveHandle>,
}

impl ChargeController {
    pub fn new(
        cfg: Config,
        sensors: Arc<dyn SensorReader>,
        charger: Arc<dyn EvCharger>,
        saver: Option<SaveHandle>,
    ) -> Self {
        let ctx = ControlContext::new(&cfg, charger);
        Self {
            price_model: PriceModel::new(cfg.controller.timezone),
            balancer: LoadBalancer::new(BalancerConfig::from(&cfg.charger)),
            sensors,
            ctx: Mutex::new(ctx),
            saver,
            cfg,
        }
    }

    /// Apply previously persisted settings, log and last session.
    pub async fn restore(&self, state: PersistedState) {
        let now = Local::now().fixed_offset();
        let mut ctx = self.ctx.lock().await;
        if let Some(settings) = state.settings {
            match settings.validate() {
                Ok(()) => ctx.settings = settings,
                Err(e) => warn!(error = %e, "ignoring persisted settings"),
            }
        }
        ctx.action_log = ActionLog::from_entries(state.action_log, now);
        ctx.last_session = state.last_session;
        info!(log_entries = ctx.action_log.len(), "persisted state restored");
    }

    /// Timer loop. Never returns; a bad cycle degrades, it does not stop the loop.
    pub async fn run(&self) {
        self.hold_actuation(self.cfg.controller.startup_grace()).await;
        let mut interval = tokio::time::interval(self.cfg.controller.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.run_cycle().await;
        }
    }

    /// Plan and report as usual but leave the charger untouched for `grace`.
    pub async fn hold_actuation(&self, grace: std::time::Duration) {
        if grace.is_zero() {
            return;
        }
        info!(grace_secs = grace.as_secs(), "charger commands held until readings settle");
        self.ctx.lock().await.actuation_hold_until = Some(Instant::now() + grace);
    }

    pub async fn run_cycle(&self) -> ControlOutput {
        self.cycle_at(Local::now().fixed_offset()).await
    }

    /// Force a recompute outside the timer.
    pub async fn force_recompute(&self) -> ControlOutput {
        info!("recompute requested");
        self.run_cycle().await
    }

    pub async fn set_override(
        &self,
        manual: SessionOverride,
    ) -> Result<ControlOutput, SessionError> {
        let now = Local::now().fixed_offset();
        {
            let mut ctx = self.ctx.lock().await;
            ctx.session.set_override(manual.clone(), now)?;
            let msg = format!(
                "Manual override set: target {}, deadline {}",
                manual
                    .target_soc
                    .map(|t| format!("{t:.0}%"))
                    .unwrap_or_else(|| "default".to_string()),
                manual
                    .deadline
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "default".to_string()),
            );
            ctx.action_log.push(now, msg);
            ctx.save_pending = true;
        }
        Ok(self.cycle_at(now).await)
    }

    pub async fn clear_override(&self) -> ControlOutput {
        let now = Local::now().fixed_offset();
        {
            let mut ctx = self.ctx.lock().await;
            if ctx.session.clear_override() {
                ctx.action_log.push(now, "Manual override cleared");
                ctx.save_pending = true;
            }
        }
        self.cycle_at(now).await
    }

    pub async fn settings(&self) -> UserSettings {
        self.ctx.lock().await.settings.clone()
    }

    pub async fn update_settings(&self, settings: UserSettings) -> Result<ControlOutput> {
        settings.validate()?;
        let now = Local::now().fixed_offset();
        {
            let mut ctx = self.ctx.lock().await;
            info!(
                target_soc = settings.target_soc,
                min_soc = settings.min_soc,
                smart = settings.smart_charging_enabled,
                "settings updated"
            );
            ctx.settings = settings;
            ctx.action_log.push(now, "Settings updated");
            ctx.save_pending = true;
        }
        Ok(self.cycle_at(now).await)
    }

    pub async fn status(&self) -> Option<ControlOutput> {
        self.ctx
            .lock()
            .await
            .last_snapshot
            .as_ref()
            .map(|s| s.output.clone())
    }

    pub async fn debug_state(&self) -> Option<DebugSnapshot> {
        self.ctx.lock().await.last_snapshot.clone()
    }

    pub async fn action_log(&self) -> Vec<LogEntry> {
        self.ctx.lock().await.action_log.entries()
    }

    pub async fn last_session(&self) -> Option<SessionReport> {
        self.ctx.lock().await.last_session.clone()
    }

    pub async fn overload_minutes(&self) -> f64 {
        self.ctx.lock().await.ledger.minutes()
    }

    /// One full control cycle at `now`.
    pub async fn cycle_at(&self, now: DateTime<FixedOffset>) -> ControlOutput {
        let mut ctx = self.ctx.lock().await;
        let mut anomalies = Vec::new();
        let readings = self.read_sensors(&mut anomalies).await;
        let mut persist = std::mem::take(&mut ctx.save_pending);

        // session transitions
        match ctx.session.observe_plug(readings.plugged) {
            Some(Transition::PluggedIn) => {
                ctx.ledger.reset();
                ctx.last_session_end = None;
                ctx.estimator.start_session();
                if let Some(reading) = readings.soc.as_ref() {
                    ctx.estimator.observe(reading);
                }
                let soc = ctx.estimator.soc();
                ctx.recorder.start(now, soc);
                ctx.action_log
                    .push(now, format!("Vehicle connected at {soc:.0}%"));
                persist = true;
            }
            Some(Transition::Unplugged) => {
                let overload = ctx.ledger.minutes();
                let soc = ctx.estimator.soc();
                if let Some(report) = ctx.recorder.finish(now, soc, overload) {
                    info!(
                        session_id = %report.session_id,
                        added_kwh = report.added_kwh,
                        cost = report.total_cost,
                        overload_minutes = overload,
                        "session closed"
                    );
                    ctx.action_log.push(
                        now,
                        format!(
                            "Vehicle disconnected: {:.1} kWh added, cost {:.2}",
                            report.added_kwh, report.total_cost
                        ),
                    );
                    ctx.last_session = Some(report);
                } else {
                    ctx.action_log.push(now, "Vehicle disconnected");
                }
                ctx.ledger.reset();
                ctx.last_session_end = None;
                persist = true;
            }
            None => {}
        }
        let connected = ctx.session.is_connected();

        // energy state
        let applied = if connected {
            applied_amps(readings.charger.as_ref(), &ctx.actuator.confirmed())
        } else {
            0.0
        };
        ctx.estimator.update(now, readings.soc.as_ref(), applied);
        if !ctx.estimator.is_seeded() {
            anomalies.push(PlanningError::MissingInput(
                "no state-of-charge reading yet".to_string(),
            ));
        }

        // goal
        let settings = ctx.settings.clone();
        let standard = SessionGoal {
            target_soc: settings.target_soc,
            deadline: planner::standard_deadline(
                now,
                settings.departure_time,
                self.cfg.controller.timezone,
            ),
            source: GoalSource::Standard,
        };
        let calendar = planner::calendar_goal(&readings.calendar, now);
        let goal =
            planner::resolve_goal(&standard, calendar.as_ref(), ctx.session.active_override());

        // plan
        let horizon = self.price_model.normalize(readings.prices.as_ref(), now);
        let params = PlannerParams::new(&self.cfg, &settings);
        let energy = ctx.estimator.state().clone();
        let plan = planner::plan(&PlanInputs {
            now,
            energy: &energy,
            goal: &goal,
            horizon: &horizon,
            prevented_minutes: ctx.ledger.minutes(),
            previous_session_end: ctx.last_session_end,
            params: &params,
        });
        if connected && plan.session_end_time.is_some() {
            ctx.last_session_end = plan.session_end_time;
        }
        anomalies.extend(plan.anomalies.iter().cloned());

        // vehicle SoC refresh
        let refresh = self.cfg.vehicle.soc_refresh;
        if connected
            && refresh.is_due(
                ctx.last_soc_refresh,
                now,
                ctx.estimator.soc(),
                plan.goal.target_soc,
            )
        {
            let timeout = self.cfg.controller.io_timeout();
            match timed(timeout, self.sensors.request_soc_refresh()).await {
                Ok(()) => {
                    let soc = ctx.estimator.soc();
                    info!(soc, policy = %refresh, "vehicle SoC refresh requested");
                    ctx.last_soc_refresh = Some(now);
                    ctx.action_log.push(
                        now,
                        format!("Requested SoC refresh from the vehicle (estimate {soc:.0}%)"),
                    );
                    persist = true;
                }
                Err(e) => {
                    warn!(error = %e, "vehicle SoC refresh failed");
                    anomalies.push(PlanningError::MissingInput(format!("soc refresh: {e}")));
                }
            }
        }

        // load balancing
        let wants_charge = connected && plan.should_charge_now;
        let requested = match (wants_charge, plan.charge_mode) {
            (true, ChargeMode::Normal) => self.cfg.charger.max_amps,
            (true, ChargeMode::Maintenance) => self.cfg.maintenance.current_amps,
            _ => 0.0,
        };
        let commanded = ctx.actuator.confirmed();
        let lb = match readings.grid.as_ref() {
            Some(grid) => self
                .balancer
                .balance(grid, readings.charger.as_ref(), &commanded, requested),
            None => {
                anomalies.push(PlanningError::MissingInput(
                    "grid current unavailable, holding charger at 0A".to_string(),
                ));
                self.balancer.unavailable(readings.charger.as_ref())
            }
        };

        // overload compensation
        if wants_charge && plan.charge_mode == ChargeMode::Normal && lb.overload_prevented {
            let minutes =
                overload::cycle_minutes(ctx.last_cycle_at, now, self.cfg.controller.tick());
            let first = ctx.ledger.minutes() == 0.0;
            ctx.ledger.record(minutes);
            if first {
                ctx.action_log.push(
                    now,
                    format!(
                        "Charging paused: only {:.1}A available below the {:.0}A minimum",
                        lb.available_amps, lb.min_operating_amps
                    ),
                );
                persist = true;
            }
        }

        // actuate
        let intent = match (wants_charge, plan.charge_mode) {
            (true, ChargeMode::Maintenance) => ChargerIntent::charging(lb.current_limit_amps),
            (true, ChargeMode::Normal) if lb.current_limit_amps > 0.0 => {
                ChargerIntent::charging(lb.current_limit_amps)
            }
            _ => ChargerIntent::paused(),
        };
        let was_charging = ctx.actuator.confirmed().is_charging();
        let held = ctx
            .actuation_hold_until
            .is_some_and(|until| Instant::now() < until);
        if held {
            debug!(?intent, "startup grace, charger left untouched");
        } else {
            anomalies.extend(ctx.actuator.apply(intent).await);
        }
        let now_charging = ctx.actuator.confirmed().is_charging();
        if was_charging != now_charging {
            let msg = if now_charging {
                format!("Charging started at {:.1}A ({})", lb.current_limit_amps, plan.status)
            } else {
                format!("Charging stopped ({})", plan.status)
            };
            ctx.action_log.push(now, msg);
            persist = true;
        }

        let current_price = horizon.price_at(now);
        if connected {
            let adjusted = current_price.map(|p| params.cost.adjusted(p));
            let point = SessionPoint {
                at: now,
                soc: ctx.estimator.soc(),
                amps: if now_charging { lb.current_limit_amps } else { 0.0 },
                charging: now_charging,
                price: adjusted,
            };
            ctx.recorder
                .record(point, self.cfg.charger.voltage_v, self.cfg.charger.phases);
        }

        // new fault kinds go to the action log once, until they clear
        let mut kinds = BTreeSet::new();
        for anomaly in &anomalies {
            let kind = anomaly.kind();
            if kinds.insert(kind) && !ctx.reported_anomalies.contains(kind) {
                ctx.action_log.push(now, anomaly.to_string());
                persist = true;
            }
        }
        ctx.reported_anomalies = kinds;

        let output = ControlOutput {
            computed_at: now,
            session_state: ctx.session.state(),
            should_charge_now: wants_charge,
            current_limit_amps: if wants_charge { lb.current_limit_amps } else { 0.0 },
            charge_mode: if wants_charge {
                plan.charge_mode
            } else {
                ChargeMode::Off
            },
            charging_schedule: plan.schedule(),
            planned_target_soc: plan.goal.target_soc,
            goal_source: plan.goal.source,
            deadline: plan.goal.deadline,
            next_charge_start: plan.next_start_after(now),
            session_end_time: plan.session_end_time,
            price_horizon_covers_departure: plan.price_horizon_covers_departure,
            prevented_minutes_this_session: ctx.ledger.minutes(),
            soc_virtual: ctx.estimator.soc(),
            plan_status: plan.status,
            total_cost: plan.total_cost,
            current_price,
            price_status: PriceStatus::classify(&horizon, now),
            session_id: ctx.recorder.session_id(),
            session_added_kwh: ctx.recorder.added_kwh(),
            session_cost: ctx.recorder.total_cost(),
            anomalies,
        };

        debug!(
            connected,
            should_charge_now = output.should_charge_now,
            current_limit_amps = output.current_limit_amps,
            soc = output.soc_virtual,
            target_soc = output.planned_target_soc,
            prevented_minutes = output.prevented_minutes_this_session,
            anomalies = output.anomalies.len(),
            "control cycle complete"
        );

        ctx.last_snapshot = Some(DebugSnapshot {
            taken_at: now,
            session_state: ctx.session.state(),
            manual_override: ctx.session.active_override().cloned(),
            settings,
            energy: ctx.estimator.state().clone(),
            goal,
            price_horizon: horizon,
            plan,
            load_balance: lb,
            overload: ctx.ledger.clone(),
            commanded: ctx.actuator.confirmed(),
            output: output.clone(),
        });
        ctx.last_cycle_at = Some(now);

        if persist {
            if let Some(saver) = &self.saver {
                saver.request(ctx.persisted());
            }
        }
        output
    }

    async fn read_sensors(&self, anomalies: &mut Vec<PlanningError>) -> Readings {
        let timeout = self.cfg.controller.io_timeout();
        let s = &self.sensors;
        let (soc, plugged, grid, charger, prices, calendar) = tokio::join!(
            timed(timeout, s.read_soc()),
            timed(timeout, s.read_plugged()),
            timed(timeout, s.read_grid_current()),
            timed(timeout, s.read_charger_current()),
            timed(timeout, s.read_prices()),
            timed(timeout, s.read_calendar_events()),
        );

        Readings {
            soc: flatten("state of charge", soc, anomalies),
            plugged: flatten("plug state", plugged, anomalies),
            grid: flatten("grid current", grid, anomalies),
            charger: flatten("charger current", charger, anomalies),
            prices: flatten("prices", prices, anomalies),
            calendar: calendar
                .map_err(|e| {
                    debug!(error = %e, "calendar unavailable");
                })
                .unwrap_or_default(),
        }
    }
}

async fn timed<T, F>(timeout: std::time::Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}ms", timeout.as_millis()))?
}

/// Read failures become anomalies. An unavailable value (`Ok(None)`) is
/// left for the consumer to handle.
fn flatten<T>(
    what: &str,
    read: Result<Option<T>>,
    anomalies: &mut Vec<PlanningError>,
) -> Option<T> {
    match read {
        Ok(value) => value,
        Err(e) => {
            warn!(sensor = what, error = %e, "sensor read failed");
            anomalies.push(PlanningError::MissingInput(format!("{what}: {e}")));
            None
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub controller: Arc<ChargeController>,
}

impl AppState {
    /// Wire the controller to the simulated site and the configured state file.
    #[cfg(feature = "sim")]
    pub async fn new(cfg: Config) -> Result<Self> {
        let site = Arc::new(crate::simulation::SimulatedSite::new(&cfg));
        crate::simulation::spawn_site_driver(site.clone(), cfg.controller.tick());
        let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::new(&cfg.persistence.path));
        Self::with_devices(cfg, site.clone(), site, store).await
    }

    #[cfg(not(feature = "sim"))]
    pub async fn new(_cfg: Config) -> Result<Self> {
        anyhow::bail!("no device backend compiled in; build with the `sim` feature")
    }

    pub async fn with_devices(
        cfg: Config,
        sensors: Arc<dyn SensorReader>,
        charger: Arc<dyn EvCharger>,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let saver = spawn_saver(
            store.clone(),
            std::time::Duration::from_millis(cfg.persistence.debounce_ms),
        );
        let controller = Arc::new(ChargeController::new(
            cfg.clone(),
            sensors,
            charger,
            Some(saver),
        ));
        match store.load().await {
            Ok(Some(state)) => controller.restore(state).await,
            Ok(None) => info!("no persisted state, starting from configuration"),
            Err(e) => warn!(
                error = %e,
                "failed to load persisted state, starting from configuration"
            ),
        }
        Ok(Self { cfg, controller })
    }
}

pub fn spawn_controller_tasks(state: &AppState) {
    let controller = state.controller.clone();
    tokio::spawn(async move {
        controller.run().await;
    });
}
