use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::domain::{SocRefreshPolicy, UserSettings};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub charger: ChargerConfig,
    #[validate(nested)]
    pub vehicle: VehicleConfig,
    #[validate(nested)]
    pub goal: GoalConfig,
    #[validate(nested)]
    pub tiers: TierConfig,
    #[validate(nested)]
    pub maintenance: MaintenanceConfig,
    #[validate(nested)]
    pub pricing: PricingConfig,
    #[validate(nested)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub enable_cors: bool,
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    /// Control cycle cadence
    #[validate(range(min = 1, max = 3600))]
    pub tick_seconds: u64,
    /// Upper bound for any single sensor read or actuator command
    #[validate(range(min = 100, max = 60000))]
    pub io_timeout_ms: u64,
    /// IANA timezone used for day boundaries and departure times
    pub timezone: Tz,
    /// Minutes to keep charging after the planned session end
    #[validate(range(max = 120))]
    pub buffer_minutes: i64,
    /// After startup the charger is left alone until readings have settled
    #[validate(range(max = 600))]
    pub startup_grace_secs: u64,
}

impl ControllerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChargerConfig {
    #[validate(range(min = 6.0, max = 200.0))]
    pub main_fuse_amps: f64,
    #[validate(range(min = 1, max = 3))]
    pub phases: u8,
    #[validate(range(min = 100.0, max = 400.0))]
    pub voltage_v: f64,
    /// Current used to estimate charge power when planning
    #[validate(range(min = 6.0, max = 80.0))]
    pub nominal_amps: f64,
    #[validate(range(min = 6.0, max = 80.0))]
    pub max_amps: f64,
    #[validate(range(min = 0.0, max = 32.0))]
    pub min_operating_amps: f64,
    /// Fraction of the main fuse held back (0.05 = 5%)
    #[validate(range(min = 0.0, max = 0.5))]
    pub safety_margin: f64,
}

impl ChargerConfig {
    /// Nominal charge power in kW at `nominal_amps` across all phases.
    pub fn nominal_power_kw(&self) -> f64 {
        self.nominal_amps * self.voltage_v * f64::from(self.phases) / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VehicleConfig {
    #[validate(range(min = 1.0, max = 250.0))]
    pub capacity_kwh: f64,
    /// Charging losses in percent (10.0 = 10%)
    #[validate(range(min = 0.0, max = 50.0))]
    pub efficiency_loss_pct: f64,
    /// Charge limit set in the vehicle itself
    #[validate(range(min = 50.0, max = 100.0))]
    pub charge_limit_pct: f64,
    pub soc_refresh: SocRefreshPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GoalConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub target_soc: f64,
    pub departure_time: NaiveTime,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc: f64,
    pub smart_charging_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TierConfig {
    pub enabled: bool,
    /// Live price at or below which the target is raised
    pub cheap_price: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub cheap_target_soc: f64,
    /// Live price at or above which the target is lowered
    pub expensive_price: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub expensive_target_soc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub price_threshold: f64,
    #[validate(range(min = 0.0, max = 32.0))]
    pub current_amps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PricingConfig {
    #[validate(range(min = 0.0))]
    pub extra_fee: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub vat_pct: f64,
    #[validate(length(min = 1, max = 8))]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    #[validate(range(max = 60000))]
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                enable_cors: false,
                request_timeout_secs: 30,
            },
            controller: ControllerConfig {
                tick_seconds: 30,
                io_timeout_ms: 5000,
                timezone: chrono_tz::Europe::Stockholm,
                buffer_minutes: 15,
                startup_grace_secs: 120,
            },
            charger: ChargerConfig {
                main_fuse_amps: 20.0,
                phases: 3,
                voltage_v: 230.0,
                nominal_amps: 16.0,
                max_amps: 16.0,
                min_operating_amps: 6.0,
                safety_margin: 0.05,
            },
            vehicle: VehicleConfig {
                capacity_kwh: 64.0,
                efficiency_loss_pct: 10.0,
                charge_limit_pct: 100.0,
                soc_refresh: SocRefreshPolicy::Never,
            },
            goal: GoalConfig {
                target_soc: 80.0,
                departure_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
                min_soc: 20.0,
                smart_charging_enabled: true,
            },
            tiers: TierConfig {
                enabled: true,
                cheap_price: 0.5,
                cheap_target_soc: 100.0,
                expensive_price: 3.0,
                expensive_target_soc: 60.0,
            },
            maintenance: MaintenanceConfig {
                enabled: true,
                price_threshold: 1.5,
                current_amps: 0.0,
            },
            pricing: PricingConfig {
                extra_fee: 0.0,
                vat_pct: 0.0,
                currency: "SEK".to_string(),
            },
            persistence: PersistenceConfig {
                path: PathBuf::from("data/state.json"),
                debounce_ms: 1000,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("EVC__").split("__"));
        let cfg: Config = figment.extract().context("failed to read configuration")?;
        cfg.check()?;
        Ok(cfg)
    }

    /// User settings as configured, before any persisted values are applied.
    pub fn user_settings(&self) -> UserSettings {
        UserSettings {
            target_soc: self.goal.target_soc,
            departure_time: self.goal.departure_time,
            min_soc: self.goal.min_soc,
            smart_charging_enabled: self.goal.smart_charging_enabled,
            price_extra_fee: self.pricing.extra_fee,
            price_vat_pct: self.pricing.vat_pct,
        }
    }

    /// Field-level validation plus the cross-field rules validator cannot express.
    pub fn check(&self) -> Result<()> {
        self.validate().context("invalid configuration")?;
        if self.charger.min_operating_amps > self.charger.main_fuse_amps {
            anyhow::bail!(
                "charger.min_operating_amps ({}) exceeds charger.main_fuse_amps ({})",
                self.charger.min_operating_amps,
                self.charger.main_fuse_amps
            );
        }
        if self.charger.nominal_amps > self.charger.max_amps {
            anyhow::bail!(
                "charger.nominal_amps ({}) exceeds charger.max_amps ({})",
                self.charger.nominal_amps,
                self.charger.max_amps
            );
        }
        if self.tiers.enabled && self.tiers.cheap_price >= self.tiers.expensive_price {
            anyhow::bail!("tiers.cheap_price must be below tiers.expensive_price");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.check().is_ok());
        assert_eq!(cfg.controller.tick_seconds, 30);
        assert_eq!(cfg.charger.min_operating_amps, 6.0);
        assert_eq!(cfg.charger.safety_margin, 0.05);
    }

    #[test]
    fn test_nominal_power() {
        let cfg = Config::default();
        // 16A * 230V * 3 phases = 11.04 kW
        assert!((cfg.charger.nominal_power_kw() - 11.04).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let mut cfg = Config::default();
        cfg.vehicle.capacity_kwh = 0.0;
        assert!(cfg.check().is_err());

        let mut cfg = Config::default();
        cfg.goal.target_soc = 120.0;
        assert!(cfg.check().is_err());
    }

    #[test]
    fn test_rejects_inverted_tiers() {
        let mut cfg = Config::default();
        cfg.tiers.cheap_price = 2.0;
        cfg.tiers.expensive_price = 1.0;
        assert!(cfg.check().is_err());

        cfg.tiers.enabled = false;
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn test_env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EVC__CHARGER__MAIN_FUSE_AMPS", "25");
            jail.set_env("EVC__CONTROLLER__TIMEZONE", "Europe/Oslo");
            let cfg = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(cfg.charger.main_fuse_amps, 25.0);
            assert_eq!(cfg.controller.timezone, chrono_tz::Europe::Oslo);
            Ok(())
        });
    }

    #[test]
    fn test_soc_refresh_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EVC__VEHICLE__SOC_REFRESH", "1h");
            let cfg = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(cfg.vehicle.soc_refresh, SocRefreshPolicy::EveryHour);
            Ok(())
        });
    }
}
