//! # Site Simulation
//!
//! A deterministic stand-in for the host platform: household load following a
//! time-of-day profile, a vehicle that charges at whatever the charger allows,
//! and a synthetic day-ahead price curve.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ev_charge_controller::config::Config;
//! use ev_charge_controller::simulation::{spawn_site_driver, SimulatedSite};
//!
//! # async fn demo() {
//! let cfg = Config::default();
//! let site = Arc::new(SimulatedSite::new(&cfg));
//! spawn_site_driver(site.clone(), cfg.controller.tick());
//! # }
//! ```

pub mod household;
pub mod prices;
pub mod site;

pub use household::HouseholdProfile;
pub use site::{spawn_site_driver, SimulatedSite, SiteState};
