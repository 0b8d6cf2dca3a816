pub mod api;
pub mod balancer;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod estimator;
pub mod planner;
pub mod pricing;
#[cfg(feature = "sim")]
pub mod simulation;
pub mod telemetry;
