use anyhow::Result;
use axum::Router;
use ev_charge_controller::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;
    info!(
        tz = %cfg.controller.timezone,
        fuse_amps = cfg.charger.main_fuse_amps,
        phases = cfg.charger.phases,
        tick_secs = cfg.controller.tick_seconds,
        "configuration loaded"
    );

    let app_state = controller::AppState::new(cfg.clone()).await?;
    let app: Router = api::router(app_state.clone(), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the API is reachable from the network");
    }

    controller::spawn_controller_tasks(&app_state);

    info!(%addr, "starting EV charge controller");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
