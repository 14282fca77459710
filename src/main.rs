use std::time::Duration;

use mcp_tool_server::{
    build_app,
    config::Config,
    logging,
    services::{resource, session, telemetry},
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;

    tokio::spawn(session::run_session_reaper(
        state.sessions.clone(),
        Duration::from_secs(config.session_cleanup_interval_secs),
    ));
    tokio::spawn(resource::run_resource_reaper(
        state.resources.clone(),
        Duration::from_secs(config.resource_cleanup_interval_secs),
    ));
    tokio::spawn(telemetry::run_telemetry_pruner(
        state.telemetry.clone(),
        Duration::from_secs(config.telemetry_prune_interval_secs),
        chrono::Duration::seconds(config.telemetry_retention_secs),
    ));

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_socket()?).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        tools = state.tools.len(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
