//! HTTP API server command, `kanban serve`.

use anyhow::Result;
use kanban::board::server::{ServerConfig, start_server};
use kanban::config::ServiceConfig;
use kanban::telemetry;

pub async fn cmd_serve(config: ServiceConfig, dev: bool) -> Result<()> {
    let _guard = telemetry::init_tracing(config.log_format, config.log_dir.as_deref(), config.debug)?;
    tracing::info!(
        env = %config.env,
        version = %config.version,
        "starting {}",
        config.project_name
    );

    start_server(ServerConfig {
        service: config,
        dev_mode: dev,
    })
    .await
}
