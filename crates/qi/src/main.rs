//! Binary entry point: load configuration, start logging, build a `Hub`,
//! serve the WebSocket endpoint until a shutdown signal arrives.

use std::sync::Arc;

use qi_runtime::{config, runtime, Hub};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config()?;
    runtime::init_logging_once(config.log_level.as_tracing_level());

    let hub = Arc::new(Hub::new(config.clone()));
    info!(addr = %config.bind_addr, path = %config.ws_path, dev_mode = config.dev_mode, "starting qi");

    qi_transport::serve(hub, config.bind_addr, &config.ws_path, runtime::shutdown_signal()).await?;

    info!("qi stopped");
    Ok(())
}
