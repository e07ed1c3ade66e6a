/*!
 * StationLink
 *
 * Connects to the device daemon, shows air-quality readings on the display
 * and runs until a key is pressed or Ctrl-C is received.
 */
use std::io::Read;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use stationlink_core::config::{ConfigBuilder, DEFAULT_CONFIG_FILE, DEFAULT_ENV_PREFIX};
use stationlink_core::logging;

mod app;
mod backend;

use app::App;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigBuilder::new()
        .with_config_file(DEFAULT_CONFIG_FILE)
        .with_environment_prefix(DEFAULT_ENV_PREFIX)
        .build()
        .context("Failed to load configuration")?;
    logging::init_with_filter(&config.logging.level).context("Failed to initialize logging")?;

    info!("Weather Station: Start");

    let daemon = backend::create_daemon(config.daemon.backend);
    let app = App::start(config, daemon).await?;

    debug!(
        "Connected to {} using the {:?} backend",
        app.connection().endpoint(),
        app.config().get().daemon.backend
    );
    info!("Press key to exit");
    wait_for_exit().await;

    if let Some(reading) = app.registry().adapter().last_reading() {
        debug!("Last reading: {:?}", reading);
    }
    debug!(
        "{} readings kept in the history",
        app.registry().adapter().history().len()
    );

    app.shutdown().await;
    info!("Weather Station: End");
    Ok(())
}

/// Wait for one byte on stdin or Ctrl-C
///
/// A closed stdin leaves Ctrl-C as the only way out.
async fn wait_for_exit() {
    tokio::select! {
        key = read_key() => match key {
            Ok(0) => {
                debug!("Standard input closed, waiting for Ctrl-C");
                wait_for_ctrl_c().await;
            }
            Ok(_) => debug!("Key pressed"),
            Err(e) => {
                warn!("Failed to read standard input: {}", e);
                wait_for_ctrl_c().await;
            }
        },
        _ = wait_for_ctrl_c() => {}
    }
}

/// Read a single byte on a dedicated thread; stdin reads block
async fn read_key() -> std::io::Result<usize> {
    let (sender, receiver) = oneshot::channel();
    std::thread::spawn(move || {
        let mut byte = [0u8; 1];
        let _ = sender.send(std::io::stdin().read(&mut byte));
    });
    match receiver.await {
        Ok(read) => read,
        Err(_) => Ok(0),
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received ctrl-c signal, shutting down"),
        Err(e) => error!("Failed to listen for ctrl-c: {}", e),
    }
}
