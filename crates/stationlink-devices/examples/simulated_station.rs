//! Runs the station against the simulated daemon for a few seconds, with one
//! connection outage, and prints what ends up on the display.
use std::sync::Arc;
use std::time::Duration;

use stationlink_devices::prelude::*;
use stationlink_devices::protocols::SimulatedDaemon;
use stationlink_devices::{ConnectionManager, DeviceKind, DeviceRegistry, RegistryOptions};

#[tokio::main]
async fn main() -> Result<()> {
    init_with_filter("debug")?;

    let daemon = Arc::new(
        SimulatedDaemon::new()
            .with_device("Lxq", DeviceKind::Display)
            .with_device("Aq1", DeviceKind::AirSensor)
            .with_live_readings(),
    );
    daemon.refuse_connects(2);

    let manager = ConnectionManager::new(daemon.clone());
    let connection = manager
        .connect(Endpoint::new("localhost", 4223))
        .await
        .map_err(|e| Error::other(e.to_string()))?;

    let registry = DeviceRegistry::new(connection.clone(), RegistryOptions::default());
    let tasks = [registry.start()?, manager.start_reconnect_watch(&connection)?];
    manager.enumerate_until_ok(&connection).await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    warn!("Simulating a connection outage");
    daemon.drop_connection();
    tokio::time::sleep(Duration::from_secs(2)).await;
    daemon.auto_reconnect();
    tokio::time::sleep(Duration::from_secs(3)).await;

    if let Some(display) = daemon.display("Lxq") {
        for (row, text) in display.lines() {
            info!("row {}: {}", row, text);
        }
    }
    info!("Last reading: {:?}", registry.adapter().last_reading());
    info!("{} readings in the history", registry.adapter().history().len());

    for task in tasks {
        task.abort();
    }
    manager.disconnect(&connection).await;
    Ok(())
}
