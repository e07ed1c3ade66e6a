/*!
 * Daemon backend selection.
 */
use std::sync::Arc;

use tracing::info;

use stationlink_core::config::Backend;
use stationlink_devices::protocols::{SimulatedDaemon, TinkerforgeDaemon};
use stationlink_devices::{Daemon, DeviceKind};

/// Uid of the display attached to the simulated daemon
pub const SIMULATED_DISPLAY_UID: &str = "Lxq";

/// Uid of the air sensor attached to the simulated daemon
pub const SIMULATED_AIR_SENSOR_UID: &str = "Aq1";

/// A simulated station: one display and one air sensor pushing live readings
pub fn simulated_station() -> SimulatedDaemon {
    SimulatedDaemon::new()
        .with_device(SIMULATED_DISPLAY_UID, DeviceKind::Display)
        .with_device(SIMULATED_AIR_SENSOR_UID, DeviceKind::AirSensor)
        .with_live_readings()
}

/// Build the daemon client for `backend`
pub fn create_daemon(backend: Backend) -> Arc<dyn Daemon> {
    let daemon: Arc<dyn Daemon> = match backend {
        Backend::Tinkerforge => Arc::new(TinkerforgeDaemon::new()),
        Backend::Simulated => Arc::new(simulated_station()),
    };
    info!(
        "Using {} backend (compiled in: {})",
        daemon.name(),
        stationlink_devices::available_backends().join(", ")
    );
    daemon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_simulated_daemon() {
        let daemon = create_daemon(Backend::Simulated);
        assert_eq!(daemon.name(), "simulated");
    }

    #[tokio::test]
    async fn test_default_backend_is_brick_daemon() {
        let daemon = create_daemon(Backend::default());
        assert_eq!(daemon.name(), "tinkerforge");
        // Nothing is connected until the manager asks
        assert!(daemon.enumerate().await.is_err());
    }
}
