/*!
 * Application context.
 *
 * Everything the station needs is built once in [`App::start`] and torn down
 * in [`App::shutdown`].
 */
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use stationlink_core::config::{Config, SharedConfig};
use stationlink_devices::{Connection, ConnectionManager, Daemon, DeviceRegistry, RegistryOptions};

/// The running station
#[derive(Debug)]
pub struct App {
    config: SharedConfig,
    manager: ConnectionManager,
    connection: Connection,
    registry: DeviceRegistry,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Connect, register the event handlers and enumerate
    ///
    /// Returns once the daemon accepted both the connection and the first
    /// enumerate request; either may take any number of retries.
    pub async fn start(config: Config, daemon: Arc<dyn Daemon>) -> Result<Self> {
        let config = SharedConfig::new(config);
        let manager = ConnectionManager::new(daemon).with_retry_delay(config.get().retry.delay());

        let connection = manager
            .connect(config.get().daemon.endpoint())
            .await
            .context("Failed to connect to the daemon")?;

        let registry = DeviceRegistry::new(connection.clone(), RegistryOptions::from(&config.get().registry));
        let tasks = vec![
            registry.start().context("Failed to register device handlers")?,
            manager
                .start_reconnect_watch(&connection)
                .context("Failed to watch the connection")?,
        ];

        manager.enumerate_until_ok(&connection).await;
        info!("Station running against {}", connection.endpoint());

        Ok(Self {
            config,
            manager,
            connection,
            registry,
            tasks,
        })
    }

    /// The configuration the station was started with
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// The daemon connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Stop handling events and disconnect
    ///
    /// In-flight readings are not drained; the disconnect is best effort.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        debug!("Stopped {} event handlers", self.tasks.len());

        self.registry.invalidate_all().await;
        self.manager.disconnect(&self.connection).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::{simulated_station, SIMULATED_AIR_SENSOR_UID, SIMULATED_DISPLAY_UID};
    use stationlink_devices::DeviceKind;

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_station_end_to_end() {
        let daemon = Arc::new(simulated_station());
        daemon.refuse_connects(2);

        let app = App::start(Config::default(), daemon.clone()).await.unwrap();
        assert_eq!(daemon.connect_attempts(), 3);
        assert_eq!(daemon.enumerate_requests(), 1);
        assert_eq!(app.config().get().daemon.port, 4223);

        // Both devices come up; the title is written on attach
        let display = loop {
            if let Some(display) = daemon.display(SIMULATED_DISPLAY_UID) {
                break display;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(wait_for(|| display.line(0).as_deref() == Some("   Weather Station")).await);

        // Live readings reach the four data rows
        assert!(wait_for(|| display.lines().len() == 5).await);
        assert!(display.line(2).unwrap_or_default().starts_with("IAQ:"));
        assert!(display.line(5).unwrap_or_default().ends_with(" hPa"));
        assert!(!app.registry().adapter().history().is_empty());
        assert!(app.registry().is_active(DeviceKind::AirSensor).await);
        assert_eq!(
            app.registry().active_uid(DeviceKind::AirSensor).await.unwrap().as_str(),
            SIMULATED_AIR_SENSOR_UID
        );

        // Outage: handles dropped, then rebuilt after the automatic reconnect
        daemon.drop_connection();
        for _ in 0..50 {
            if app.registry().active_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(app.registry().active_count().await, 0);
        assert!(!app.connection().is_connected());

        daemon.auto_reconnect();
        assert!(wait_for(|| daemon.enumerate_requests() == 2).await);
        for _ in 0..50 {
            if app.registry().active_count().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(app.registry().active_count().await, 2);
        assert!(app.connection().is_connected());

        app.shutdown().await;
        assert!(!daemon.is_connected());
    }
}
