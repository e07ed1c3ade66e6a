/*!
 * Connection management.
 *
 * The [`ConnectionManager`] owns the link to the daemon. Connect and
 * enumerate are retried with a fixed delay until they succeed; after an
 * automatic reconnect the manager enumerates again so the registry gets a
 * fresh view of the attached devices.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stationlink_core::error::Result as CoreResult;
use stationlink_core::event::SharedEventBus;
use stationlink_core::types::Endpoint;
use stationlink_core::utils::retry_until_ok;

use crate::daemon::Daemon;
use crate::device::{ConnectReason, ConnectionEvent};
use crate::error::{ConnError, ShutdownError};

/// Delay between two connect or enumerate attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link to the daemon
    Disconnected,
    /// Link established
    Connected,
}

/// The link to the daemon
///
/// Clones are cheap and share state; the registry keeps one to build device
/// handles.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    endpoint: Endpoint,
    daemon: Arc<dyn Daemon>,
    connected: AtomicBool,
}

impl Connection {
    fn new(endpoint: Endpoint, daemon: Arc<dyn Daemon>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                endpoint,
                daemon,
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// The daemon address
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The daemon host
    pub fn host(&self) -> &str {
        &self.inner.endpoint.host
    }

    /// The daemon port
    pub fn port(&self) -> u16 {
        self.inner.endpoint.port
    }

    /// The last known connection state
    pub fn state(&self) -> ConnectionState {
        if self.inner.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether the last known state is `Connected`
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The daemon behind this connection
    pub fn daemon(&self) -> &Arc<dyn Daemon> {
        &self.inner.daemon
    }

    /// The daemon's event bus
    pub fn events(&self) -> &SharedEventBus {
        self.inner.daemon.events()
    }

    fn set_state(&self, state: ConnectionState) {
        let connected = state == ConnectionState::Connected;
        if self.inner.connected.swap(connected, Ordering::SeqCst) != connected {
            debug!("Connection to {} is now {:?}", self.inner.endpoint, state);
        }
    }
}

/// Owns the connection lifecycle
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    daemon: Arc<dyn Daemon>,
    retry_delay: Duration,
}

impl ConnectionManager {
    /// Create a manager for `daemon` with the default one second retry delay
    pub fn new(daemon: Arc<dyn Daemon>) -> Self {
        Self {
            daemon,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the retry delay
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// The fixed retry delay
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Connect to the daemon, retrying until it accepts
    ///
    /// Failed attempts are logged and retried after the retry delay; there is
    /// no attempt cap, so the caller only ever sees the eventual success.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<Connection, ConnError> {
        info!("Connecting to {} daemon at {}", self.daemon.name(), endpoint);

        let daemon = &self.daemon;
        let target = &endpoint;
        retry_until_ok(self.retry_delay, "Connect", move || daemon.connect(target)).await;

        let connection = Connection::new(endpoint, self.daemon.clone());
        connection.set_state(ConnectionState::Connected);
        info!("Connected to daemon at {}", connection.endpoint());
        Ok(connection)
    }

    /// Ask the daemon to announce its devices once
    ///
    /// Fails only when the daemon is not connected.
    pub async fn enumerate(&self, connection: &Connection) -> Result<(), ConnError> {
        match connection.daemon().enumerate().await {
            Ok(()) => {
                connection.set_state(ConnectionState::Connected);
                debug!("Enumeration requested");
                Ok(())
            }
            Err(ConnError::NotConnected) => {
                connection.set_state(ConnectionState::Disconnected);
                Err(ConnError::NotConnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Enumerate, retrying until the request is accepted
    pub async fn enumerate_until_ok(&self, connection: &Connection) {
        retry_until_ok(self.retry_delay, "Enumerate", move || self.enumerate(connection)).await;
    }

    /// Follow connection events for `connection`
    ///
    /// Tracks the connection state and re-enumerates after every automatic
    /// reconnect. Abort the returned handle to stop watching.
    pub fn start_reconnect_watch(&self, connection: &Connection) -> CoreResult<JoinHandle<()>> {
        let manager = self.clone();
        let watched = connection.clone();
        connection.events().on(move |event: ConnectionEvent| {
            let manager = manager.clone();
            let connection = watched.clone();
            async move { manager.handle_connection_event(&connection, event).await }
        })
    }

    async fn handle_connection_event(&self, connection: &Connection, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(reason) => {
                connection.set_state(ConnectionState::Connected);
                if reason == ConnectReason::AutoReconnect {
                    info!("Auto reconnect to {}, enumerating again", connection.endpoint());
                    self.enumerate_until_ok(connection).await;
                }
            }
            ConnectionEvent::Disconnected(reason) => {
                connection.set_state(ConnectionState::Disconnected);
                warn!("Connection to {} lost ({:?})", connection.endpoint(), reason);
            }
        }
    }

    /// Best-effort disconnect; failures are logged and swallowed
    pub async fn disconnect(&self, connection: &Connection) {
        match connection.daemon().disconnect().await.map_err(ShutdownError::from) {
            Ok(()) => info!("Disconnected from {}", connection.endpoint()),
            Err(e) => warn!("{}", e),
        }
        connection.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::simulated::SimulatedDaemon;

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_connect_retries_until_daemon_accepts() {
        let daemon = Arc::new(SimulatedDaemon::new());
        daemon.refuse_connects(3);
        let manager = ConnectionManager::new(daemon.clone());

        let start = tokio::time::Instant::now();
        let connection = manager
            .connect(Endpoint::new("localhost", 4223))
            .await
            .expect("connect never fails");

        assert_eq!(daemon.connect_attempts(), 4);
        assert!(connection.is_connected());
        assert_eq!(connection.host(), "localhost");
        assert_eq!(connection.port(), 4223);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_fails_only_when_not_connected() {
        let daemon = Arc::new(SimulatedDaemon::new());
        let manager = ConnectionManager::new(daemon.clone());
        let connection = manager.connect(Endpoint::new("localhost", 4223)).await.unwrap();

        assert!(manager.enumerate(&connection).await.is_ok());

        daemon.drop_connection();
        assert_eq!(manager.enumerate(&connection).await, Err(ConnError::NotConnected));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(daemon.enumerate_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_until_ok_waits_for_link() {
        let daemon = Arc::new(SimulatedDaemon::new());
        let manager = ConnectionManager::new(daemon.clone());
        let connection = manager.connect(Endpoint::new("localhost", 4223)).await.unwrap();
        daemon.drop_connection();

        let restorer = daemon.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            restorer.auto_reconnect();
        });

        manager.enumerate_until_ok(&connection).await;
        assert_eq!(daemon.enumerate_requests(), 1);
        assert!(connection.is_connected());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_auto_reconnect_enumerates_exactly_once() {
        let daemon = Arc::new(SimulatedDaemon::new());
        let manager = ConnectionManager::new(daemon.clone());
        let connection = manager.connect(Endpoint::new("localhost", 4223)).await.unwrap();
        let watch = manager.start_reconnect_watch(&connection).unwrap();

        manager.enumerate_until_ok(&connection).await;
        assert_eq!(daemon.enumerate_requests(), 1);

        daemon.drop_connection();
        assert!(wait_for(|| !connection.is_connected()).await);

        daemon.auto_reconnect();
        assert!(wait_for(|| daemon.enumerate_requests() == 2).await);

        // Nothing else triggers another enumeration
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(daemon.enumerate_requests(), 2);
        assert!(connection.is_connected());

        watch.abort();
    }

    #[tokio::test]
    async fn test_disconnect_is_best_effort() {
        let daemon = Arc::new(SimulatedDaemon::new());
        let manager = ConnectionManager::new(daemon.clone()).with_retry_delay(Duration::from_millis(5));
        assert_eq!(manager.retry_delay(), Duration::from_millis(5));

        let connection = manager.connect(Endpoint::new("localhost", 4223)).await.unwrap();
        manager.disconnect(&connection).await;
        assert!(!daemon.is_connected());
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        // Already disconnected: logged, not surfaced
        manager.disconnect(&connection).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
