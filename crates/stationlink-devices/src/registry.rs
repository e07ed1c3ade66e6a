/*!
 * Device registry for StationLink.
 *
 * The registry reacts to enumeration events: it builds a typed handle for
 * every recognised device, keeps at most one active handle per kind and drops
 * handles whose device disappeared or whose link was lost.
 */
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use stationlink_core::config::RegistryConfig;
use stationlink_core::error::Result as CoreResult;
use stationlink_core::logging::component_span;
use stationlink_core::types::Id;

use crate::adapter::DisplayAdapter;
use crate::connection::Connection;
use crate::device::{
    AirSensorDevice, ConnectionEvent, DeviceKind, DisplayDevice, EnumerateEvent, EnumerationType, Reading,
};
use crate::error::DeviceInitError;
use crate::history::ReadingHistory;

/// Registry behaviour, usually built from [`RegistryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryOptions {
    /// Push period requested from air sensors
    pub reading_period: Duration,
    /// Title written to display row 0
    pub title: String,
    /// Drop a handle when its device is reported as disconnected
    pub invalidate_on_disconnect: bool,
    /// Render one reading as soon as a sensor is attached
    pub initial_read: bool,
    /// Minimum spacing of readings kept in the history
    pub logging_period: Duration,
    /// Number of readings kept in the history
    pub history_capacity: usize,
}

impl From<&RegistryConfig> for RegistryOptions {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            reading_period: config.reading_period(),
            title: config.title.clone(),
            invalidate_on_disconnect: config.invalidate_on_disconnect,
            initial_read: config.initial_read,
            logging_period: config.logging_period(),
            history_capacity: config.history_capacity,
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from(&RegistryConfig::default())
    }
}

/// Forwards pushed readings to the adapter; stops when dropped
#[derive(Debug)]
pub struct ReadingForwarder(JoinHandle<()>);

impl ReadingForwarder {
    fn spawn(uid: &Id, mut readings: broadcast::Receiver<Reading>, adapter: Arc<DisplayAdapter>) -> Self {
        let span = component_span("reading-forwarder", Some(uid.as_str()));
        let task = tokio::spawn(
            async move {
                loop {
                    match readings.recv().await {
                        Ok(reading) => adapter.on_reading(reading).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Display fell behind, {} readings skipped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Reading stream closed");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );
        Self(task)
    }
}

impl Drop for ReadingForwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A live handle to a recognised device
#[derive(Debug)]
pub enum DeviceHandle {
    /// A character display
    Display(Arc<dyn DisplayDevice>),
    /// An air sensor and the task forwarding its readings
    AirSensor {
        /// The sensor
        device: Arc<dyn AirSensorDevice>,
        /// Reading forwarder, aborted with the handle
        forwarder: ReadingForwarder,
    },
}

impl DeviceHandle {
    /// The kind tag
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceHandle::Display(_) => DeviceKind::Display,
            DeviceHandle::AirSensor { .. } => DeviceKind::AirSensor,
        }
    }

    /// The device uid
    pub fn uid(&self) -> &Id {
        match self {
            DeviceHandle::Display(display) => display.uid(),
            DeviceHandle::AirSensor { device, .. } => device.uid(),
        }
    }
}

/// At most one active handle per device kind
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: HashMap<DeviceKind, DeviceHandle>,
}

/// The handle table shared by the registry and the adapter
pub type SharedHandles = Arc<Mutex<HandleTable>>;

impl HandleTable {
    /// Create an empty, shareable table
    pub fn shared() -> SharedHandles {
        Arc::new(Mutex::new(Self::default()))
    }

    /// The active handle of `kind`
    pub fn get(&self, kind: DeviceKind) -> Option<&DeviceHandle> {
        self.handles.get(&kind)
    }

    /// The active display
    pub fn display(&self) -> Option<Arc<dyn DisplayDevice>> {
        match self.handles.get(&DeviceKind::Display) {
            Some(DeviceHandle::Display(display)) => Some(display.clone()),
            _ => None,
        }
    }

    /// Make `handle` the active one for its kind, returning the one it replaces
    pub fn insert(&mut self, handle: DeviceHandle) -> Option<DeviceHandle> {
        self.handles.insert(handle.kind(), handle)
    }

    /// Drop the active handle of `kind`
    pub fn remove(&mut self, kind: DeviceKind) -> Option<DeviceHandle> {
        self.handles.remove(&kind)
    }

    /// Drop whichever active handle belongs to `uid`
    pub fn remove_uid(&mut self, uid: &Id) -> Option<DeviceHandle> {
        let kind = self
            .handles
            .iter()
            .find(|(_, handle)| handle.uid() == uid)
            .map(|(kind, _)| *kind)?;
        self.handles.remove(&kind)
    }

    /// Drop every handle, returning how many were active
    pub fn clear(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        count
    }

    /// Whether a handle of `kind` is active
    pub fn is_active(&self, kind: DeviceKind) -> bool {
        self.handles.contains_key(&kind)
    }

    /// Number of active handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is active
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Device registry
///
/// Clones share the same handle table.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    connection: Connection,
    handles: SharedHandles,
    adapter: Arc<DisplayAdapter>,
    options: RegistryOptions,
}

impl DeviceRegistry {
    /// Create a registry building handles through `connection`
    pub fn new(connection: Connection, options: RegistryOptions) -> Self {
        let handles = HandleTable::shared();
        let history = ReadingHistory::new(options.logging_period, options.history_capacity);
        let adapter = Arc::new(DisplayAdapter::with_history(handles.clone(), history));
        Self {
            connection,
            handles,
            adapter,
            options,
        }
    }

    /// The adapter fed by this registry's sensors
    pub fn adapter(&self) -> &Arc<DisplayAdapter> {
        &self.adapter
    }

    /// The registry options
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Start reacting to enumeration and connection events
    ///
    /// Both event kinds are handled by one task so a connection loss is never
    /// applied after the enumeration that followed it. Abort the returned
    /// handle to stop.
    pub fn start(&self) -> CoreResult<JoinHandle<()>> {
        let events = self.connection.events();
        let enumerations = events.subscribe::<EnumerateEvent>()?;
        let connections = events.subscribe::<ConnectionEvent>()?;

        let registry = self.clone();
        let task = tokio::spawn(async move { registry.run(enumerations, connections).await });
        debug!("Device registry started");
        Ok(task)
    }

    async fn run(
        &self,
        mut enumerations: broadcast::Receiver<EnumerateEvent>,
        mut connections: broadcast::Receiver<ConnectionEvent>,
    ) {
        loop {
            // Connection events first: a loss published before an enumeration
            // must be applied before it
            tokio::select! {
                biased;
                event = connections.recv() => match event {
                    Ok(ConnectionEvent::Disconnected(reason)) => {
                        debug!("Connection lost ({:?})", reason);
                        self.invalidate_all().await;
                    }
                    Ok(ConnectionEvent::Connected(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Registry lagged, {} connection events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                event = enumerations.recv() => match event {
                    Ok(event) => self.on_enumerate(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Registry lagged, {} enumeration events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Event channels closed, device registry stopped");
    }

    /// React to one enumeration event
    pub async fn on_enumerate(&self, event: EnumerateEvent) {
        let Some(kind) = event.kind() else {
            debug!(
                "Ignoring device {} with identifier {}",
                event.uid, event.device_identifier
            );
            return;
        };

        match event.enumeration_type {
            EnumerationType::Connected | EnumerationType::Available => match kind {
                DeviceKind::Display => self.attach_display(&event.uid).await,
                DeviceKind::AirSensor => self.attach_air_sensor(&event.uid).await,
            },
            EnumerationType::Disconnected => {
                if !self.options.invalidate_on_disconnect {
                    debug!("{} {} disconnected, keeping its handle", kind, event.uid);
                    return;
                }
                if let Some(handle) = self.handles.lock().await.remove_uid(&event.uid) {
                    info!("{} {} disconnected, handle dropped", handle.kind(), handle.uid());
                }
            }
        }
    }

    async fn attach_display(&self, uid: &Id) {
        let mut table = self.handles.lock().await;
        if let Some(previous) = table.remove(DeviceKind::Display) {
            debug!("Replacing display {}", previous.uid());
        }

        match self.build_display(uid).await {
            Ok(display) => {
                table.insert(DeviceHandle::Display(display));
                self.adapter.display_attached();
                info!("{} {} attached", DeviceKind::Display, uid);
            }
            Err(e) => error!("{}", e),
        }
    }

    async fn build_display(&self, uid: &Id) -> Result<Arc<dyn DisplayDevice>, DeviceInitError> {
        let init_error = |e| DeviceInitError::new(uid, DeviceKind::Display, e);

        let display = self.connection.daemon().open_display(uid).await.map_err(init_error)?;
        display.clear_display().await.map_err(init_error)?;
        display
            .write_line(0, 0, &self.options.title)
            .await
            .map_err(init_error)?;
        Ok(display)
    }

    async fn attach_air_sensor(&self, uid: &Id) {
        let mut table = self.handles.lock().await;
        if let Some(previous) = table.remove(DeviceKind::AirSensor) {
            debug!("Replacing air sensor {}", previous.uid());
        }

        let (device, readings) = match self.build_air_sensor(uid).await {
            Ok(built) => built,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        if self.options.initial_read {
            match device.all_values().await {
                Ok(reading) => self.adapter.render(&mut table, reading).await,
                Err(e) => warn!("Initial read from {} {} failed: {}", DeviceKind::AirSensor, uid, e),
            }
        }

        let forwarder = ReadingForwarder::spawn(uid, readings, self.adapter.clone());
        table.insert(DeviceHandle::AirSensor { device, forwarder });
        info!("{} {} attached", DeviceKind::AirSensor, uid);
    }

    async fn build_air_sensor(
        &self,
        uid: &Id,
    ) -> Result<(Arc<dyn AirSensorDevice>, broadcast::Receiver<Reading>), DeviceInitError> {
        let init_error = |e| DeviceInitError::new(uid, DeviceKind::AirSensor, e);

        let sensor = self.connection.daemon().open_air_sensor(uid).await.map_err(init_error)?;
        // Subscribe first so the first push after configuring is not lost
        let readings = sensor.subscribe_readings();
        sensor
            .set_all_values_period(self.options.reading_period, false)
            .await
            .map_err(init_error)?;
        Ok((sensor, readings))
    }

    /// Drop every handle
    pub async fn invalidate_all(&self) {
        let dropped = self.handles.lock().await.clear();
        if dropped > 0 {
            info!("Connection lost, {} device handles invalidated", dropped);
        }
    }

    /// Whether a handle of `kind` is active
    pub async fn is_active(&self, kind: DeviceKind) -> bool {
        self.handles.lock().await.is_active(kind)
    }

    /// The uid of the active handle of `kind`
    pub async fn active_uid(&self, kind: DeviceKind) -> Option<Id> {
        self.handles.lock().await.get(kind).map(|handle| handle.uid().clone())
    }

    /// Number of active handles
    pub async fn active_count(&self) -> usize {
        self.handles.lock().await.len()
    }
}
