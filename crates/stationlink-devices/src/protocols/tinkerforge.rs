/*!
 * Brick Daemon backend.
 *
 * Talks to a Tinkerforge Brick Daemon over TCP through the `tinkerforge`
 * bindings. The bindings are blocking and deliver callbacks on std channels,
 * so requests run on the blocking pool and one bridge thread per callback
 * queue republishes events on the [`SharedEventBus`].
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tinkerforge::air_quality_bricklet::{AirQualityBricklet, AllValues, AllValuesEvent};
use tinkerforge::converting_callback_receiver::{CallbackRecvError, CallbackRecvTimeoutError};
use tinkerforge::converting_receiver::BrickletRecvTimeoutError;
use tinkerforge::ip_connection::{
    ConnectError, ConnectReason as SdkConnectReason, ConnectionState as SdkConnectionState,
    DisconnectReason as SdkDisconnectReason, EnumerateResponse, EnumerationType as SdkEnumerationType, IpConnection,
    IpConnectionRequestSender,
};
use tinkerforge::lcd_128x64_bricklet::Lcd128x64Bricklet;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use stationlink_core::event::SharedEventBus;
use stationlink_core::types::{Endpoint, Id};

use crate::daemon::Daemon;
use crate::device::{
    AirSensorDevice, ConnectReason, ConnectionEvent, DisconnectReason, DisplayDevice, EnumerateEvent,
    EnumerationType, Reading, Result,
};
use crate::error::ConnError;

const READING_CHANNEL_CAPACITY: usize = 64;

/// How often an idle reading bridge checks whether its sensor was dropped
const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client of a Brick Daemon
pub struct TinkerforgeDaemon {
    ipcon: IpConnection,
    events: SharedEventBus,
}

impl TinkerforgeDaemon {
    /// Create a disconnected client and start its callback bridges
    pub fn new() -> Self {
        let ipcon = IpConnection::new();
        let events = SharedEventBus::new();

        let connects = ipcon.get_connect_callback_receiver();
        let bus = events.clone();
        spawn_bridge("connect", move || {
            for reason in connects.iter() {
                publish(&bus, ConnectionEvent::Connected(reason.into()));
            }
        });

        let disconnects = ipcon.get_disconnect_callback_receiver();
        let bus = events.clone();
        spawn_bridge("disconnect", move || {
            for reason in disconnects.iter() {
                publish(&bus, ConnectionEvent::Disconnected(reason.into()));
            }
        });

        let enumerations = ipcon.get_enumerate_callback_receiver();
        let bus = events.clone();
        spawn_bridge("enumerate", move || loop {
            match enumerations.recv_forever() {
                Ok(response) => match enumerate_event(&response) {
                    Some(event) => publish(&bus, event),
                    None => debug!("Ignoring enumeration of {} with unknown type", response.uid),
                },
                Err(CallbackRecvError::MalformedPacket) => warn!("Malformed enumerate callback"),
                Err(CallbackRecvError::QueueDisconnected) => break,
            }
        });

        Self { ipcon, events }
    }

    fn requests(&self) -> IpConnectionRequestSender {
        self.ipcon.get_request_sender()
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.ipcon.get_connection_state() {
            SdkConnectionState::Connected => Ok(()),
            _ => Err(ConnError::NotConnected),
        }
    }
}

impl Default for TinkerforgeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TinkerforgeDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinkerforgeDaemon")
            .field("state", &self.ipcon.get_connection_state())
            .finish()
    }
}

#[async_trait]
impl Daemon for TinkerforgeDaemon {
    fn name(&self) -> &'static str {
        "tinkerforge"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        let requests = self.requests();
        let target = endpoint.clone();
        blocking(move || {
            let outcome = requests
                .connect((target.host.as_str(), target.port))
                .recv()
                .map_err(|_| ConnError::transport("Brick Daemon socket thread stopped"))?;
            match outcome {
                Ok(()) => Ok(()),
                Err(ConnectError::IoError(e)) => {
                    debug!("Connect to {} failed: {}", target, e);
                    Err(ConnError::Refused(target.to_string()))
                }
                Err(e) => Err(ConnError::transport(e.to_string())),
            }
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        let requests = self.requests();
        blocking(move || match requests.disconnect().recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnError::NotConnected),
            Err(_) => Err(ConnError::transport("Brick Daemon socket thread stopped")),
        })
        .await
    }

    async fn enumerate(&self) -> Result<()> {
        self.ensure_connected()?;
        let requests = self.requests();
        blocking(move || {
            requests.enumerate();
            Ok(())
        })
        .await
    }

    fn events(&self) -> &SharedEventBus {
        &self.events
    }

    async fn open_display(&self, uid: &Id) -> Result<Arc<dyn DisplayDevice>> {
        self.ensure_connected()?;
        let lcd = Lcd128x64Bricklet::new(uid.as_str(), &self.ipcon);
        Ok(Arc::new(TinkerforgeDisplay { uid: uid.clone(), lcd }))
    }

    async fn open_air_sensor(&self, uid: &Id) -> Result<Arc<dyn AirSensorDevice>> {
        self.ensure_connected()?;
        let bricklet = AirQualityBricklet::new(uid.as_str(), &self.ipcon);
        Ok(Arc::new(TinkerforgeAirSensor::new(uid.clone(), bricklet)))
    }
}

/// An LCD 128x64 Bricklet
pub struct TinkerforgeDisplay {
    uid: Id,
    lcd: Lcd128x64Bricklet,
}

impl fmt::Debug for TinkerforgeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinkerforgeDisplay").field("uid", &self.uid).finish()
    }
}

#[async_trait]
impl DisplayDevice for TinkerforgeDisplay {
    fn uid(&self) -> &Id {
        &self.uid
    }

    async fn clear_display(&self) -> Result<()> {
        let lcd = self.lcd.clone();
        blocking(move || acknowledged(lcd.clear_display().recv())).await
    }

    async fn write_line(&self, line: u8, position: u8, text: &str) -> Result<()> {
        let lcd = self.lcd.clone();
        let text = text.to_string();
        blocking(move || acknowledged(lcd.write_line(line, position, text).recv())).await
    }
}

/// An Air Quality Bricklet
///
/// Its all-values callback queue is drained by a bridge thread that stops
/// once the sensor handle is dropped.
pub struct TinkerforgeAirSensor {
    uid: Id,
    bricklet: AirQualityBricklet,
    readings: broadcast::Sender<Reading>,
    open: Arc<AtomicBool>,
}

impl TinkerforgeAirSensor {
    fn new(uid: Id, bricklet: AirQualityBricklet) -> Self {
        let (readings, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        let queue = bricklet.get_all_values_callback_receiver();
        let sender = readings.clone();
        let running = open.clone();
        let bridged = uid.clone();
        spawn_bridge("all-values", move || {
            while running.load(Ordering::SeqCst) {
                match queue.recv_timeout(BRIDGE_POLL_INTERVAL) {
                    Ok(event) => {
                        let reaching = sender.send(Reading::from(event)).unwrap_or(0);
                        trace!("Air sensor {}: reading forwarded to {} subscribers", bridged, reaching);
                    }
                    Err(CallbackRecvTimeoutError::QueueTimeout) => {}
                    Err(CallbackRecvTimeoutError::MalformedPacket) => {
                        warn!("Malformed all-values callback from {}", bridged)
                    }
                    Err(CallbackRecvTimeoutError::QueueDisconnected) => break,
                }
            }
        });

        Self {
            uid,
            bricklet,
            readings,
            open,
        }
    }
}

impl Drop for TinkerforgeAirSensor {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for TinkerforgeAirSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinkerforgeAirSensor").field("uid", &self.uid).finish()
    }
}

#[async_trait]
impl AirSensorDevice for TinkerforgeAirSensor {
    fn uid(&self) -> &Id {
        &self.uid
    }

    async fn set_all_values_period(&self, period: Duration, value_has_to_change: bool) -> Result<()> {
        let bricklet = self.bricklet.clone();
        let period_ms = u32::try_from(period.as_millis()).unwrap_or(u32::MAX);
        blocking(move || {
            acknowledged(
                bricklet
                    .set_all_values_callback_configuration(period_ms, value_has_to_change)
                    .recv(),
            )
        })
        .await
    }

    async fn all_values(&self) -> Result<Reading> {
        let bricklet = self.bricklet.clone();
        blocking(move || bricklet.get_all_values().recv().map(Reading::from).map_err(bricklet_error)).await
    }

    fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.readings.subscribe()
    }
}

impl From<AllValues> for Reading {
    fn from(values: AllValues) -> Self {
        Self {
            iaq_index: values.iaq_index,
            iaq_index_accuracy: values.iaq_index_accuracy,
            temperature: values.temperature,
            humidity: values.humidity,
            air_pressure: values.air_pressure,
        }
    }
}

impl From<AllValuesEvent> for Reading {
    fn from(event: AllValuesEvent) -> Self {
        Self {
            iaq_index: event.iaq_index,
            iaq_index_accuracy: event.iaq_index_accuracy,
            temperature: event.temperature,
            humidity: event.humidity,
            air_pressure: event.air_pressure,
        }
    }
}

impl From<SdkConnectReason> for ConnectReason {
    fn from(reason: SdkConnectReason) -> Self {
        match reason {
            SdkConnectReason::Request => ConnectReason::Request,
            SdkConnectReason::AutoReconnect => ConnectReason::AutoReconnect,
        }
    }
}

impl From<SdkDisconnectReason> for DisconnectReason {
    fn from(reason: SdkDisconnectReason) -> Self {
        match reason {
            SdkDisconnectReason::Request => DisconnectReason::Request,
            SdkDisconnectReason::Error => DisconnectReason::Error,
            SdkDisconnectReason::Shutdown => DisconnectReason::Shutdown,
        }
    }
}

/// Translate an enumerate callback; unknown enumeration types yield `None`
fn enumerate_event(response: &EnumerateResponse) -> Option<EnumerateEvent> {
    let enumeration_type = match response.enumeration_type {
        SdkEnumerationType::Available => EnumerationType::Available,
        SdkEnumerationType::Connected => EnumerationType::Connected,
        SdkEnumerationType::Disconnected => EnumerationType::Disconnected,
        SdkEnumerationType::Unknown => return None,
    };
    Some(EnumerateEvent::new(
        response.uid.as_str(),
        response.device_identifier,
        enumeration_type,
    ))
}

/// Setters without an expected response report success as an error
fn acknowledged(result: std::result::Result<(), BrickletRecvTimeoutError>) -> Result<()> {
    match result {
        Ok(()) | Err(BrickletRecvTimeoutError::SuccessButResponseExpectedIsDisabled) => Ok(()),
        Err(e) => Err(bricklet_error(e)),
    }
}

fn bricklet_error(error: BrickletRecvTimeoutError) -> ConnError {
    match error {
        BrickletRecvTimeoutError::NotConnected => ConnError::NotConnected,
        other => ConnError::transport(other.to_string()),
    }
}

fn publish<T: Clone + fmt::Debug + Send + Sync + 'static>(bus: &SharedEventBus, event: T) {
    if let Err(e) = bus.publish(event) {
        warn!("Dropping daemon callback: {}", e);
    }
}

/// Run a blocking bindings call off the async runtime
async fn blocking<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ConnError::transport(format!("Blocking call failed: {}", e)))?
}

fn spawn_bridge<F: FnOnce() + Send + 'static>(name: &str, bridge: F) {
    let spawned = thread::Builder::new()
        .name(format!("tinkerforge-{}", name))
        .spawn(bridge);
    if let Err(e) = spawned {
        warn!("Failed to start the {} callback bridge: {}", name, e);
    }
}
