/*!
 * In-process simulated daemon.
 *
 * Stands in for a real daemon in tests and demos. It keeps a set of attached
 * devices, records everything written to its displays, counts connect and
 * enumerate requests, and lets the caller inject faults: refused connects,
 * connection loss, automatic reconnects, device removal and failing writes.
 */
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use stationlink_core::event::SharedEventBus;
use stationlink_core::types::{Endpoint, Id};

use crate::daemon::Daemon;
use crate::device::{
    AirSensorDevice, ConnectReason, ConnectionEvent, DeviceKind, DisconnectReason, DisplayDevice,
    EnumerateEvent, EnumerationType, Reading, Result,
};
use crate::error::ConnError;

const READING_CHANNEL_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A simulated daemon
#[derive(Debug)]
pub struct SimulatedDaemon {
    events: SharedEventBus,
    link: Arc<AtomicBool>,
    live_readings: bool,
    state: Mutex<SimState>,
}

#[derive(Debug, Default)]
struct SimState {
    refuse_connects: usize,
    connect_attempts: usize,
    enumerate_requests: usize,
    devices: BTreeMap<Id, DeviceKind>,
    failing_opens: HashSet<Id>,
    displays: HashMap<Id, Arc<SimulatedDisplay>>,
    sensors: HashMap<Id, Arc<SimulatedAirSensor>>,
}

impl SimulatedDaemon {
    /// Create a daemon with no devices attached
    pub fn new() -> Self {
        Self {
            events: SharedEventBus::new(),
            link: Arc::new(AtomicBool::new(false)),
            live_readings: false,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Attach a device before the daemon is used
    pub fn with_device<U: Into<Id>>(self, uid: U, kind: DeviceKind) -> Self {
        lock(&self.state).devices.insert(uid.into(), kind);
        self
    }

    /// Make air sensors push synthetic readings at their configured period
    pub fn with_live_readings(mut self) -> Self {
        self.live_readings = true;
        self
    }

    /// Refuse the next `count` connect attempts
    pub fn refuse_connects(&self, count: usize) {
        lock(&self.state).refuse_connects = count;
    }

    /// Number of connect attempts seen so far, successful or not
    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    /// Number of accepted enumerate requests
    pub fn enumerate_requests(&self) -> usize {
        lock(&self.state).enumerate_requests
    }

    /// Whether the simulated link is up
    pub fn is_connected(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    /// Make handle construction for `uid` fail (or succeed again)
    pub fn fail_open<U: Into<Id>>(&self, uid: U, fail: bool) {
        let uid = uid.into();
        let mut state = lock(&self.state);
        if fail {
            state.failing_opens.insert(uid);
        } else {
            state.failing_opens.remove(&uid);
        }
    }

    /// Plug in a device; announced as `Connected` while the link is up
    pub fn attach<U: Into<Id>>(&self, uid: U, kind: DeviceKind) {
        let uid = uid.into();
        lock(&self.state).devices.insert(uid.clone(), kind);
        if self.is_connected() {
            self.announce(EnumerateEvent::new(uid, kind.identifier(), EnumerationType::Connected));
        }
    }

    /// Unplug a device; announced as `Disconnected` while the link is up
    pub fn detach<U: Into<Id>>(&self, uid: U) {
        let uid = uid.into();
        let removed = lock(&self.state).devices.remove(&uid);
        if let Some(kind) = removed {
            if self.is_connected() {
                self.announce(EnumerateEvent::new(uid, kind.identifier(), EnumerationType::Disconnected));
            }
        }
    }

    /// Drop the link as if the transport failed
    pub fn drop_connection(&self) {
        if self.link.swap(false, Ordering::SeqCst) {
            info!("Simulated daemon: connection lost");
            self.notify(ConnectionEvent::Disconnected(DisconnectReason::Error));
        }
    }

    /// Bring the link back as an automatic reconnect
    pub fn auto_reconnect(&self) {
        if !self.link.swap(true, Ordering::SeqCst) {
            info!("Simulated daemon: auto reconnect");
            self.notify(ConnectionEvent::Connected(ConnectReason::AutoReconnect));
        }
    }

    /// The display handle for `uid`, once one has been opened
    pub fn display<U: Into<Id>>(&self, uid: U) -> Option<Arc<SimulatedDisplay>> {
        lock(&self.state).displays.get(&uid.into()).cloned()
    }

    /// The air-sensor handle for `uid`, once one has been opened
    pub fn air_sensor<U: Into<Id>>(&self, uid: U) -> Option<Arc<SimulatedAirSensor>> {
        lock(&self.state).sensors.get(&uid.into()).cloned()
    }

    fn notify(&self, event: ConnectionEvent) {
        if let Err(e) = self.events.publish(event) {
            debug!("Simulated daemon: dropping {:?}: {}", event, e);
        }
    }

    fn announce(&self, event: EnumerateEvent) {
        trace!("Simulated daemon: announcing {:?}", event);
        if let Err(e) = self.events.publish(event) {
            debug!("Simulated daemon: dropping enumeration: {}", e);
        }
    }

    fn check_open(&self, uid: &Id, kind: DeviceKind) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnError::NotConnected);
        }
        let state = lock(&self.state);
        if state.failing_opens.contains(uid) {
            return Err(ConnError::transport(format!("{} did not respond", uid)));
        }
        match state.devices.get(uid) {
            Some(attached) if *attached == kind => Ok(()),
            _ => Err(ConnError::UnknownDevice(uid.clone())),
        }
    }
}

impl Default for SimulatedDaemon {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Daemon for SimulatedDaemon {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.connect_attempts += 1;
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(ConnError::Refused(endpoint.to_string()));
            }
        }

        self.link.store(true, Ordering::SeqCst);
        debug!("Simulated daemon: accepted connection for {}", endpoint);
        self.notify(ConnectionEvent::Connected(ConnectReason::Request));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.link.swap(false, Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }
        self.notify(ConnectionEvent::Disconnected(DisconnectReason::Request));
        Ok(())
    }

    async fn enumerate(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnError::NotConnected);
        }

        let devices: Vec<(Id, DeviceKind)> = {
            let mut state = lock(&self.state);
            state.enumerate_requests += 1;
            state.devices.iter().map(|(uid, kind)| (uid.clone(), *kind)).collect()
        };

        for (uid, kind) in devices {
            self.announce(EnumerateEvent::new(uid, kind.identifier(), EnumerationType::Available));
        }
        Ok(())
    }

    fn events(&self) -> &SharedEventBus {
        &self.events
    }

    async fn open_display(&self, uid: &Id) -> Result<Arc<dyn DisplayDevice>> {
        self.check_open(uid, DeviceKind::Display)?;
        let display = lock(&self.state)
            .displays
            .entry(uid.clone())
            .or_insert_with(|| Arc::new(SimulatedDisplay::new(uid.clone(), self.link.clone())))
            .clone();
        Ok(display as Arc<dyn DisplayDevice>)
    }

    async fn open_air_sensor(&self, uid: &Id) -> Result<Arc<dyn AirSensorDevice>> {
        self.check_open(uid, DeviceKind::AirSensor)?;
        let live = self.live_readings;
        let sensor = lock(&self.state)
            .sensors
            .entry(uid.clone())
            .or_insert_with(|| Arc::new(SimulatedAirSensor::new(uid.clone(), self.link.clone(), live)))
            .clone();
        Ok(sensor as Arc<dyn AirSensorDevice>)
    }
}

/// A display that records what is written to it
#[derive(Debug)]
pub struct SimulatedDisplay {
    uid: Id,
    link: Arc<AtomicBool>,
    state: Mutex<DisplayState>,
}

#[derive(Debug, Default)]
struct DisplayState {
    lines: BTreeMap<u8, String>,
    clears: usize,
    write_attempts: usize,
    fail_writes: bool,
}

impl SimulatedDisplay {
    fn new(uid: Id, link: Arc<AtomicBool>) -> Self {
        Self {
            uid,
            link,
            state: Mutex::new(DisplayState::default()),
        }
    }

    /// Current content of `line`, if anything was written to it
    pub fn line(&self, line: u8) -> Option<String> {
        lock(&self.state).lines.get(&line).cloned()
    }

    /// Every non-empty line, by row
    pub fn lines(&self) -> BTreeMap<u8, String> {
        lock(&self.state).lines.clone()
    }

    /// Number of `write_line` calls, including failed ones
    pub fn write_attempts(&self) -> usize {
        lock(&self.state).write_attempts
    }

    /// Number of `clear_display` calls that succeeded
    pub fn clears(&self) -> usize {
        lock(&self.state).clears
    }

    /// Make writes fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }
}

#[async_trait]
impl DisplayDevice for SimulatedDisplay {
    fn uid(&self) -> &Id {
        &self.uid
    }

    async fn clear_display(&self) -> Result<()> {
        if !self.link.load(Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }
        let mut state = lock(&self.state);
        state.lines.clear();
        state.clears += 1;
        Ok(())
    }

    async fn write_line(&self, line: u8, position: u8, text: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.write_attempts += 1;
        if !self.link.load(Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }
        if state.fail_writes {
            return Err(ConnError::transport("write_line rejected"));
        }

        let row = state.lines.entry(line).or_default();
        let mut chars: Vec<char> = row.chars().collect();
        let start = usize::from(position);
        if chars.len() < start {
            chars.resize(start, ' ');
        }
        chars.truncate(start);
        chars.extend(text.chars());
        *row = chars.into_iter().collect();
        Ok(())
    }
}

/// An air sensor whose readings are set by the caller
#[derive(Debug)]
pub struct SimulatedAirSensor {
    uid: Id,
    link: Arc<AtomicBool>,
    live: bool,
    readings: broadcast::Sender<Reading>,
    state: Mutex<SensorState>,
}

#[derive(Debug, Default)]
struct SensorState {
    current: Reading,
    period: Option<Duration>,
    value_has_to_change: bool,
    pusher: Option<JoinHandle<()>>,
}

impl SimulatedAirSensor {
    fn new(uid: Id, link: Arc<AtomicBool>, live: bool) -> Self {
        let (readings, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        Self {
            uid,
            link,
            live,
            readings,
            state: Mutex::new(SensorState {
                current: synthetic_reading(0),
                ..SensorState::default()
            }),
        }
    }

    /// Push `reading` to every subscriber and make it the current value
    ///
    /// Returns the number of subscribers reached.
    pub fn push(&self, reading: Reading) -> usize {
        lock(&self.state).current = reading;
        self.readings.send(reading).unwrap_or(0)
    }

    /// Set the value returned by `all_values` without pushing it
    pub fn set_reading(&self, reading: Reading) {
        lock(&self.state).current = reading;
    }

    /// Number of live reading subscriptions
    pub fn subscribers(&self) -> usize {
        self.readings.receiver_count()
    }

    /// The configured push period and change filter
    pub fn configuration(&self) -> Option<(Duration, bool)> {
        let state = lock(&self.state);
        state.period.map(|period| (period, state.value_has_to_change))
    }

    fn spawn_pusher(&self, period: Duration) -> JoinHandle<()> {
        let readings = self.readings.clone();
        let link = self.link.clone();
        let uid = self.uid.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut tick: u32 = 0;
            loop {
                interval.tick().await;
                if !link.load(Ordering::SeqCst) {
                    continue;
                }
                tick = tick.wrapping_add(1);
                let reaching = readings.send(synthetic_reading(tick)).unwrap_or(0);
                trace!("Simulated sensor {}: pushed reading to {} subscribers", uid, reaching);
            }
        })
    }
}

impl Drop for SimulatedAirSensor {
    fn drop(&mut self) {
        if let Some(pusher) = lock(&self.state).pusher.take() {
            pusher.abort();
        }
    }
}

#[async_trait]
impl AirSensorDevice for SimulatedAirSensor {
    fn uid(&self) -> &Id {
        &self.uid
    }

    async fn set_all_values_period(&self, period: Duration, value_has_to_change: bool) -> Result<()> {
        if !self.link.load(Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }
        let pusher = (self.live && !period.is_zero()).then(|| self.spawn_pusher(period));

        let mut state = lock(&self.state);
        state.period = Some(period);
        state.value_has_to_change = value_has_to_change;
        if let Some(previous) = std::mem::replace(&mut state.pusher, pusher) {
            previous.abort();
        }
        Ok(())
    }

    async fn all_values(&self) -> Result<Reading> {
        if !self.link.load(Ordering::SeqCst) {
            return Err(ConnError::NotConnected);
        }
        Ok(lock(&self.state).current)
    }

    fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.readings.subscribe()
    }
}

/// A plausible indoor reading that drifts slowly with `tick`
fn synthetic_reading(tick: u32) -> Reading {
    let wave = |period: u32, amplitude: i32| -> i32 {
        let phase = (tick % period) as i32;
        let half = (period / 2) as i32;
        amplitude * (half - (phase - half).abs()) / half.max(1)
    };

    Reading {
        iaq_index: 35 + wave(60, 20),
        iaq_index_accuracy: if tick < 5 { 1 } else { 3 },
        temperature: 2150 + wave(120, 150),
        humidity: 4500 + wave(90, 600),
        air_pressure: 101_325 - wave(240, 80),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refusals_and_counters() {
        let daemon = SimulatedDaemon::new();
        daemon.refuse_connects(2);
        let endpoint = Endpoint::new("localhost", 4223);

        assert_eq!(
            daemon.connect(&endpoint).await,
            Err(ConnError::Refused("localhost:4223".to_string()))
        );
        assert!(daemon.connect(&endpoint).await.is_err());
        assert!(daemon.connect(&endpoint).await.is_ok());
        assert_eq!(daemon.connect_attempts(), 3);
        assert!(daemon.is_connected());
    }

    #[tokio::test]
    async fn test_enumerate_requires_connection() {
        let daemon = SimulatedDaemon::new().with_device("Lxq", DeviceKind::Display);
        let mut events = daemon.events().subscribe::<EnumerateEvent>().unwrap();

        assert_eq!(daemon.enumerate().await, Err(ConnError::NotConnected));
        assert_eq!(daemon.enumerate_requests(), 0);

        daemon.connect(&Endpoint::new("localhost", 4223)).await.unwrap();
        daemon.enumerate().await.unwrap();
        assert_eq!(daemon.enumerate_requests(), 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event, EnumerateEvent::new("Lxq", 298, EnumerationType::Available));
    }

    #[tokio::test]
    async fn test_open_checks_kind_and_failures() {
        let daemon = SimulatedDaemon::new()
            .with_device("Lxq", DeviceKind::Display)
            .with_device("Aq1", DeviceKind::AirSensor);
        daemon.connect(&Endpoint::new("localhost", 4223)).await.unwrap();

        assert!(daemon.open_display(&Id::from("Lxq")).await.is_ok());
        assert_eq!(
            daemon.open_display(&Id::from("Aq1")).await.unwrap_err(),
            ConnError::UnknownDevice(Id::from("Aq1"))
        );

        daemon.fail_open("Aq1", true);
        assert!(matches!(
            daemon.open_air_sensor(&Id::from("Aq1")).await,
            Err(ConnError::Transport(_))
        ));
        daemon.fail_open("Aq1", false);
        assert!(daemon.open_air_sensor(&Id::from("Aq1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_display_records_lines() {
        let daemon = SimulatedDaemon::new().with_device("Lxq", DeviceKind::Display);
        daemon.connect(&Endpoint::new("localhost", 4223)).await.unwrap();
        let display = daemon.open_display(&Id::from("Lxq")).await.unwrap();

        display.write_line(0, 0, "Weather").await.unwrap();
        display.write_line(0, 8, "Station").await.unwrap();
        display.write_line(1, 2, "x").await.unwrap();

        let recorded = daemon.display("Lxq").unwrap();
        assert_eq!(recorded.line(0).as_deref(), Some("Weather Station"));
        assert_eq!(recorded.line(1).as_deref(), Some("  x"));
        assert_eq!(recorded.write_attempts(), 3);

        display.clear_display().await.unwrap();
        assert!(recorded.lines().is_empty());

        recorded.fail_writes(true);
        assert!(display.write_line(2, 0, "nope").await.is_err());
        assert_eq!(recorded.write_attempts(), 4);

        daemon.drop_connection();
        assert_eq!(display.clear_display().await, Err(ConnError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_sensor_pushes_at_period() {
        let daemon = SimulatedDaemon::new()
            .with_device("Aq1", DeviceKind::AirSensor)
            .with_live_readings();
        daemon.connect(&Endpoint::new("localhost", 4223)).await.unwrap();

        let sensor = daemon.open_air_sensor(&Id::from("Aq1")).await.unwrap();
        let mut readings = sensor.subscribe_readings();
        sensor
            .set_all_values_period(Duration::from_millis(1000), false)
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        readings.recv().await.unwrap();
        readings.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert_eq!(
            daemon.air_sensor("Aq1").unwrap().configuration(),
            Some((Duration::from_millis(1000), false))
        );
    }

    #[test]
    fn test_synthetic_reading_is_plausible() {
        for tick in 0..500 {
            let reading = synthetic_reading(tick);
            assert!((15..=55).contains(&reading.iaq_index));
            assert!((2000..=2300).contains(&reading.temperature));
            assert!((4500..=5100).contains(&reading.humidity));
            assert!((101_245..=101_325).contains(&reading.air_pressure));
        }
    }
}
