/*!
 * The device-communication daemon as seen by the station.
 *
 * The wire protocol lives behind this trait; implementations are in
 * [`crate::protocols`].
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use stationlink_core::event::SharedEventBus;
use stationlink_core::types::{Endpoint, Id};

use crate::device::{AirSensorDevice, DisplayDevice, Result};

/// Client side of a device-communication daemon
///
/// A daemon publishes [`crate::device::ConnectionEvent`] and
/// [`crate::device::EnumerateEvent`] values on its event bus.
#[async_trait]
pub trait Daemon: Send + Sync + Debug {
    /// Backend name, for logs
    fn name(&self) -> &'static str;

    /// Open the connection to the daemon
    async fn connect(&self, endpoint: &Endpoint) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;

    /// Ask the daemon to announce every reachable device
    ///
    /// Fails only when not connected. Announcements arrive asynchronously as
    /// enumeration events.
    async fn enumerate(&self) -> Result<()>;

    /// The bus on which connection and enumeration events are published
    fn events(&self) -> &SharedEventBus;

    /// Build a display handle for `uid`
    async fn open_display(&self, uid: &Id) -> Result<Arc<dyn DisplayDevice>>;

    /// Build an air-sensor handle for `uid`
    async fn open_air_sensor(&self, uid: &Id) -> Result<Arc<dyn AirSensorDevice>>;
}
