/*!
 * Device kinds, daemon events and the typed device traits.
 *
 * This module defines the surface the station needs from a device SDK: the
 * events a daemon broadcasts and the two device handle traits.
 */
use std::fmt;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use stationlink_core::types::Id;

use crate::error::ConnError;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, ConnError>;

/// Device kinds the station knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    /// LCD 128x64 character display
    Display,
    /// Air Quality sensor
    AirSensor,
}

impl DeviceKind {
    /// Device identifier of the LCD 128x64 Bricklet
    pub const LCD_128X64_IDENTIFIER: u16 = 298;
    /// Device identifier of the Air Quality Bricklet
    pub const AIR_QUALITY_IDENTIFIER: u16 = 297;

    /// Map a daemon device identifier to a known kind
    pub fn from_identifier(device_identifier: u16) -> Option<Self> {
        match device_identifier {
            Self::LCD_128X64_IDENTIFIER => Some(DeviceKind::Display),
            Self::AIR_QUALITY_IDENTIFIER => Some(DeviceKind::AirSensor),
            _ => None,
        }
    }

    /// The daemon device identifier for this kind
    pub fn identifier(self) -> u16 {
        match self {
            DeviceKind::Display => Self::LCD_128X64_IDENTIFIER,
            DeviceKind::AirSensor => Self::AIR_QUALITY_IDENTIFIER,
        }
    }

    /// Human readable name
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceKind::Display => "LCD 128x64",
            DeviceKind::AirSensor => "Air Quality",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Why a device shows up in an enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumerationType {
    /// Answer to an explicit enumerate request
    Available,
    /// The device was newly connected
    Connected,
    /// The device was removed
    Disconnected,
}

/// One device announced by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerateEvent {
    /// The device uid
    pub uid: Id,
    /// The raw device identifier
    pub device_identifier: u16,
    /// The enumeration type
    pub enumeration_type: EnumerationType,
}

impl EnumerateEvent {
    /// Create a new enumeration event
    pub fn new<U: Into<Id>>(uid: U, device_identifier: u16, enumeration_type: EnumerationType) -> Self {
        Self {
            uid: uid.into(),
            device_identifier,
            enumeration_type,
        }
    }

    /// The known kind of the device, if any
    pub fn kind(&self) -> Option<DeviceKind> {
        DeviceKind::from_identifier(self.device_identifier)
    }
}

/// Why a connection was (re-)established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectReason {
    /// The initial, explicitly requested connect
    Request,
    /// The daemon link recovered on its own
    AutoReconnect,
}

/// Why a connection was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Explicit disconnect
    Request,
    /// Transport error
    Error,
    /// The daemon shut the connection down
    Shutdown,
}

/// Connection lifecycle events published by a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// The connection is up
    Connected(ConnectReason),
    /// The connection went down
    Disconnected(DisconnectReason),
}

/// One periodic sample from an air-quality sensor
///
/// Temperature, humidity and pressure are fixed-point hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Reading {
    /// Indoor air quality index
    pub iaq_index: i32,
    /// Accuracy of the IAQ index (0..=3)
    pub iaq_index_accuracy: u8,
    /// Temperature in 1/100 °C
    pub temperature: i32,
    /// Relative humidity in 1/100 %RH
    pub humidity: i32,
    /// Air pressure in 1/100 hPa
    pub air_pressure: i32,
}

impl Reading {
    /// Temperature in °C
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature) / 100.0
    }

    /// Relative humidity in %RH
    pub fn humidity_percent(&self) -> f64 {
        f64::from(self.humidity) / 100.0
    }

    /// Air pressure in hPa
    pub fn air_pressure_hpa(&self) -> f64 {
        f64::from(self.air_pressure) / 100.0
    }
}

/// A character display
#[async_trait]
pub trait DisplayDevice: Send + Sync + Debug {
    /// The device uid
    fn uid(&self) -> &Id;

    /// Clear the whole display
    async fn clear_display(&self) -> Result<()>;

    /// Write `text` to `line`, starting at column `position`
    async fn write_line(&self, line: u8, position: u8, text: &str) -> Result<()>;
}

/// An air-quality sensor pushing [`Reading`]s
#[async_trait]
pub trait AirSensorDevice: Send + Sync + Debug {
    /// The device uid
    fn uid(&self) -> &Id;

    /// Configure the periodic push
    ///
    /// With `value_has_to_change` false a reading is pushed every `period`
    /// whether or not it changed.
    async fn set_all_values_period(&self, period: Duration, value_has_to_change: bool) -> Result<()>;

    /// Read the current values once
    async fn all_values(&self) -> Result<Reading>;

    /// Subscribe to pushed readings
    fn subscribe_readings(&self) -> broadcast::Receiver<Reading>;
}
