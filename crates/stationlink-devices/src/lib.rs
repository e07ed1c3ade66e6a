/*!
 * StationLink Devices
 *
 * This crate connects to a device-communication daemon, keeps typed handles
 * for the devices it announces and renders air-quality readings on a
 * character display.
 */

#![warn(missing_docs)]

// Re-export core types
pub use stationlink_core::prelude;

pub mod adapter;
pub mod connection;
pub mod daemon;
pub mod device;
pub mod error;
pub mod history;
pub mod protocols;
pub mod registry;

pub use adapter::{format_reading, DisplayAdapter};
pub use connection::{Connection, ConnectionManager, ConnectionState};
pub use daemon::Daemon;
pub use device::{
    AirSensorDevice, ConnectReason, ConnectionEvent, DeviceKind, DisconnectReason, DisplayDevice, EnumerateEvent,
    EnumerationType, Reading,
};
pub use error::{ConnError, DeviceInitError, ShutdownError};
pub use history::{ReadingHistory, Sample};
pub use registry::{DeviceHandle, DeviceRegistry, RegistryOptions};

/// StationLink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names of the daemon implementations compiled into this crate
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = vec!["simulated"];

    #[cfg(feature = "tinkerforge")]
    backends.push("tinkerforge");

    backends
}
