/*!
 * Daemon implementations for StationLink.
 */

pub mod simulated;

#[cfg(feature = "tinkerforge")]
pub mod tinkerforge;

pub use simulated::{SimulatedAirSensor, SimulatedDaemon, SimulatedDisplay};

#[cfg(feature = "tinkerforge")]
pub use self::tinkerforge::{TinkerforgeAirSensor, TinkerforgeDaemon, TinkerforgeDisplay};
