/*!
 * Error types for daemon and device operations.
 *
 * None of these are fatal: a [`ConnError`] is retried where success is
 * required, a [`DeviceInitError`] discards the handle it concerns, and a
 * [`ShutdownError`] is logged and ignored.
 */
use thiserror::Error;

use stationlink_core::types::Id;

use crate::device::DeviceKind;

/// Transport-level failure talking to the daemon or to a device through it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    /// The connection to the daemon is not established
    #[error("Not connected")]
    NotConnected,

    /// The daemon refused or did not answer the connection attempt
    #[error("Connection to {0} refused")]
    Refused(String),

    /// The daemon does not know a device with this uid and kind
    #[error("Unknown device {0}")]
    UnknownDevice(Id),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnError {
    /// Create a new transport error
    pub fn transport<S: AsRef<str>>(msg: S) -> Self {
        ConnError::Transport(msg.as_ref().to_string())
    }
}

/// Failure building or configuring a device handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} {uid} init failed: {source}")]
pub struct DeviceInitError {
    /// The device uid
    pub uid: Id,
    /// The kind the handle was built for
    pub kind: DeviceKind,
    /// The underlying transport failure
    #[source]
    pub source: ConnError,
}

impl DeviceInitError {
    /// Create a new init error
    pub fn new(uid: &Id, kind: DeviceKind, source: ConnError) -> Self {
        Self {
            uid: uid.clone(),
            kind,
            source,
        }
    }
}

/// Failure during the best-effort disconnect at exit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The daemon rejected or could not process the disconnect
    #[error("Disconnect failed: {0}")]
    Disconnect(#[from] ConnError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConnError::transport("socket closed");
        assert_eq!(err.to_string(), "Transport error: socket closed");

        let err = ConnError::UnknownDevice(Id::from("Aq1"));
        assert_eq!(err.to_string(), "Unknown device Aq1");

        let err = DeviceInitError::new(&Id::from("Lxq"), DeviceKind::Display, ConnError::NotConnected);
        assert_eq!(err.to_string(), "LCD 128x64 Lxq init failed: Not connected");

        let err = ShutdownError::from(ConnError::NotConnected);
        assert_eq!(err.to_string(), "Disconnect failed: Not connected");
    }
}
