/*!
 * Core data types for StationLink.
 *
 * This module defines the small value types shared by every StationLink crate.
 */
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque identifier assigned by the daemon to a device module
///
/// Identifiers are only ever compared for equality, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(String);

impl Id {
    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Address of the device-communication daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_conversions() {
        let a = Id::from("Lxq");
        let b = Id::from("Lxq".to_string());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Lxq");
        assert_eq!(a.to_string(), "Lxq");
        assert_ne!(a, Id::from("Mxq"));
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("localhost", 4223);
        assert_eq!(endpoint.to_string(), "localhost:4223");
    }
}
