//! Capture device descriptors

use std::fmt;
use std::net::IpAddr;

/// A capture device as reported by one enumeration batch.
///
/// Everything is copied out of the engine's device list, so a descriptor stays valid after
/// the list has been freed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    name: String,
    description: Option<String>,
    addresses: Vec<IpAddr>,
}

impl DeviceDescriptor {
    pub fn new(name: String, description: Option<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            name,
            description,
            addresses,
        }
    }

    /// Interface identifier passed to the engine (not necessarily human-readable)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description, when the engine provides one
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Addresses in the order the engine listed them
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Get the primary IPv4 address if available
    pub fn primary_ipv4(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|ip| matches!(ip, IpAddr::V4(_)))
            .copied()
    }

    /// Get the primary IPv6 address if available
    pub fn primary_ipv6(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|ip| matches!(ip, IpAddr::V6(_)))
            .copied()
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{} ({})", self.name, desc),
            None => write!(f, "{}", self.name),
        }
    }
}
