//! Link-layer framing identifiers

use std::fmt;

/// How to parse the first header of a captured frame.
///
/// The value is reported once by the engine when a session is opened and is the same for
/// every packet of that session. Identifiers outside the well-known set are kept verbatim in
/// [`LinkLayerType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkLayerType {
    /// BSD loopback encapsulation
    BsdLoopback,
    /// IEEE 802.3 Ethernet (10 Mb, 100 Mb, 1000 Mb, ...)
    Ethernet,
    /// RFC 895 experimental Ethernet (3 Mb)
    Ethernet3Megabit,
    /// AX.25 amateur radio
    AmateurRadioAx25,
    /// Proteon ProNET token ring
    ProNet,
    /// IEEE 802.5 token ring
    TokenRing,
    /// ARCNet
    ArcNet,
    /// Any other data-link identifier
    Other(i32),
}

impl LinkLayerType {
    /// Map a native data-link identifier
    pub const fn from_raw(value: i32) -> Self {
        match value {
            0 => LinkLayerType::BsdLoopback,
            1 => LinkLayerType::Ethernet,
            2 => LinkLayerType::Ethernet3Megabit,
            3 => LinkLayerType::AmateurRadioAx25,
            4 => LinkLayerType::ProNet,
            6 => LinkLayerType::TokenRing,
            7 => LinkLayerType::ArcNet,
            other => LinkLayerType::Other(other),
        }
    }

    /// The native data-link identifier
    pub const fn raw(self) -> i32 {
        match self {
            LinkLayerType::BsdLoopback => 0,
            LinkLayerType::Ethernet => 1,
            LinkLayerType::Ethernet3Megabit => 2,
            LinkLayerType::AmateurRadioAx25 => 3,
            LinkLayerType::ProNet => 4,
            LinkLayerType::TokenRing => 6,
            LinkLayerType::ArcNet => 7,
            LinkLayerType::Other(value) => value,
        }
    }

    /// Short name as used by capture tools (`EN10MB`, `NULL`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            LinkLayerType::BsdLoopback => "NULL",
            LinkLayerType::Ethernet => "EN10MB",
            LinkLayerType::Ethernet3Megabit => "EN3MB",
            LinkLayerType::AmateurRadioAx25 => "AX25",
            LinkLayerType::ProNet => "PRONET",
            LinkLayerType::TokenRing => "IEEE802",
            LinkLayerType::ArcNet => "ARCNET",
            LinkLayerType::Other(_) => "UNKNOWN",
        }
    }
}

impl From<i32> for LinkLayerType {
    fn from(value: i32) -> Self {
        LinkLayerType::from_raw(value)
    }
}

impl From<LinkLayerType> for i32 {
    fn from(value: LinkLayerType) -> Self {
        value.raw()
    }
}

impl fmt::Display for LinkLayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkLayerType::Other(value) => write!(f, "DLT {}", value),
            known => write!(f, "{}", known.name()),
        }
    }
}
