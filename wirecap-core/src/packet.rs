//! Packet types

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::LinkLayerType;

const MICROS_PER_SEC: u32 = 1_000_000;

/// Capture time with microsecond precision, counted from the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: i64,
    micros: u32,
}

impl Timestamp {
    /// Create a timestamp; microseconds past one second carry into `secs`
    pub const fn new(secs: i64, micros: u32) -> Self {
        Self {
            secs: secs + (micros / MICROS_PER_SEC) as i64,
            micros: micros % MICROS_PER_SEC,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert from `SystemTime`, truncating to microseconds
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(since.as_secs() as i64, since.subsec_micros()),
            Err(before) => {
                let before = before.duration();
                let micros = before.subsec_micros();
                if micros == 0 {
                    Self::new(-(before.as_secs() as i64), 0)
                } else {
                    Self::new(-(before.as_secs() as i64) - 1, MICROS_PER_SEC - micros)
                }
            }
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        let micros = Duration::from_micros(self.micros as u64);
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.secs as u64) + micros
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs()) + micros
        }
    }

    /// Whole seconds since the epoch
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Microseconds within the second (0..1_000_000)
    pub fn micros(&self) -> u32 {
        self.micros
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Timestamp::from_system_time(time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// A captured packet.
///
/// Built by the reader for every successful pull and never mutated afterwards. `data` may
/// be shorter than the frame seen on the wire when the session's snapshot length clipped it;
/// `wire_len` keeps the original length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    timestamp: Timestamp,
    link_type: LinkLayerType,
    wire_len: u32,
}

impl Packet {
    /// Create a packet whose on-wire length equals the captured length
    pub fn new(data: Vec<u8>, timestamp: Timestamp, link_type: LinkLayerType) -> Self {
        let wire_len = data.len() as u32;
        Self {
            data,
            timestamp,
            link_type,
            wire_len,
        }
    }

    /// Create a packet that was clipped from a longer frame
    pub fn with_wire_len(
        data: Vec<u8>,
        timestamp: Timestamp,
        link_type: LinkLayerType,
        wire_len: u32,
    ) -> Self {
        let wire_len = wire_len.max(data.len() as u32);
        Self {
            data,
            timestamp,
            link_type,
            wire_len,
        }
    }

    /// Packet contents including all headers
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Framing of the first header in `data`
    pub fn link_type(&self) -> LinkLayerType {
        self.link_type
    }

    /// Captured length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the frame on the wire
    pub fn wire_len(&self) -> u32 {
        self.wire_len
    }

    /// Whether the snapshot length clipped this packet
    pub fn is_truncated(&self) -> bool {
        (self.data.len() as u32) < self.wire_len
    }
}
