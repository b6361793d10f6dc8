//! Capture session configuration

use std::time::Duration;
use wirecap_core::{Error, Result};

/// Largest accepted snapshot length
pub const MAX_SNAPLEN: u16 = u16::MAX;

/// Default snapshot length (capture whole frames)
pub const DEFAULT_SNAPLEN: u16 = MAX_SNAPLEN;

/// Default bounded wait of one native read call (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u32 = 100;

/// Configuration for opening live capture sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Maximum bytes to capture per packet
    pub snaplen: u16,
    /// Bounded wait of one native read call in milliseconds
    pub timeout_ms: u32,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Kernel buffer size in bytes (0 = engine default)
    pub buffer_size: u32,
    /// Deliver packets as soon as they arrive instead of batching
    pub immediate_mode: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            promiscuous: true,
            buffer_size: 0,
            immediate_mode: false,
        }
    }
}

impl CaptureConfig {
    pub fn with_snaplen(mut self, snaplen: u16) -> Self {
        self.snaplen = snaplen;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_immediate_mode(mut self, enable: bool) -> Self {
        self.immediate_mode = enable;
        self
    }

    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}

/// Validate a caller-supplied snapshot length (0..=65535)
pub fn checked_snaplen(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        Error::out_of_range(
            "snaplen",
            format!("must be a value between 0 and {}, got {}", MAX_SNAPLEN, value),
        )
    })
}
