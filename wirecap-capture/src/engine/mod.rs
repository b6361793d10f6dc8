//! The native capture engine surface.
//!
//! Everything above this module talks to the engine through these traits only:
//! open / read-one / compile / set-filter / break / close for sessions and
//! open-dump / write-record / flush / close for dump files.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wirecap_core::{DeviceDescriptor, Error, Timestamp};

use crate::config::CaptureConfig;

pub mod file;
#[cfg(feature = "libpcap")]
pub mod libpcap;
#[cfg(test)]
pub(crate) mod mock;

/// Failure text reported by an engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        EngineError(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EngineError {}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Capture(err.0)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Per-record header of the capture-file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub timestamp: Timestamp,
    /// Bytes actually stored
    pub caplen: u32,
    /// Length of the frame on the wire
    pub len: u32,
}

/// A frame copied out of the engine's buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub header: RecordHeader,
    pub data: Vec<u8>,
}

/// Outcome of one bounded-wait read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPacket {
    Packet(RawPacket),
    /// The read timeout expired with nothing to deliver
    Timeout,
    /// Offline source exhausted, or a break request was observed
    EndOfStream,
}

/// Counters kept by the engine for a live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeStats {
    pub received: u32,
    pub dropped: u32,
    pub if_dropped: u32,
}

/// Interrupts a blocking read. Callable from any thread while another thread is reading.
pub trait Breaker: Send + Sync {
    fn break_loop(&self);
}

/// Break primitive for engines that poll a flag between reads.
///
/// The request stays pending until the session consumes it with [`FlagBreaker::take`].
#[derive(Debug, Clone, Default)]
pub struct FlagBreaker(Arc<AtomicBool>);

impl FlagBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a pending break request
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Breaker for FlagBreaker {
    fn break_loop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// An open capture session (live device or offline file)
pub trait Session: Send + 'static {
    /// Transient compiled filter program
    type Program;
    type Dumper: Dumper;

    /// Data-link identifier of the session
    fn datalink(&self) -> i32;

    /// Pull one packet, waiting at most the session read timeout
    fn next_packet(&mut self) -> EngineResult<NextPacket>;

    /// Most recent error text recorded by the session
    fn last_error(&self) -> String;

    /// Break primitive shared with other threads
    fn breaker(&mut self) -> Arc<dyn Breaker>;

    /// Compile a filter expression. A failed compile owns no program.
    fn compile(&mut self, expression: &str, optimize: bool, netmask: u32)
        -> EngineResult<Self::Program>;

    fn set_filter(&mut self, program: &Self::Program) -> EngineResult<()>;

    fn free_program(&mut self, program: Self::Program);

    /// Install a filter that accepts every packet
    fn clear_filter(&mut self) -> EngineResult<()>;

    /// Inject a raw frame onto the wire
    fn send_packet(&mut self, data: &[u8]) -> EngineResult<()>;

    /// Open a dump file that records frames with this session's link type
    fn open_dump(&mut self, path: &Path) -> EngineResult<Self::Dumper>;

    fn stats(&mut self) -> EngineResult<NativeStats>;

    /// Release the native session. Called exactly once.
    fn close(&mut self);
}

/// An open dump file
pub trait Dumper: Send + 'static {
    fn write_record(&mut self, header: &RecordHeader, data: &[u8]) -> EngineResult<()>;

    fn flush(&mut self) -> EngineResult<()>;

    /// Release the dump file. Called exactly once.
    fn close(&mut self);
}

/// Entry point of a capture backend
pub trait CaptureEngine: Send + Sync + 'static {
    type Session: Session;

    /// Enumerate capture devices. The returned list is fully owned.
    fn find_all_devices(&self) -> EngineResult<Vec<DeviceDescriptor>>;

    fn open_live(&self, device: &str, config: &CaptureConfig) -> EngineResult<Self::Session>;

    fn open_offline(&self, path: &Path) -> EngineResult<Self::Session>;
}
