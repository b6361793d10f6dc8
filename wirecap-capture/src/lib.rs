//! Packet capture sessions for wirecap
//!
//! This crate manages the lifecycle of native capture sessions: opening devices and capture
//! files, installing BPF filters, reading packets in the foreground or on a background worker,
//! and writing frames back to the wire or to dump files.
//!
//! ## Features
//!
//! - **Engines**: a pure-Rust capture-file engine by default, libpcap with the `libpcap` feature
//! - **Readers**: single pulls, a lazy single-pass iterator, or a background worker feeding a
//!   channel or callback sink, with cooperative stop and bounded cancel
//! - **Writers**: live injection and dump files behind one [`PacketWriter`] trait
//! - **Statistics**: per-reader counters merged with the engine's drop counters
//!
//! ## Example
//!
//! ```no_run
//! use wirecap_capture::{savefile, FileEngine, PacketWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FileEngine::new();
//! let reader = savefile::open_read(&engine, "in.pcap")?;
//! let mut writer = savefile::open_write(&reader, "out.pcap")?;
//!
//! for packet in reader.read_all()? {
//!     writer.write_packet(&packet?)?;
//! }
//! writer.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod filters;
pub mod format;
pub mod handle;
pub mod interface;
pub mod reader;
pub mod savefile;
pub mod stats;
pub mod writer;

// Re-export main types
pub use config::{checked_snaplen, CaptureConfig};
pub use engine::file::FileEngine;
#[cfg(feature = "libpcap")]
pub use engine::libpcap::PcapEngine;
pub use engine::{CaptureEngine, Session};
pub use filters::{combine_filters, FilterCompiler};
pub use handle::CaptureHandle;
pub use interface::{Device, DeviceCatalog};
pub use reader::{
    CallbackSink, ChannelSink, Completion, PacketReader, Packets, ReadEvent, ReadSink,
    SessionState,
};
pub use stats::{CaptureStats, StatsAccumulator};
pub use writer::{DumpFileWriter, LiveWriter, PacketWriter};

/// Engine used when no engine is named explicitly
#[cfg(feature = "libpcap")]
pub type DefaultEngine = PcapEngine;

/// Engine used when no engine is named explicitly
#[cfg(not(feature = "libpcap"))]
pub type DefaultEngine = FileEngine;
