//! Packet writers: live injection and dump files

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use wirecap_core::{Error, Packet, Result, Timestamp};

use crate::config::CaptureConfig;
use crate::engine::{CaptureEngine, Dumper, RecordHeader, Session};
use crate::handle::CaptureHandle;
use crate::reader::PacketReader;

/// Destination for raw frames
pub trait PacketWriter {
    /// Write raw frame bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Write a captured packet
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Push buffered bytes to their destination
    fn flush(&mut self) -> Result<()>;

    /// Release the underlying handle. Idempotent.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Injects frames onto the wire through its own live session
pub struct LiveWriter<S: Session> {
    handle: CaptureHandle<S>,
    sent: u64,
}

impl<S: Session> LiveWriter<S> {
    const RESOURCE: &'static str = "LiveWriter";

    pub fn new(handle: CaptureHandle<S>) -> Self {
        Self { handle, sent: 0 }
    }

    /// Open `device` for injection
    pub fn open<E>(engine: &E, device: &str, config: &CaptureConfig) -> Result<Self>
    where
        E: CaptureEngine<Session = S>,
    {
        Ok(Self::new(CaptureHandle::open_live(engine, device, config)?))
    }

    /// Frames injected so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn ensure_open(&self) -> Result<()> {
        if self.handle.is_valid() {
            Ok(())
        } else {
            Err(Error::Disposed(Self::RESOURCE))
        }
    }
}

impl<S: Session> PacketWriter for LiveWriter<S> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if data.is_empty() {
            return Err(Error::EmptyArgument("data"));
        }
        self.handle.with_session(|session| session.send_packet(data))?;
        self.sent += 1;
        Ok(())
    }

    /// Only the frame bytes go out; timestamp and link type are not transmitted
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.write(packet.data())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn dispose(&mut self) {
        if self.handle.is_valid() {
            self.handle.release();
            info!(device = self.handle.source(), sent = self.sent, "Closed live writer");
        }
    }

    fn is_disposed(&self) -> bool {
        !self.handle.is_valid()
    }
}

impl<S: Session> Drop for LiveWriter<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Writes records to a dump file in the standard capture-file format
pub struct DumpFileWriter<D: Dumper> {
    dumper: Option<D>,
    path: PathBuf,
    records: u64,
}

impl<D: Dumper> DumpFileWriter<D> {
    const RESOURCE: &'static str = "DumpFileWriter";

    /// Open a dump file with the link type and snapshot length of `reader`'s session
    pub fn create<S>(reader: &PacketReader<S>, path: &Path) -> Result<Self>
    where
        S: Session<Dumper = D>,
    {
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyArgument("path"));
        }
        if reader.is_disposed() {
            return Err(Error::Disposed("PacketReader"));
        }
        let dumper = reader
            .handle()
            .with_session(|session| session.open_dump(path))?;
        info!(path = %path.display(), "Opened dump file");

        Ok(Self {
            dumper: Some(dumper),
            path: path.to_path_buf(),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    fn dumper(&mut self) -> Result<&mut D> {
        self.dumper
            .as_mut()
            .ok_or(Error::Disposed(Self::RESOURCE))
    }

    fn write_record(&mut self, header: RecordHeader, data: &[u8]) -> Result<()> {
        self.dumper()?.write_record(&header, data)?;
        self.records += 1;
        Ok(())
    }
}

impl<D: Dumper> PacketWriter for DumpFileWriter<D> {
    /// Record `data` stamped with the current time
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.dumper()?;
        if data.is_empty() {
            return Err(Error::EmptyArgument("data"));
        }
        let len = data.len() as u32;
        let header = RecordHeader {
            timestamp: Timestamp::now(),
            caplen: len,
            len,
        };
        self.write_record(header, data)
    }

    /// Record `packet` with its capture timestamp and original length
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let header = RecordHeader {
            timestamp: packet.timestamp(),
            caplen: packet.len() as u32,
            len: packet.wire_len(),
        };
        self.write_record(header, packet.data())
    }

    fn flush(&mut self) -> Result<()> {
        self.dumper()?.flush()?;
        debug!(path = %self.path.display(), records = self.records, "Flushed dump file");
        Ok(())
    }

    fn dispose(&mut self) {
        if let Some(mut dumper) = self.dumper.take() {
            dumper.close();
            info!(path = %self.path.display(), records = self.records, "Closed dump file");
        }
    }

    fn is_disposed(&self) -> bool {
        self.dumper.is_none()
    }
}

impl<D: Dumper> Drop for DumpFileWriter<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}
