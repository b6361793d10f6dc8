//! Pure-Rust engine for capture files
//!
//! Plays back savefiles and writes dump files without the system libpcap. Live capture,
//! filter compilation and injection need the `libpcap` feature; here filters compile to
//! programs that are installed but have no effect, matching how offline sources behave.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use pnet_datalink::{self, NetworkInterface};
use tracing::{debug, warn};
use wirecap_core::DeviceDescriptor;

use super::{
    Breaker, CaptureEngine, Dumper, EngineError, EngineResult, FlagBreaker, NativeStats,
    NextPacket, RawPacket, RecordHeader, Session,
};
use crate::config::CaptureConfig;
use crate::format::{FileHeader, FILE_HEADER_LEN, RECORD_HEADER_LEN};

/// Engine backed by savefiles on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FileEngine;

impl FileEngine {
    pub fn new() -> Self {
        FileEngine
    }
}

fn describe(iface: &NetworkInterface) -> DeviceDescriptor {
    let description = if iface.description.is_empty() {
        None
    } else {
        Some(iface.description.clone())
    };
    let addresses = iface.ips.iter().map(|network| network.ip()).collect();
    DeviceDescriptor::new(iface.name.clone(), description, addresses)
}

fn io_error(path: &Path, err: io::Error) -> EngineError {
    EngineError::new(format!("{}: {}", path.display(), err))
}

impl CaptureEngine for FileEngine {
    type Session = FileSession;

    fn find_all_devices(&self) -> EngineResult<Vec<DeviceDescriptor>> {
        Ok(pnet_datalink::interfaces().iter().map(describe).collect())
    }

    fn open_live(&self, device: &str, _config: &CaptureConfig) -> EngineResult<FileSession> {
        Err(EngineError::new(format!(
            "{}: live capture requires the libpcap feature",
            device
        )))
    }

    fn open_offline(&self, path: &Path) -> EngineResult<FileSession> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let mut reader = BufReader::new(file);

        let mut raw = [0u8; FILE_HEADER_LEN];
        let read = fill(&mut reader, &mut raw).map_err(|e| io_error(path, e))?;
        if read < FILE_HEADER_LEN {
            return Err(EngineError::new(format!(
                "{}: truncated dump file; tried to read {} file header bytes, only got {}",
                path.display(),
                FILE_HEADER_LEN,
                read
            )));
        }
        let header = FileHeader::decode(&raw)?;

        debug!(
            path = %path.display(),
            linktype = header.linktype,
            snaplen = header.snaplen,
            "Opened capture file"
        );

        Ok(FileSession {
            path: path.to_path_buf(),
            reader: Some(reader),
            header,
            breaker: FlagBreaker::new(),
            last_error: String::new(),
            filter: None,
        })
    }
}

/// Read until `buf` is full or the source is exhausted
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Offline session over one capture file
pub struct FileSession {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    header: FileHeader,
    breaker: FlagBreaker,
    last_error: String,
    filter: Option<String>,
}

/// Filter program of an offline session
#[derive(Debug, Clone)]
pub struct FileProgram {
    expression: String,
}

impl FileSession {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    fn read_record(&mut self) -> EngineResult<NextPacket> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| EngineError::new("capture file is closed"))?;

        let mut raw = [0u8; RECORD_HEADER_LEN];
        let read = fill(reader, &mut raw).map_err(|e| io_error(&self.path, e))?;
        if read == 0 {
            return Ok(NextPacket::EndOfStream);
        }
        if read < RECORD_HEADER_LEN {
            return Err(EngineError::new(format!(
                "truncated dump file; tried to read {} header bytes, only got {}",
                RECORD_HEADER_LEN, read
            )));
        }

        let header = self.header.decode_record(&raw)?;
        let mut data = vec![0u8; header.caplen as usize];
        let read = fill(reader, &mut data).map_err(|e| io_error(&self.path, e))?;
        if read < data.len() {
            return Err(EngineError::new(format!(
                "truncated dump file; tried to read {} captured bytes, only got {}",
                header.caplen, read
            )));
        }

        Ok(NextPacket::Packet(RawPacket { header, data }))
    }

    fn record_error<T>(&mut self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(err) = &result {
            self.last_error = err.0.clone();
        }
        result
    }
}

impl Session for FileSession {
    type Program = FileProgram;
    type Dumper = FileDumper;

    fn datalink(&self) -> i32 {
        self.header.linktype
    }

    fn next_packet(&mut self) -> EngineResult<NextPacket> {
        if self.breaker.take() {
            return Ok(NextPacket::EndOfStream);
        }
        let result = self.read_record();
        self.record_error(result)
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn breaker(&mut self) -> Arc<dyn Breaker> {
        Arc::new(self.breaker.clone())
    }

    fn compile(
        &mut self,
        expression: &str,
        _optimize: bool,
        _netmask: u32,
    ) -> EngineResult<FileProgram> {
        Ok(FileProgram {
            expression: expression.to_string(),
        })
    }

    fn set_filter(&mut self, program: &FileProgram) -> EngineResult<()> {
        debug!(
            filter = %program.expression,
            "Filter installed on an offline source; it has no effect"
        );
        self.filter = Some(program.expression.clone());
        Ok(())
    }

    fn free_program(&mut self, program: FileProgram) {
        drop(program);
    }

    fn clear_filter(&mut self) -> EngineResult<()> {
        self.filter = None;
        Ok(())
    }

    fn send_packet(&mut self, _data: &[u8]) -> EngineResult<()> {
        let result = Err(EngineError::new(
            "cannot inject packets through an offline capture file",
        ));
        self.record_error(result)
    }

    fn open_dump(&mut self, path: &Path) -> EngineResult<FileDumper> {
        let result = FileDumper::create(path, self.header.linktype, self.header.snaplen);
        self.record_error(result)
    }

    fn stats(&mut self) -> EngineResult<NativeStats> {
        let result = Err(EngineError::new(
            "Statistics aren't available from savefiles",
        ));
        self.record_error(result)
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Dump file written in the standard savefile format
pub struct FileDumper {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    header: FileHeader,
    scratch: BytesMut,
}

impl FileDumper {
    /// Create (or truncate) `path` and write the global header
    pub fn create(path: &Path, linktype: i32, snaplen: u32) -> EngineResult<Self> {
        let file = File::create(path).map_err(|e| io_error(path, e))?;
        let mut writer = BufWriter::new(file);

        let header = FileHeader::new(linktype, snaplen);
        let mut scratch = BytesMut::with_capacity(FILE_HEADER_LEN);
        header.encode(&mut scratch);
        writer.write_all(&scratch).map_err(|e| io_error(path, e))?;
        scratch.clear();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            header,
            scratch,
        })
    }

    fn writer(&mut self) -> EngineResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| EngineError::new("dump file is closed"))
    }
}

impl Dumper for FileDumper {
    fn write_record(&mut self, header: &RecordHeader, data: &[u8]) -> EngineResult<()> {
        self.scratch.clear();
        self.header.encode_record(header, &mut self.scratch);
        self.scratch.extend_from_slice(data);

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EngineError::new("dump file is closed"))?;
        writer
            .write_all(&self.scratch)
            .map_err(|e| io_error(&self.path, e))
    }

    fn flush(&mut self) -> EngineResult<()> {
        let path = self.path.clone();
        let writer = self.writer()?;
        writer.flush().map_err(|e| io_error(&path, e))?;
        writer.get_ref().sync_data().map_err(|e| io_error(&path, e))
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "Failed to flush dump file on close");
            }
        }
    }
}
