//! Engine backed by the system libpcap through the `pcap` crate

use std::path::Path;
use std::sync::Arc;

use pcap::{Active, BpfProgram, BreakLoop, Capture, Device, Offline, PacketHeader, Savefile};
use tracing::debug;
use wirecap_core::{DeviceDescriptor, Timestamp};

use super::{
    Breaker, CaptureEngine, Dumper, EngineError, EngineResult, NativeStats, NextPacket,
    RawPacket, RecordHeader, Session,
};
use crate::config::CaptureConfig;

impl From<pcap::Error> for EngineError {
    fn from(err: pcap::Error) -> Self {
        EngineError(err.to_string())
    }
}

/// libpcap engine
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapEngine;

impl PcapEngine {
    pub fn new() -> Self {
        PcapEngine
    }
}

impl CaptureEngine for PcapEngine {
    type Session = PcapSession;

    fn find_all_devices(&self) -> EngineResult<Vec<DeviceDescriptor>> {
        let devices = Device::list()?;
        Ok(devices
            .into_iter()
            .map(|device| {
                let addresses = device.addresses.iter().map(|a| a.addr).collect();
                DeviceDescriptor::new(device.name, device.desc, addresses)
            })
            .collect())
    }

    fn open_live(&self, device: &str, config: &CaptureConfig) -> EngineResult<PcapSession> {
        let mut capture = Capture::from_device(device)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen as i32)
            .timeout(config.timeout_ms as i32)
            .immediate_mode(config.immediate_mode);

        if config.buffer_size > 0 {
            capture = capture.buffer_size(config.buffer_size as i32);
        }

        let capture = capture.open()?;
        debug!(device, "libpcap live handle activated");
        Ok(PcapSession::new(Source::Live(capture)))
    }

    fn open_offline(&self, path: &Path) -> EngineResult<PcapSession> {
        let capture = Capture::from_file(path)?;
        Ok(PcapSession::new(Source::Offline(capture)))
    }
}

enum Source {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// Live or offline libpcap session
pub struct PcapSession {
    source: Source,
    last_error: String,
}

/// Filter program compiled by libpcap
pub struct PcapProgram {
    expression: String,
    optimize: bool,
    compiled: BpfProgram,
}

impl PcapProgram {
    /// Whether the compiled program accepts `frame`
    pub fn matches(&self, frame: &[u8]) -> bool {
        self.compiled.filter(frame)
    }
}

struct PcapBreaker(BreakLoop);

impl Breaker for PcapBreaker {
    fn break_loop(&self) {
        self.0.breakloop();
    }
}

macro_rules! with_capture {
    ($session:expr, $capture:ident => $body:expr) => {
        match &mut $session.source {
            Source::Live($capture) => $body,
            Source::Offline($capture) => $body,
        }
    };
}

impl PcapSession {
    fn new(source: Source) -> Self {
        Self {
            source,
            last_error: String::new(),
        }
    }

    fn record<T>(&mut self, result: Result<T, pcap::Error>) -> EngineResult<T> {
        result.map_err(|err| {
            let err = EngineError::from(err);
            self.last_error = err.0.clone();
            err
        })
    }
}

fn raw_packet(header: &PacketHeader, data: &[u8]) -> RawPacket {
    RawPacket {
        header: RecordHeader {
            timestamp: Timestamp::new(header.ts.tv_sec as i64, header.ts.tv_usec as u32),
            caplen: header.caplen,
            len: header.len,
        },
        data: data.to_vec(),
    }
}

impl Session for PcapSession {
    type Program = PcapProgram;
    type Dumper = PcapDumper;

    fn datalink(&self) -> i32 {
        match &self.source {
            Source::Live(capture) => capture.get_datalink().0,
            Source::Offline(capture) => capture.get_datalink().0,
        }
    }

    fn next_packet(&mut self) -> EngineResult<NextPacket> {
        let result = with_capture!(self, capture => match capture.next_packet() {
            Ok(packet) => Ok(NextPacket::Packet(raw_packet(packet.header, packet.data))),
            Err(pcap::Error::TimeoutExpired) => Ok(NextPacket::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(NextPacket::EndOfStream),
            Err(err) => Err(err),
        });
        self.record(result)
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn breaker(&mut self) -> Arc<dyn Breaker> {
        let handle = with_capture!(self, capture => capture.breakloop_handle());
        Arc::new(PcapBreaker(handle))
    }

    fn compile(
        &mut self,
        expression: &str,
        optimize: bool,
        _netmask: u32,
    ) -> EngineResult<PcapProgram> {
        let result = with_capture!(self, capture => capture.compile(expression, optimize));
        let compiled = self.record(result)?;
        Ok(PcapProgram {
            expression: expression.to_string(),
            optimize,
            compiled,
        })
    }

    fn set_filter(&mut self, program: &PcapProgram) -> EngineResult<()> {
        // pcap 2 has no call that installs an existing BpfProgram; filter() compiles the
        // expression again and installs that copy
        let result =
            with_capture!(self, capture => capture.filter(&program.expression, program.optimize));
        self.record(result)
    }

    fn free_program(&mut self, program: PcapProgram) {
        // BpfProgram frees its instructions on drop
        drop(program);
    }

    fn clear_filter(&mut self) -> EngineResult<()> {
        let result = with_capture!(self, capture => capture.filter("", true));
        self.record(result)
    }

    fn send_packet(&mut self, data: &[u8]) -> EngineResult<()> {
        match &mut self.source {
            Source::Live(capture) => {
                let result = capture.sendpacket(data);
                self.record(result)
            }
            Source::Offline(_) => Err(EngineError::new(
                "cannot inject packets through an offline capture file",
            )),
        }
    }

    fn open_dump(&mut self, path: &Path) -> EngineResult<PcapDumper> {
        let result = with_capture!(self, capture => capture.savefile(path));
        let savefile = self.record(result)?;
        Ok(PcapDumper {
            savefile: Some(savefile),
        })
    }

    fn stats(&mut self) -> EngineResult<NativeStats> {
        let result = with_capture!(self, capture => capture.stats());
        let stat = self.record(result)?;
        Ok(NativeStats {
            received: stat.received,
            dropped: stat.dropped,
            if_dropped: stat.if_dropped,
        })
    }

    fn close(&mut self) {
        // pcap_close runs when the capture is dropped with the session
        debug!("Closing libpcap session");
    }
}

/// Dump file written by libpcap
pub struct PcapDumper {
    savefile: Option<Savefile>,
}

impl Dumper for PcapDumper {
    fn write_record(&mut self, header: &RecordHeader, data: &[u8]) -> EngineResult<()> {
        let savefile = self
            .savefile
            .as_mut()
            .ok_or_else(|| EngineError::new("dump file is closed"))?;

        let caplen = header.caplen.min(data.len() as u32);
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: header.timestamp.secs() as _,
                tv_usec: header.timestamp.micros() as _,
            },
            caplen,
            len: header.len,
        };
        savefile.write(&pcap::Packet::new(&header, &data[..caplen as usize]));
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        match self.savefile.as_mut() {
            Some(savefile) => Ok(savefile.flush()?),
            None => Err(EngineError::new("dump file is closed")),
        }
    }

    fn close(&mut self) {
        // pcap_dump_close runs on drop
        self.savefile = None;
    }
}
