//! Scripted in-memory engine for unit tests.
//!
//! Each session plays back a list of [`Step`]s. Filters understand two expressions: `""`
//! (accept everything) and `"byte N"` (accept frames whose first byte is N). Compiling an
//! expression containing `invalid` fails; installing one containing `reject` fails. A shared
//! [`Ledger`] records program allocation, closes, injected frames and dumped records.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use wirecap_core::{DeviceDescriptor, Timestamp};

use super::{
    Breaker, CaptureEngine, Dumper, EngineError, EngineResult, FlagBreaker, NativeStats,
    NextPacket, RawPacket, RecordHeader, Session,
};
use crate::config::CaptureConfig;

/// Idle poll used once a script runs out
const IDLE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Packet(Vec<u8>),
    Timeout,
    Error(&'static str),
    /// Sleep without looking at the break flag, then time out
    Stall(Duration),
    /// End of stream; sticky once reached
    End,
}

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    pub programs_live: usize,
    pub programs_freed: usize,
    pub sessions_closed: usize,
    pub dumpers_closed: usize,
    pub installed: Option<String>,
    pub sent: Vec<Vec<u8>>,
    pub dumped: Vec<(RecordHeader, Vec<u8>)>,
    pub dump_paths: Vec<PathBuf>,
    pub flushes: usize,
    pub opened: Vec<(String, CaptureConfig)>,
}

#[derive(Clone)]
pub(crate) struct MockEngine {
    pub steps: Vec<Step>,
    pub datalink: i32,
    pub devices: Vec<DeviceDescriptor>,
    pub fail_flush: bool,
    pub ledger: Arc<Mutex<Ledger>>,
}

impl MockEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            datalink: 1,
            devices: Vec::new(),
            fail_flush: false,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    /// Frames followed by end-of-stream
    pub fn with_frames(frames: &[&[u8]]) -> Self {
        let mut steps: Vec<Step> = frames.iter().map(|f| Step::Packet(f.to_vec())).collect();
        steps.push(Step::End);
        Self::new(steps)
    }

    pub fn session(&self) -> MockSession {
        MockSession {
            steps: self.steps.iter().cloned().collect(),
            datalink: self.datalink,
            fail_flush: self.fail_flush,
            breaker: FlagBreaker::new(),
            accept: None,
            last_error: String::new(),
            clock: 0,
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl CaptureEngine for MockEngine {
    type Session = MockSession;

    fn find_all_devices(&self) -> EngineResult<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    fn open_live(&self, device: &str, config: &CaptureConfig) -> EngineResult<MockSession> {
        if !self.devices.iter().any(|d| d.name() == device) {
            return Err(EngineError::new(format!(
                "{}: No such device exists",
                device
            )));
        }
        self.ledger
            .lock()
            .opened
            .push((device.to_string(), config.clone()));
        Ok(self.session())
    }

    fn open_offline(&self, path: &Path) -> EngineResult<MockSession> {
        if path.to_string_lossy().contains("missing") {
            return Err(EngineError::new(format!(
                "{}: No such file or directory",
                path.display()
            )));
        }
        Ok(self.session())
    }
}

pub(crate) struct MockSession {
    steps: VecDeque<Step>,
    datalink: i32,
    fail_flush: bool,
    breaker: FlagBreaker,
    accept: Option<u8>,
    last_error: String,
    clock: i64,
    ledger: Arc<Mutex<Ledger>>,
}

pub(crate) struct MockProgram {
    expression: String,
    accept: Option<u8>,
}

impl MockSession {
    fn passes(&self, data: &[u8]) -> bool {
        match self.accept {
            Some(byte) => data.first() == Some(&byte),
            None => true,
        }
    }
}

impl Session for MockSession {
    type Program = MockProgram;
    type Dumper = MockDumper;

    fn datalink(&self) -> i32 {
        self.datalink
    }

    fn next_packet(&mut self) -> EngineResult<NextPacket> {
        loop {
            if self.breaker.take() {
                return Ok(NextPacket::EndOfStream);
            }
            match self.steps.pop_front() {
                Some(Step::Packet(data)) => {
                    if !self.passes(&data) {
                        continue;
                    }
                    self.clock += 1;
                    let len = data.len() as u32;
                    return Ok(NextPacket::Packet(RawPacket {
                        header: RecordHeader {
                            timestamp: Timestamp::new(self.clock, 500),
                            caplen: len,
                            len,
                        },
                        data,
                    }));
                }
                Some(Step::Timeout) => return Ok(NextPacket::Timeout),
                Some(Step::Error(msg)) => {
                    self.last_error = msg.to_string();
                    return Err(EngineError::new(msg));
                }
                Some(Step::Stall(duration)) => {
                    thread::sleep(duration);
                    return Ok(NextPacket::Timeout);
                }
                Some(Step::End) => {
                    self.steps.push_front(Step::End);
                    return Ok(NextPacket::EndOfStream);
                }
                None => {
                    thread::sleep(IDLE_POLL);
                    return Ok(NextPacket::Timeout);
                }
            }
        }
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
    ) -> EngineResult<MockProgram> {
        if expression.contains("invalid") {
            self.last_error = format!("syntax error in filter expression: {}", expression);
            return Err(EngineError::new(self.last_error.clone()));
        }
        let accept = match expression.strip_prefix("byte ") {
            Some(n) => Some(n.trim().parse::<u8>().map_err(|_| {
                EngineError::new(format!("bad byte value in filter expression: {}", n))
            })?),
            None => None,
        };
        self.ledger.lock().programs_live += 1;
        Ok(MockProgram {
            expression: expression.to_string(),
            accept,
        })
    }

    fn set_filter(&mut self, program: &MockProgram) -> EngineResult<()> {
        if program.expression.contains("reject") {
            self.last_error = "setsockopt: Invalid argument".to_string();
            return Err(EngineError::new(self.last_error.clone()));
        }
        self.accept = program.accept;
        self.ledger.lock().installed = Some(program.expression.clone());
        Ok(())
    }

    fn free_program(&mut self, program: MockProgram) {
        let mut ledger = self.ledger.lock();
        ledger.programs_live -= 1;
        ledger.programs_freed += 1;
        drop(program);
    }

    fn clear_filter(&mut self) -> EngineResult<()> {
        self.accept = None;
        self.ledger.lock().installed = Some(String::new());
        Ok(())
    }

    fn send_packet(&mut self, data: &[u8]) -> EngineResult<()> {
        self.ledger.lock().sent.push(data.to_vec());
        Ok(())
    }

    fn open_dump(&mut self, path: &Path) -> EngineResult<MockDumper> {
        self.ledger.lock().dump_paths.push(path.to_path_buf());
        Ok(MockDumper {
            fail_flush: self.fail_flush,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn stats(&mut self) -> EngineResult<NativeStats> {
        Ok(NativeStats {
            received: self.clock as u32,
            dropped: 0,
            if_dropped: 0,
        })
    }

    fn close(&mut self) {
        self.ledger.lock().sessions_closed += 1;
    }
}

pub(crate) struct MockDumper {
    fail_flush: bool,
    ledger: Arc<Mutex<Ledger>>,
}

impl Dumper for MockDumper {
    fn write_record(&mut self, header: &RecordHeader, data: &[u8]) -> EngineResult<()> {
        self.ledger.lock().dumped.push((*header, data.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        if self.fail_flush {
            return Err(EngineError::new("No space left on device"));
        }
        self.ledger.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.ledger.lock().dumpers_closed += 1;
    }
}
