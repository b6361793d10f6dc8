//! Packet reader: synchronous pulls and a background read loop
//!
//! A reader owns one [`CaptureHandle`] and moves through [`SessionState`]:
//!
//! ```text
//! Idle --read_one--> Pulling --> Idle
//! Idle --start_async--> Reading --(end of stream | error | break)--> Idle
//! Reading --cancel_async--> Stopping --> Idle
//! any --dispose--> Disposed
//! ```
//!
//! Only one read path holds the session at a time: a foreground pull and a background run
//! each claim it with one compare-and-swap out of `Idle`. Every native read is a bounded
//! wait. Timeouts are retried inside the reader, so callers only ever see a packet,
//! end-of-stream or an error.

use std::iter::FusedIterator;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use wirecap_core::{Error, LinkLayerType, Packet, Result};

use crate::config::CaptureConfig;
use crate::engine::{CaptureEngine, NextPacket, Session};
use crate::filters::{FilterCompiler, DEFAULT_NETMASK};
use crate::handle::CaptureHandle;
use crate::stats::{CaptureStats, StatsAccumulator};

const RESOURCE: &str = "PacketReader";
const BUSY: &str = "An asynchronous operation is in progress.";
const NOT_BUSY: &str = "No asynchronous operation in progress.";

/// Name of the background read thread
pub const WORKER_NAME: &str = "packet-capture-worker";

/// How many read timeouts `cancel_async` waits for the worker
const CANCEL_WAIT_TIMEOUTS: u32 = 2;

/// Lifecycle of a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    /// A background read is active
    Reading = 1,
    /// A background read was asked to stop and has not finished yet
    Stopping = 2,
    /// Terminal
    Disposed = 3,
    /// A foreground `read_one` is in progress
    Pulling = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Reading,
            2 => SessionState::Stopping,
            4 => SessionState::Pulling,
            _ => SessionState::Disposed,
        }
    }

    fn is_busy(self) -> bool {
        matches!(self, SessionState::Reading | SessionState::Stopping)
    }

    fn is_reading(self) -> bool {
        matches!(
            self,
            SessionState::Reading | SessionState::Stopping | SessionState::Pulling
        )
    }

    /// Error for a failed claim out of `Idle`
    fn claim_error(self) -> Error {
        match self {
            SessionState::Disposed => Error::Disposed(RESOURCE),
            _ => Error::InvalidOperation(BUSY),
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        StateCell(AtomicU8::new(SessionState::Idle as u8))
    }

    fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; on failure returns the state actually found
    fn transition(
        &self,
        from: SessionState,
        to: SessionState,
    ) -> std::result::Result<(), SessionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }

    fn swap(&self, to: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(to as u8, Ordering::AcqRel))
    }

    /// `Reading | Stopping | Pulling -> Idle`; leaves `Disposed` alone
    fn finish_read(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                SessionState::from_u8(raw)
                    .is_reading()
                    .then_some(SessionState::Idle as u8)
            })
            .is_ok()
    }
}

/// Outcome of one background read, delivered exactly once
#[derive(Debug)]
pub enum Completion {
    /// End of stream or a stop request
    Ok,
    Failed(Error),
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        matches!(self, Completion::Ok)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Completion::Ok => None,
            Completion::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Completion::Ok => Ok(()),
            Completion::Failed(err) => Err(err),
        }
    }
}

impl From<Result<()>> for Completion {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Completion::Ok,
            Err(err) => Completion::Failed(err),
        }
    }
}

/// Message pushed by the worker of [`PacketReader::start_async_channel`]
#[derive(Debug)]
pub enum ReadEvent {
    Packet(Packet),
    /// Always the last event of a run
    Completed(Completion),
}

/// Consumer of a background read. Both callbacks run on the worker thread.
pub trait ReadSink: Send + 'static {
    fn packet_read(&mut self, packet: Packet);

    fn read_completed(&mut self, completion: Completion);
}

/// Forwards events to a channel; the receiving side drains it on any thread
pub struct ChannelSink {
    tx: Sender<ReadEvent>,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(tx: Sender<ReadEvent>) -> Self {
        Self {
            tx,
            disconnected: false,
        }
    }

    fn send(&mut self, event: ReadEvent) {
        if self.tx.send(event).is_err() && !self.disconnected {
            self.disconnected = true;
            warn!("Read event receiver dropped; discarding events");
        }
    }
}

impl ReadSink for ChannelSink {
    fn packet_read(&mut self, packet: Packet) {
        self.send(ReadEvent::Packet(packet));
    }

    fn read_completed(&mut self, completion: Completion) {
        self.send(ReadEvent::Completed(completion));
    }
}

/// Sink built from two closures
pub struct CallbackSink<P, C> {
    on_packet: P,
    on_completed: C,
}

impl<P, C> CallbackSink<P, C>
where
    P: FnMut(Packet) + Send + 'static,
    C: FnMut(Completion) + Send + 'static,
{
    pub fn new(on_packet: P, on_completed: C) -> Self {
        Self {
            on_packet,
            on_completed,
        }
    }
}

impl<P, C> ReadSink for CallbackSink<P, C>
where
    P: FnMut(Packet) + Send + 'static,
    C: FnMut(Completion) + Send + 'static,
{
    fn packet_read(&mut self, packet: Packet) {
        (self.on_packet)(packet)
    }

    fn read_completed(&mut self, completion: Completion) {
        (self.on_completed)(completion)
    }
}

struct Worker {
    thread: JoinHandle<()>,
    /// Disconnects once the worker has delivered its completion
    done: Receiver<()>,
}

impl Worker {
    fn is_current(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }

    fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait up to `bound` for the worker to finish; gives the worker back on timeout
    fn wait(self, bound: Duration) -> std::result::Result<(), Worker> {
        match self.done.recv_timeout(bound) {
            Err(RecvTimeoutError::Timeout) => Err(self),
            _ => {
                self.join();
                Ok(())
            }
        }
    }

    fn join(self) {
        if self.thread.join().is_err() {
            error!("Packet capture worker panicked");
        }
    }
}

/// Returns the reader to `Idle` once a read path lets go of the session, even on unwind
struct ReadGuard {
    state: Arc<StateCell>,
    armed: bool,
}

impl ReadGuard {
    fn finish(&mut self) {
        if self.armed {
            self.armed = false;
            self.state.finish_read();
        }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Reads packets from one capture session
pub struct PacketReader<S: Session> {
    handle: CaptureHandle<S>,
    state: Arc<StateCell>,
    stats: StatsAccumulator,
    filters: FilterCompiler,
    worker: Mutex<Option<Worker>>,
}

impl<S: Session> PacketReader<S> {
    pub fn new(handle: CaptureHandle<S>) -> Self {
        Self {
            handle,
            state: Arc::new(StateCell::new()),
            stats: StatsAccumulator::new(),
            filters: FilterCompiler::new(),
            worker: Mutex::new(None),
        }
    }

    /// Open a reader on a live device
    pub fn open_live<E>(engine: &E, device: &str, config: &CaptureConfig) -> Result<Self>
    where
        E: CaptureEngine<Session = S>,
    {
        Ok(Self::new(CaptureHandle::open_live(engine, device, config)?))
    }

    /// Open a reader over a capture file
    pub fn open_offline<E>(engine: &E, path: &Path) -> Result<Self>
    where
        E: CaptureEngine<Session = S>,
    {
        Ok(Self::new(CaptureHandle::open_offline(engine, path)?))
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Whether a background read is active
    pub fn is_busy(&self) -> bool {
        self.state.load().is_busy()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load() == SessionState::Disposed
    }

    /// Framing of every packet this reader produces
    pub fn link_type(&self) -> Result<LinkLayerType> {
        self.ensure_not_disposed()?;
        Ok(self.handle.link_type())
    }

    /// Most recent engine error text
    pub fn last_error(&self) -> Result<String> {
        self.ensure_not_disposed()?;
        Ok(self.handle.last_error())
    }

    pub(crate) fn handle(&self) -> &CaptureHandle<S> {
        &self.handle
    }

    /// Counters kept by this reader
    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    /// Reader counters merged with the engine's received/dropped counters
    pub fn native_stats(&self) -> Result<CaptureStats> {
        self.ensure_not_disposed()?;
        let native = self.handle.with_session(|session| session.stats())?;
        Ok(self.stats.snapshot().with_native(native))
    }

    /// Install a filter; an empty expression clears it
    pub fn apply_filter(&self, expression: &str) -> Result<()> {
        self.apply_filter_with_netmask(expression, DEFAULT_NETMASK)
    }

    pub fn apply_filter_with_netmask(&self, expression: &str, netmask: u32) -> Result<()> {
        self.ensure_not_disposed()?;
        self.filters
            .compile_and_install(&self.handle, expression, netmask)
    }

    pub fn clear_filter(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.filters.clear(&self.handle)
    }

    /// Pull one packet. `Ok(None)` means the source is exhausted or a stop was observed.
    ///
    /// The reader is `Pulling` for the duration of the call, so a concurrent `read_one` or
    /// `start_async` fails with [`Error::InvalidOperation`].
    pub fn read_one(&self) -> Result<Option<Packet>> {
        self.state
            .transition(SessionState::Idle, SessionState::Pulling)
            .map_err(SessionState::claim_error)?;
        let mut guard = ReadGuard {
            state: Arc::clone(&self.state),
            armed: true,
        };

        let result = pull(&self.handle, &self.stats);
        guard.finish();
        result
    }

    /// Lazily read packets until end-of-stream.
    ///
    /// Single pass: the session is consumed as the iterator advances, and once it reports
    /// end-of-stream (or yields an error) the iterator is finished.
    pub fn read_all(&self) -> Result<Packets<'_, S>> {
        self.ensure_idle()?;
        Ok(Packets {
            reader: self,
            finished: false,
        })
    }

    /// Break out of an in-progress blocking read. Later reads are still allowed.
    pub fn stop(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.handle.break_loop();
        Ok(())
    }

    /// Start reading on a dedicated worker thread.
    ///
    /// Each packet goes to `sink.packet_read`, in engine order. When the read ends the reader
    /// returns to `Idle` and `sink.read_completed` is called exactly once, carrying the error
    /// that ended the run, if any.
    pub fn start_async<K: ReadSink>(&self, sink: K) -> Result<()> {
        // the slot lock is held across the claim so `Reading` always has its worker in the slot
        let mut slot = self.worker.lock();
        self.state
            .transition(SessionState::Idle, SessionState::Reading)
            .map_err(SessionState::claim_error)?;

        if let Some(previous) = slot.take() {
            // its read loop is over; it may still be inside read_completed
            debug!("Detaching finished packet capture worker");
            drop(previous);
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = self.handle.clone();
        let state = Arc::clone(&self.state);
        let stats = self.stats.clone();

        let spawned = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(handle, state, stats, sink, done_tx));

        match spawned {
            Ok(thread) => {
                *slot = Some(Worker {
                    thread,
                    done: done_rx,
                });
                info!(source = self.handle.source(), "Started asynchronous read");
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .state
                    .transition(SessionState::Reading, SessionState::Idle);
                Err(Error::Io(e))
            }
        }
    }

    /// Start reading on a worker thread and receive the events through a channel
    pub fn start_async_channel(&self) -> Result<Receiver<ReadEvent>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_async(ChannelSink::new(tx))?;
        Ok(rx)
    }

    /// Stop the background read and wait for the worker, bounded by a few read timeouts.
    ///
    /// Fails with [`Error::InvalidOperation`] unless a background read is active; a run that
    /// already ended counts as inactive even while its `read_completed` is still running.
    /// If the worker has not finished within the bound this returns anyway; the worker exits
    /// as soon as its current native call returns. Called from inside a sink callback it only
    /// requests the stop.
    pub fn cancel_async(&self) -> Result<()> {
        let worker = {
            let mut slot = self.worker.lock();
            match self
                .state
                .transition(SessionState::Reading, SessionState::Stopping)
            {
                Ok(()) => {}
                // an earlier cancel gave up waiting; the run is still winding down
                Err(SessionState::Stopping) => {}
                Err(SessionState::Disposed) => return Err(Error::Disposed(RESOURCE)),
                Err(_) => {
                    if let Some(worker) = slot.take() {
                        if worker.is_finished() && !worker.is_current() {
                            worker.join();
                        } else {
                            *slot = Some(worker);
                        }
                    }
                    return Err(Error::InvalidOperation(NOT_BUSY));
                }
            }
            self.handle.break_loop();

            match slot.take() {
                Some(worker) if !worker.is_current() => worker,
                other => {
                    // on the worker thread, or another cancel is already waiting
                    *slot = other;
                    return Ok(());
                }
            }
        };

        let bound = self.handle.read_timeout() * CANCEL_WAIT_TIMEOUTS;
        match worker.wait(bound) {
            Ok(()) => info!(source = self.handle.source(), "Cancelled asynchronous read"),
            Err(worker) => {
                warn!(
                    source = self.handle.source(),
                    waited_ms = bound.as_millis() as u64,
                    "Worker did not stop in time; it will exit after its current read"
                );
                let mut slot = self.worker.lock();
                if slot.is_none() {
                    *slot = Some(worker);
                }
            }
        }
        Ok(())
    }

    /// Stop any background read, wait for it, then release the session. Idempotent.
    pub fn dispose(&self) {
        let previous = self.state.swap(SessionState::Disposed);
        if previous == SessionState::Disposed {
            return;
        }
        if previous.is_reading() {
            self.handle.break_loop();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if !worker.is_current() {
                worker.join();
            }
        }

        self.handle.release();
        info!(source = self.handle.source(), "Disposed packet reader");
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed(RESOURCE));
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state.load() {
            SessionState::Idle => Ok(()),
            other => Err(other.claim_error()),
        }
    }
}

impl<S: Session> Drop for PacketReader<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Pull until the engine yields a packet, end-of-stream or an error
fn pull<S: Session>(handle: &CaptureHandle<S>, stats: &StatsAccumulator) -> Result<Option<Packet>> {
    loop {
        match handle.with_session(|session| session.next_packet()) {
            Ok(NextPacket::Packet(raw)) => {
                stats.record_packet(raw.data.len());
                return Ok(Some(Packet::with_wire_len(
                    raw.data,
                    raw.header.timestamp,
                    handle.link_type(),
                    raw.header.len,
                )));
            }
            Ok(NextPacket::Timeout) => continue,
            Ok(NextPacket::EndOfStream) => return Ok(None),
            Err(err) => {
                if !err.is_disposed() {
                    stats.record_error();
                }
                return Err(err);
            }
        }
    }
}

fn run_worker<S: Session, K: ReadSink>(
    handle: CaptureHandle<S>,
    state: Arc<StateCell>,
    stats: StatsAccumulator,
    mut sink: K,
    done: Sender<()>,
) {
    let mut guard = ReadGuard {
        state: Arc::clone(&state),
        armed: true,
    };

    let result = loop {
        if state.load() == SessionState::Disposed {
            break Ok(());
        }
        match pull(&handle, &stats) {
            Ok(Some(packet)) => sink.packet_read(packet),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    guard.finish();

    match &result {
        Ok(()) => debug!(
            source = handle.source(),
            packets = stats.packets_read(),
            "Packet capture worker finished"
        ),
        Err(err) => error!(source = handle.source(), error = %err, "Packet capture worker failed"),
    }

    sink.read_completed(Completion::from(result));
    drop(done);
}

/// Iterator returned by [`PacketReader::read_all`]
pub struct Packets<'a, S: Session> {
    reader: &'a PacketReader<S>,
    finished: bool,
}

impl<S: Session> Iterator for Packets<'_, S> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_one() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl<S: Session> FusedIterator for Packets<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockSession, Step};
    use std::time::Instant;

    fn reader(engine: &MockEngine) -> PacketReader<MockSession> {
        PacketReader::open_offline(engine, Path::new("trace.pcap")).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn drain(rx: &Receiver<ReadEvent>) -> (Vec<Packet>, Vec<Completion>) {
        let mut packets = Vec::new();
        let mut completions = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            match event {
                ReadEvent::Packet(packet) => packets.push(packet),
                ReadEvent::Completed(completion) => completions.push(completion),
            }
        }
        (packets, completions)
    }

    #[test]
    fn test_read_one_retries_timeouts() {
        let mut engine = MockEngine::new(vec![
            Step::Timeout,
            Step::Timeout,
            Step::Packet(vec![1, 2]),
            Step::Timeout,
            Step::End,
        ]);
        engine.datalink = 0;
        let reader = reader(&engine);

        let packet = reader.read_one().unwrap().unwrap();
        assert_eq!(packet.data(), &[1, 2]);
        assert_eq!(packet.link_type(), LinkLayerType::BsdLoopback);
        assert!(reader.read_one().unwrap().is_none());
        assert!(reader.read_one().unwrap().is_none());
    }

    #[test]
    fn test_hard_error_leaves_reader_usable() {
        let engine = MockEngine::new(vec![
            Step::Packet(vec![1]),
            Step::Error("read error: Network is down"),
            Step::Packet(vec![2]),
            Step::End,
        ]);
        let reader = reader(&engine);

        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[1]);
        let err = reader.read_one().unwrap_err();
        assert_eq!(err.capture_message(), Some("read error: Network is down"));
        assert_eq!(reader.last_error().unwrap(), "read error: Network is down");
        assert_eq!(reader.state(), SessionState::Idle);
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[2]);

        let stats = reader.stats();
        assert_eq!(stats.packets_read, 2);
        assert_eq!(stats.read_errors, 1);
    }

    #[test]
    fn test_read_all_is_single_pass() {
        let engine = MockEngine::with_frames(&[&[1], &[2], &[3]]);
        let reader = reader(&engine);

        let first: Vec<Packet> = reader.read_all().unwrap().map(|p| p.unwrap()).collect();
        let data: Vec<&[u8]> = first.iter().map(|p| p.data()).collect();
        assert_eq!(data, vec![&[1][..], &[2][..], &[3][..]]);
        assert!(first.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));

        assert_eq!(reader.read_all().unwrap().count(), 0);
    }

    #[test]
    fn test_read_all_ends_after_error() {
        let engine = MockEngine::new(vec![
            Step::Packet(vec![1]),
            Step::Error("boom"),
            Step::Packet(vec![2]),
        ]);
        let reader = reader(&engine);

        let mut packets = reader.read_all().unwrap();
        assert!(packets.next().unwrap().is_ok());
        assert!(packets.next().unwrap().is_err());
        assert!(packets.next().is_none());
    }

    #[test]
    fn test_async_delivers_in_order_then_completes_once() {
        let engine = MockEngine::with_frames(&[&[1], &[2], &[3], &[4]]);
        let reader = reader(&engine);

        let rx = reader.start_async_channel().unwrap();
        let (packets, completions) = drain(&rx);

        let data: Vec<u8> = packets.iter().map(|p| p.data()[0]).collect();
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert_eq!(completions.len(), 1);
        assert!(completions[0].is_ok());
        assert_eq!(reader.state(), SessionState::Idle);
    }

    #[test]
    fn test_async_error_goes_to_completion() {
        let engine = MockEngine::new(vec![Step::Packet(vec![9]), Step::Error("boom")]);
        let reader = reader(&engine);

        let rx = reader.start_async_channel().unwrap();
        let (packets, completions) = drain(&rx);

        assert_eq!(packets.len(), 1);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].error().unwrap().capture_message(), Some("boom"));
        assert!(!reader.is_busy());
        // the reader is usable again once the run completed
        assert!(reader.start_async_channel().is_ok());
    }

    #[test]
    fn test_busy_reader_rejects_other_reads() {
        let engine = MockEngine::new(vec![]);
        let reader = reader(&engine);

        let rx = reader.start_async_channel().unwrap();
        assert!(reader.is_busy());
        assert!(reader.read_one().unwrap_err().is_invalid_operation());
        assert!(reader.read_all().err().unwrap().is_invalid_operation());
        assert!(reader
            .start_async_channel()
            .err()
            .unwrap()
            .is_invalid_operation());

        reader.cancel_async().unwrap();
        assert_eq!(reader.state(), SessionState::Idle);

        let (_, completions) = drain(&rx);
        assert_eq!(completions.len(), 1);
        assert!(completions[0].is_ok());
    }

    #[test]
    fn test_cancel_without_start_is_invalid() {
        let engine = MockEngine::with_frames(&[&[1]]);
        let reader = reader(&engine);
        assert!(reader.cancel_async().unwrap_err().is_invalid_operation());

        let rx = reader.start_async_channel().unwrap();
        let (_, completions) = drain(&rx);
        assert_eq!(completions.len(), 1);
        // the run already finished on its own
        assert!(reader.cancel_async().unwrap_err().is_invalid_operation());
    }

    #[test]
    fn test_foreground_read_excludes_other_read_paths() {
        let engine = MockEngine::new(vec![
            Step::Stall(Duration::from_millis(300)),
            Step::Packet(vec![1]),
            Step::Packet(vec![2]),
            Step::End,
        ]);
        let reader = reader(&engine);

        thread::scope(|scope| {
            let pulling = scope.spawn(|| reader.read_one());

            assert!(wait_until(|| reader.state() == SessionState::Pulling));
            assert!(!reader.is_busy());
            assert!(reader
                .start_async_channel()
                .err()
                .unwrap()
                .is_invalid_operation());
            assert!(reader.read_one().unwrap_err().is_invalid_operation());
            assert!(reader.cancel_async().unwrap_err().is_invalid_operation());

            let packet = pulling.join().unwrap().unwrap().unwrap();
            assert_eq!(packet.data(), &[1]);
        });
        assert_eq!(reader.state(), SessionState::Idle);

        let rx = reader.start_async_channel().unwrap();
        let (packets, completions) = drain(&rx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data(), &[2]);
        assert_eq!(completions.len(), 1);
    }

    #[test]
    fn test_dispose_interrupts_foreground_read() {
        let engine = MockEngine::new(vec![]);
        let reader = reader(&engine);

        thread::scope(|scope| {
            let pulling = scope.spawn(|| reader.read_one());
            assert!(wait_until(|| reader.state() == SessionState::Pulling));

            reader.dispose();
            // the pull either observes the break or finds the session already released
            match pulling.join().unwrap() {
                Ok(None) => {}
                Err(err) => assert!(err.is_disposed()),
                Ok(Some(_)) => panic!("no packets were scripted"),
            }
        });
        assert_eq!(reader.state(), SessionState::Disposed);
        assert_eq!(engine.ledger.lock().sessions_closed, 1);
    }

    #[test]
    fn test_cancel_after_run_ended_leaves_no_pending_break() {
        let engine = MockEngine::new(vec![Step::Error("boom"), Step::Packet(vec![7]), Step::End]);
        let reader = reader(&engine);
        let (tx, rx) = crossbeam_channel::unbounded();

        reader
            .start_async(CallbackSink::new(
                |_packet: Packet| {},
                move |completion: Completion| {
                    thread::sleep(Duration::from_millis(100));
                    let _ = tx.send(completion.is_ok());
                },
            ))
            .unwrap();

        // the run is over but read_completed is still sleeping
        assert!(wait_until(|| reader.state() == SessionState::Idle));
        assert!(reader.cancel_async().unwrap_err().is_invalid_operation());
        assert_eq!(reader.state(), SessionState::Idle);

        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[7]);
    }

    #[test]
    fn test_cancel_from_completion_callback_is_invalid() {
        let engine = MockEngine::with_frames(&[&[1], &[2]]);
        let reader = Arc::new(reader(&engine));
        let (tx, rx) = crossbeam_channel::unbounded();

        let inner = Arc::clone(&reader);
        reader
            .start_async(CallbackSink::new(
                |_packet: Packet| {},
                move |_completion: Completion| {
                    let _ = tx.send(inner.cancel_async());
                },
            ))
            .unwrap();

        let cancelled = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(cancelled.unwrap_err().is_invalid_operation());
        assert_eq!(reader.state(), SessionState::Idle);
    }

    #[test]
    fn test_cancel_from_packet_callback_stops_run() {
        let engine = MockEngine::new(vec![Step::Packet(vec![1])]);
        let reader = Arc::new(reader(&engine));
        let (tx, rx) = crossbeam_channel::unbounded();

        let inner = Arc::clone(&reader);
        let done = tx.clone();
        reader
            .start_async(CallbackSink::new(
                move |_packet: Packet| {
                    let _ = tx.send(inner.cancel_async().is_ok());
                },
                move |completion: Completion| {
                    let _ = done.send(completion.is_ok());
                },
            ))
            .unwrap();

        // cancel accepted, then a clean completion
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(wait_until(|| reader.state() == SessionState::Idle));
    }

    #[test]
    fn test_cancel_wait_is_bounded() {
        let engine = MockEngine::new(vec![Step::Stall(Duration::from_millis(800))]);
        let reader = reader(&engine);
        let rx = reader.start_async_channel().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        reader.cancel_async().unwrap();
        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(reader.state(), SessionState::Stopping);

        assert!(wait_until(|| reader.state() == SessionState::Idle));
        let (_, completions) = drain(&rx);
        assert_eq!(completions.len(), 1);
    }

    #[test]
    fn test_stop_interrupts_foreground_read() {
        let engine = MockEngine::new(vec![]);
        let reader = reader(&engine);

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                reader.stop().unwrap();
            });
            assert!(reader.read_one().unwrap().is_none());
        });
        assert_eq!(reader.state(), SessionState::Idle);
    }

    #[test]
    fn test_stop_is_level_triggered() {
        let engine = MockEngine::with_frames(&[&[5]]);
        let reader = reader(&engine);

        reader.stop().unwrap();
        assert!(reader.read_one().unwrap().is_none());
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[5]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let engine = MockEngine::with_frames(&[&[1]]);
        let reader = reader(&engine);

        reader.dispose();
        reader.dispose();
        assert_eq!(reader.state(), SessionState::Disposed);
        assert_eq!(engine.ledger.lock().sessions_closed, 1);

        assert!(reader.read_one().unwrap_err().is_disposed());
        assert!(reader.read_all().err().unwrap().is_disposed());
        assert!(reader.start_async_channel().err().unwrap().is_disposed());
        assert!(reader.cancel_async().unwrap_err().is_disposed());
        assert!(reader.apply_filter("byte 1").unwrap_err().is_disposed());
        assert!(reader.clear_filter().unwrap_err().is_disposed());
        assert!(reader.stop().unwrap_err().is_disposed());
        assert!(reader.link_type().unwrap_err().is_disposed());

        drop(reader);
        assert_eq!(engine.ledger.lock().sessions_closed, 1);
    }

    #[test]
    fn test_dispose_stops_and_joins_worker() {
        let engine = MockEngine::new(vec![Step::Packet(vec![1])]);
        let reader = reader(&engine);

        let rx = reader.start_async_channel().unwrap();
        reader.dispose();

        assert_eq!(reader.state(), SessionState::Disposed);
        assert_eq!(engine.ledger.lock().sessions_closed, 1);
        let (_, completions) = drain(&rx);
        assert_eq!(completions.len(), 1);
        assert!(completions[0].is_ok());
    }

    #[test]
    fn test_dispose_from_sink_callback() {
        let engine = MockEngine::new(vec![Step::Packet(vec![1]), Step::Packet(vec![2])]);
        let reader = Arc::new(reader(&engine));
        let (tx, rx) = crossbeam_channel::unbounded();

        let inner = Arc::clone(&reader);
        let done = tx.clone();
        reader
            .start_async(CallbackSink::new(
                move |packet: Packet| {
                    inner.dispose();
                    let _ = tx.send(packet.data().to_vec());
                },
                move |completion: Completion| {
                    let _ = done.send(vec![completion.is_ok() as u8]);
                },
            ))
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), vec![1]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), vec![1]);
        assert!(reader.is_disposed());
        assert!(wait_until(|| engine.ledger.lock().sessions_closed == 1));
    }

    #[test]
    fn test_filter_narrows_and_clear_restores() {
        let engine = MockEngine::with_frames(&[&[1, 0xa], &[2, 0xb], &[1, 0xc], &[2, 0xd]]);
        let reader = reader(&engine);

        reader.apply_filter("byte 1").unwrap();
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[1, 0xa]);
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[1, 0xc]);

        reader.clear_filter().unwrap();
        assert_eq!(reader.read_one().unwrap().unwrap().data(), &[2, 0xd]);
    }

    #[test]
    fn test_failed_filter_keeps_previous() {
        let engine = MockEngine::with_frames(&[&[1], &[2], &[1]]);
        let reader = reader(&engine);

        reader.apply_filter("byte 1").unwrap();
        assert!(reader.apply_filter("invalid").is_err());
        assert!(reader.apply_filter_with_netmask("reject", 0xffff_ff00).is_err());

        let data: Vec<Vec<u8>> = reader
            .read_all()
            .unwrap()
            .map(|p| p.unwrap().into_data())
            .collect();
        assert_eq!(data, vec![vec![1], vec![1]]);
        assert_eq!(engine.ledger.lock().programs_live, 0);
    }

    #[test]
    fn test_native_stats_merge() {
        let engine = MockEngine::with_frames(&[&[1, 2, 3], &[4]]);
        let reader = reader(&engine);
        assert_eq!(reader.read_all().unwrap().count(), 2);

        let stats = reader.native_stats().unwrap();
        assert_eq!(stats.packets_read, 2);
        assert_eq!(stats.bytes_read, 4);
        assert_eq!(stats.packets_received, 2);
    }
}
