//! Reader statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::engine::NativeStats;

/// Counters of one reader, optionally merged with the engine's own
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    /// Packets handed to consumers
    pub packets_read: u64,
    /// Captured bytes handed to consumers
    pub bytes_read: u64,
    /// Reads that failed with an engine error
    pub read_errors: u64,
    /// Packets the engine saw (0 unless engine counters were merged)
    pub packets_received: u64,
    /// Packets dropped by the kernel for lack of buffer space
    pub packets_dropped: u64,
    /// Packets dropped by the interface
    pub packets_if_dropped: u64,
    /// Time since the accumulator started or was last reset
    pub duration: Duration,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
}

impl CaptureStats {
    /// Merge engine counters into this snapshot
    pub fn with_native(mut self, native: NativeStats) -> Self {
        self.packets_received = native.received as u64;
        self.packets_dropped = native.dropped as u64;
        self.packets_if_dropped = native.if_dropped as u64;
        self
    }

    /// Kernel drops as a percentage of packets the engine saw
    pub fn drop_rate(&self) -> f64 {
        if self.packets_received == 0 {
            return 0.0;
        }
        (self.packets_dropped as f64 / self.packets_received as f64) * 100.0
    }

    pub fn has_significant_drops(&self, threshold_percent: f64) -> bool {
        self.drop_rate() > threshold_percent
    }

    /// Format statistics as human-readable string
    pub fn format(&self) -> String {
        format!(
            "Read: {} packets ({} bytes), {} errors\n\
             Received: {} packets\n\
             Dropped: {} packets ({:.2}%)\n\
             IF Dropped: {} packets\n\
             Duration: {:.2}s\n\
             Rate: {:.2} pps, {:.2} KB/s",
            self.packets_read,
            self.bytes_read,
            self.read_errors,
            self.packets_received,
            self.packets_dropped,
            self.drop_rate(),
            self.packets_if_dropped,
            self.duration.as_secs_f64(),
            self.packets_per_second,
            self.bytes_per_second / 1024.0
        )
    }
}

/// Thread-safe counters shared between a reader and its worker
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    packets_read: Arc<AtomicU64>,
    bytes_read: Arc<AtomicU64>,
    read_errors: Arc<AtomicU64>,
    start_time: Arc<Mutex<Instant>>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            packets_read: Arc::new(AtomicU64::new(0)),
            bytes_read: Arc::new(AtomicU64::new(0)),
            read_errors: Arc::new(AtomicU64::new(0)),
            start_time: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record a packet handed to a consumer
    pub fn record_packet(&self, size: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CaptureStats {
        let packets_read = self.packets_read();
        let bytes_read = self.bytes_read();
        let duration = self.elapsed();

        let secs = duration.as_secs_f64();
        let (packets_per_second, bytes_per_second) = if secs > 0.0 {
            (packets_read as f64 / secs, bytes_read as f64 / secs)
        } else {
            (0.0, 0.0)
        };

        CaptureStats {
            packets_read,
            bytes_read,
            read_errors: self.read_errors.load(Ordering::Relaxed),
            duration,
            packets_per_second,
            bytes_per_second,
            ..CaptureStats::default()
        }
    }

    /// Zero the counters and restart the clock
    pub fn reset(&self) {
        self.packets_read.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.read_errors.store(0, Ordering::Relaxed);
        *self.start_time.lock() = Instant::now();
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.lock().elapsed()
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
