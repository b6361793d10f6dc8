//! Command implementations

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use wirecap_capture::engine::Dumper;
use wirecap_capture::{
    combine_filters, savefile, CaptureEngine, Completion, DeviceCatalog, DumpFileWriter,
    PacketReader, PacketWriter, ReadEvent, Session,
};
use wirecap_core::Packet;

/// Longest wait for one event while capturing
const EVENT_POLL: Duration = Duration::from_millis(250);

/// List devices with their descriptions and addresses
pub fn list_devices<E: CaptureEngine>(engine: E) -> Result<()> {
    let devices = DeviceCatalog::new(engine)
        .devices()
        .context("Failed to enumerate capture devices")?;

    if devices.is_empty() {
        println!("No capture devices found");
        return Ok(());
    }

    println!("Available capture devices:\n");
    for device in devices {
        println!("  {}", device.name());
        if let Some(desc) = device.description() {
            println!("    Description: {}", desc);
        }
        if !device.addresses().is_empty() {
            let addresses: Vec<String> = device.addresses().iter().map(|a| a.to_string()).collect();
            println!("    Addresses: {}", addresses.join(", "));
        }
        println!();
    }

    Ok(())
}

fn describe(packet: &Packet) -> String {
    let preview: Vec<String> = packet
        .data()
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!(
        "{} {} {}/{} bytes  {}",
        packet.timestamp(),
        packet.link_type(),
        packet.len(),
        packet.wire_len(),
        preview.join(" ")
    )
}

/// Install every filter at once, ANDed together
fn install_filters<S: Session>(reader: &PacketReader<S>, filters: &[String]) -> Result<()> {
    let expression = combine_filters(filters);
    if expression.is_empty() {
        return Ok(());
    }
    reader
        .apply_filter(&expression)
        .with_context(|| format!("Failed to apply filter '{}'", expression))
}

/// Print the packets of a capture file; returns how many were printed
pub fn read_file<E: CaptureEngine>(
    engine: &E,
    file: &Path,
    filters: &[String],
    count: Option<usize>,
) -> Result<usize> {
    let reader = savefile::open_read(engine, file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    install_filters(&reader, filters)?;

    let mut printed = 0;
    for packet in reader.read_all()?.take(count.unwrap_or(usize::MAX)) {
        let packet = packet.context("Failed to read packet")?;
        printed += 1;
        println!("{:>6}  {}", printed, describe(&packet));
    }

    info!(file = %file.display(), packets = printed, "Finished reading");
    Ok(printed)
}

/// Copy packets from `input` into a new dump file; returns how many were copied
pub fn copy_file<E: CaptureEngine>(
    engine: &E,
    input: &Path,
    output: &Path,
    count: Option<usize>,
) -> Result<usize> {
    let reader = savefile::open_read(engine, input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let mut writer = savefile::open_write(&reader, output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut copied = 0;
    for packet in reader.read_all()?.take(count.unwrap_or(usize::MAX)) {
        writer.write_packet(&packet?)?;
        copied += 1;
    }
    writer.flush().context("Failed to flush dump file")?;

    println!("Copied {} packets to {}", copied, output.display());
    Ok(copied)
}

/// Options of the `capture` command
#[derive(Debug, Clone)]
pub struct CaptureOptions<'a> {
    pub device: &'a str,
    pub output: &'a Path,
    pub snaplen: i64,
    pub count: Option<usize>,
    pub duration: Option<Duration>,
    pub filters: &'a [String],
}

fn record<D: Dumper>(
    writer: &mut DumpFileWriter<D>,
    packet: &Packet,
    written: &mut usize,
    limit: usize,
) -> Result<()> {
    if *written < limit {
        writer.write_packet(packet)?;
        *written += 1;
    }
    Ok(())
}

/// Write events from a background read until `limit` packets, the deadline or the run's end.
///
/// A run still going at that point is cancelled; events it delivered before stopping are
/// kept up to `limit`.
fn collect_events<S: Session>(
    reader: &PacketReader<S>,
    events: &Receiver<ReadEvent>,
    writer: &mut DumpFileWriter<S::Dumper>,
    limit: usize,
    deadline: Option<Instant>,
) -> Result<(usize, Option<Completion>)> {
    let mut written = 0;

    while written < limit && deadline.map_or(true, |d| Instant::now() < d) {
        match events.recv_timeout(EVENT_POLL) {
            Ok(ReadEvent::Packet(packet)) => record(writer, &packet, &mut written, limit)?,
            Ok(ReadEvent::Completed(done)) => return Ok((written, Some(done))),
            Err(_) => continue,
        }
    }

    match reader.cancel_async() {
        Ok(()) => {}
        Err(e) if e.is_invalid_operation() => debug!("Capture finished before cancel"),
        Err(e) => return Err(e.into()),
    }

    let mut completion = None;
    while completion.is_none() {
        match events.recv_timeout(EVENT_POLL) {
            Ok(ReadEvent::Packet(packet)) => record(writer, &packet, &mut written, limit)?,
            Ok(ReadEvent::Completed(done)) => completion = Some(done),
            Err(_) => break,
        }
    }
    Ok((written, completion))
}

/// Capture live traffic from a background worker into a dump file
pub fn capture<E: CaptureEngine>(engine: E, options: &CaptureOptions<'_>) -> Result<usize> {
    let catalog = DeviceCatalog::new(engine);
    let device = catalog.find(options.device)?;
    let reader = device
        .open_read_with_snaplen(options.snaplen)
        .with_context(|| format!("Failed to open {}", options.device))?;

    install_filters(&reader, options.filters)?;

    let mut writer = savefile::open_write(&reader, options.output)
        .with_context(|| format!("Failed to create {}", options.output.display()))?;

    let limit = options.count.unwrap_or(usize::MAX);
    let deadline = options.duration.map(|d| Instant::now() + d);
    let events = reader.start_async_channel()?;

    println!("Capturing on {} into {}", device, options.output.display());

    let (written, completion) = collect_events(&reader, &events, &mut writer, limit, deadline)?;
    writer.flush()?;

    match reader.native_stats() {
        Ok(stats) => println!("{}", stats.format()),
        Err(e) => warn!(error = %e, "Engine statistics unavailable"),
    }

    if let Some(done) = completion {
        done.into_result().context("Capture ended with an error")?;
    }
    println!("Wrote {} packets to {}", written, options.output.display());
    Ok(written)
}
