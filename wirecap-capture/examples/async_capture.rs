//! Example: Capture on a device from a background worker
//!
//! This example reads up to 20 packets through the event channel, then cancels.
//! Note: Requires root/administrator privileges to run.
//!
//! Run with: sudo cargo run --features libpcap --example async_capture -- eth0

use std::env;
use std::time::Duration;

use wirecap_capture::{DeviceCatalog, PcapEngine, ReadEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = env::args().nth(1).ok_or("usage: async_capture <device>")?;

    let catalog = DeviceCatalog::new(PcapEngine::new());
    let device = catalog.find(&name)?;
    let reader = device.open_read_with_snaplen(128)?;

    println!("Capturing on: {}", device);
    println!("Starting packet capture... (will capture 20 packets)");
    println!();

    let events = reader.start_async_channel()?;
    let mut count = 0;

    while count < 20 {
        match events.recv_timeout(Duration::from_secs(10)) {
            Ok(ReadEvent::Packet(packet)) => {
                count += 1;
                println!("[{}] Packet: {} bytes at {}", count, packet.wire_len(), packet.timestamp());
            }
            Ok(ReadEvent::Completed(completion)) => {
                completion.into_result()?;
                break;
            }
            Err(_) => break,
        }
    }

    if reader.is_busy() {
        reader.cancel_async()?;
    }

    println!("\n=== Final Statistics ===");
    println!("{}", reader.native_stats()?.format());

    Ok(())
}
