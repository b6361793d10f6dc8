//! Example: Read a capture file and print every packet
//!
//! Run with: cargo run --example read_file -- trace.pcap [filter]

use std::env;

use wirecap_capture::{savefile, DefaultEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let path = args.next().ok_or("usage: read_file <file> [filter]")?;
    let filter = args.collect::<Vec<_>>().join(" ");

    let engine = DefaultEngine::default();
    let reader = savefile::open_read(&engine, &path)?;
    reader.apply_filter(&filter)?;

    println!("Reading {} ({})", path, reader.link_type()?);
    println!();

    for (n, packet) in reader.read_all()?.enumerate() {
        let packet = packet?;
        println!(
            "[{}] {} {} bytes (on wire {})",
            n + 1,
            packet.timestamp(),
            packet.len(),
            packet.wire_len()
        );
    }

    println!("\n=== Statistics ===");
    println!("{}", reader.stats().format());

    Ok(())
}
