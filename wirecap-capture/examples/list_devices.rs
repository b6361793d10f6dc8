//! Example: List capture devices
//!
//! Run with: cargo run --example list_devices

use wirecap_capture::{DefaultEngine, DeviceCatalog};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Capture Devices ===\n");

    let catalog = DeviceCatalog::new(DefaultEngine::default());
    let devices = catalog.devices()?;

    for device in &devices {
        println!("Device: {}", device.name());
        if let Some(description) = device.description() {
            println!("  Description: {}", description);
        }

        println!("  Addresses:");
        for addr in device.addresses() {
            println!("    - {}", addr);
        }
        println!();
    }

    if devices.is_empty() {
        println!("No devices found. Are you running with sufficient privileges?");
    }

    Ok(())
}
