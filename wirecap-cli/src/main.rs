use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wirecap_capture::DefaultEngine;
use wirecap_cli::commands::{self, CaptureOptions};
use wirecap_cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run_command(cli.command) {
        error!("Error: {:?}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    let engine = DefaultEngine::default();
    match command {
        Commands::Devices => commands::list_devices(engine),
        Commands::Read {
            file,
            filters,
            count,
        } => commands::read_file(&engine, &file, &filters, count).map(|_| ()),
        Commands::Copy {
            input,
            output,
            count,
        } => commands::copy_file(&engine, &input, &output, count).map(|_| ()),
        Commands::Capture {
            device,
            write,
            snaplen,
            count,
            duration,
            filters,
        } => {
            let options = CaptureOptions {
                device: &device,
                output: &write,
                snaplen,
                count,
                duration: duration.map(Duration::from_secs),
                filters: &filters,
            };
            commands::capture(engine, &options).map(|_| ())
        }
    }
}
