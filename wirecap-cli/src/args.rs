//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wirecap")]
#[command(version, about = "Capture, filter and record network packets", long_about = None)]
pub struct Cli {
    /// Verbose output (-v, -vv, -vvv for increasing verbosity)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List capture devices and their addresses
    Devices,

    /// Print the packets of a capture file
    Read {
        /// Capture file to read
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// BPF filter expression; repeat to require all of them
        #[arg(short, long = "filter", value_name = "EXPR")]
        filters: Vec<String>,

        /// Stop after this many packets
        #[arg(short = 'c', long)]
        count: Option<usize>,
    },

    /// Copy packets from one capture file into a new one
    Copy {
        /// Capture file to read
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Dump file to create
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Stop after this many packets
        #[arg(short = 'c', long)]
        count: Option<usize>,
    },

    /// Capture live traffic into a dump file
    Capture {
        /// Device name as listed by `wirecap devices`
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Dump file to create
        #[arg(short, long, value_name = "FILE")]
        write: PathBuf,

        /// Snapshot length in bytes (0-65535)
        #[arg(short, long, default_value = "65535", allow_hyphen_values = true)]
        snaplen: i64,

        /// Stop after this many packets
        #[arg(short = 'c', long)]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(short, long, value_name = "SECONDS")]
        duration: Option<u64>,

        /// BPF filter expression; repeat to require all of them
        #[arg(short, long = "filter", value_name = "EXPR")]
        filters: Vec<String>,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log filter directive for the requested verbosity
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capture() {
        let cli = Cli::parse_from([
            "wirecap", "-vv", "capture", "eth0", "--write", "out.pcap", "--snaplen", "96", "-c",
            "10",
        ]);
        assert_eq!(cli.log_directive(), "debug");
        match cli.command {
            Commands::Capture {
                device,
                write,
                snaplen,
                count,
                duration,
                filters,
            } => {
                assert_eq!(device, "eth0");
                assert_eq!(write, PathBuf::from("out.pcap"));
                assert_eq!(snaplen, 96);
                assert_eq!(count, Some(10));
                assert_eq!(duration, None);
                assert!(filters.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_snaplen_still_parses() {
        let cli = Cli::parse_from(["wirecap", "capture", "eth0", "-w", "o.pcap", "-s", "-1"]);
        assert!(matches!(cli.command, Commands::Capture { snaplen: -1, .. }));
    }

    #[test]
    fn test_parse_read_with_filters() {
        let cli = Cli::parse_from([
            "wirecap", "read", "in.pcap", "--filter", "tcp port 80", "-f", "host 10.0.0.1",
        ]);
        assert_eq!(cli.log_directive(), "warn");
        match cli.command {
            Commands::Read { filters, count, .. } => {
                assert_eq!(filters, vec!["tcp port 80", "host 10.0.0.1"]);
                assert_eq!(count, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["wirecap"]).is_err());
    }
}
