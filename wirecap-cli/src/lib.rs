//! CLI interface for wirecap
//!
//! This crate provides the command-line interface for wirecap: argument parsing and the
//! command implementations behind the `wirecap` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
