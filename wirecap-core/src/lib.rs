//! wirecap core library
//!
//! This crate provides the value types and error handling shared by the
//! wirecap capture crates: packets, timestamps, link-layer types and
//! device descriptors.

pub mod error;
pub mod interface;
pub mod packet;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use interface::DeviceDescriptor;
pub use packet::{Packet, Timestamp};
pub use types::LinkLayerType;
