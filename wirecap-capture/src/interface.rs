//! Capture device enumeration

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;
use wirecap_core::{DeviceDescriptor, Error, Result};

use crate::config::{checked_snaplen, CaptureConfig};
use crate::engine::CaptureEngine;
use crate::reader::PacketReader;
use crate::writer::LiveWriter;

/// Lists the devices an engine can capture on
pub struct DeviceCatalog<E: CaptureEngine> {
    engine: Arc<E>,
    config: CaptureConfig,
}

impl<E: CaptureEngine> DeviceCatalog<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, CaptureConfig::default())
    }

    /// Catalog whose devices open sessions with `config`
    pub fn with_config(engine: E, config: CaptureConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Enumerate devices in one batch
    pub fn devices(&self) -> Result<Vec<Device<E>>> {
        let descriptors = self.engine.find_all_devices()?;
        debug!(count = descriptors.len(), "Enumerated capture devices");

        Ok(descriptors
            .into_iter()
            .map(|descriptor| Device {
                descriptor,
                engine: Arc::clone(&self.engine),
                config: self.config.clone(),
            })
            .collect())
    }

    /// Look up a device by name
    pub fn find(&self, name: &str) -> Result<Device<E>> {
        self.devices()?
            .into_iter()
            .find(|device| device.name() == name)
            .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
    }
}

/// A device from one enumeration, able to open capture sessions on itself
pub struct Device<E: CaptureEngine> {
    descriptor: DeviceDescriptor,
    engine: Arc<E>,
    config: CaptureConfig,
}

impl<E: CaptureEngine> Clone for Device<E> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}

impl<E: CaptureEngine> Device<E> {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn description(&self) -> Option<&str> {
        self.descriptor.description()
    }

    pub fn addresses(&self) -> &[IpAddr] {
        self.descriptor.addresses()
    }

    /// Open a reader capturing whole frames
    pub fn open_read(&self) -> Result<PacketReader<E::Session>> {
        PacketReader::open_live(self.engine.as_ref(), self.name(), &self.config)
    }

    /// Open a reader with a snapshot length in 0..=65535, checked before the device is touched
    pub fn open_read_with_snaplen(&self, snaplen: i64) -> Result<PacketReader<E::Session>> {
        let config = self.config.clone().with_snaplen(checked_snaplen(snaplen)?);
        PacketReader::open_live(self.engine.as_ref(), self.name(), &config)
    }

    /// Open the device for packet injection
    pub fn open_write(&self) -> Result<LiveWriter<E::Session>> {
        LiveWriter::open(self.engine.as_ref(), self.name(), &self.config)
    }
}

impl<E: CaptureEngine> fmt::Display for Device<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.descriptor, f)
    }
}
