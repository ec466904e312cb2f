//! Device capability probing.

use std::io;
use std::path::Path;

use evdev::{Device, EventType};

/// What the enumerator needs to know about a candidate device.
pub trait DeviceProbe {
    /// Human-readable device name.
    fn name(&self, path: &Path) -> io::Result<String>;

    /// Whether the device reports `EV_KEY` events.
    fn supports_key_events(&self, path: &Path) -> io::Result<bool>;
}

/// Probes real device nodes through evdev. Each call opens and closes the
/// node.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevProbe;

impl DeviceProbe for EvdevProbe {
    fn name(&self, path: &Path) -> io::Result<String> {
        let dev = Device::open(path)?;
        Ok(dev.name().unwrap_or_default().to_string())
    }

    fn supports_key_events(&self, path: &Path) -> io::Result<bool> {
        let dev = Device::open(path)?;
        Ok(dev.supported_events().contains(EventType::KEY))
    }
}
