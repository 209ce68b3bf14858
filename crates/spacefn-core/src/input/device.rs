// spacefn Input Layer - Device Detection
// Keyboard-shape validation and device metadata for the scan report

use std::fmt;

use crate::Key;

/// Name given to the uinput device this process creates.
pub const VIRTUAL_DEVICE_NAME: &str = "spacefn (virtual) keyboard";

/// Device capabilities extracted from an event device
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Whether the device supports EV_KEY events
    pub has_ev_key: bool,
    /// Whether the device supports EV_SYN events
    pub has_ev_syn: bool,
    /// Whether the kernel reports a physical location for the device
    pub has_phys: bool,
    /// List of supported key codes (EV_KEY capability codes)
    pub supported_keys: Vec<u16>,
}

impl DeviceCapabilities {
    /// Create a new DeviceCapabilities struct
    pub fn new(has_ev_key: bool, has_ev_syn: bool, has_phys: bool, supported_keys: Vec<u16>) -> Self {
        Self {
            has_ev_key,
            has_ev_syn,
            has_phys,
            supported_keys,
        }
    }
}

/// Keys a device must expose to be remapped
const REQUIRED_KEYS: &[Key] = &[Key::SPACE, Key::A];

/// Determine if a device is a keyboard worth grabbing.
///
/// A device qualifies when:
/// 1. It supports EV_KEY and EV_SYN events
/// 2. It reports a physical location, which virtual devices (including
///    another running spacefn) lack
/// 3. SPACE and A are both present
pub fn is_keyboard(capabilities: &DeviceCapabilities) -> bool {
    if !capabilities.has_ev_key || !capabilities.has_ev_syn || !capabilities.has_phys {
        return false;
    }

    REQUIRED_KEYS
        .iter()
        .all(|key| capabilities.supported_keys.contains(&key.code()))
}

/// Check if a device is one of our own virtual devices based on its name.
pub fn is_virtual_device(name: &str) -> bool {
    name.contains(VIRTUAL_DEVICE_NAME)
}

/// Identifying metadata printed for a keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub phys: Option<String>,
    pub uniq: Option<String>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Found keyboard {}", self.path)?;
        writeln!(f, "Input device name: \"{}\"", self.name)?;
        write!(
            f,
            "Input device ID: bus {:#x} vendor {:#x} product {:#x}",
            self.bus, self.vendor, self.product
        )?;
        if let Some(phys) = &self.phys {
            write!(f, "\nLocation: {}", phys)?;
        }
        if let Some(uniq) = &self.uniq {
            write!(f, "\nIdentity: {}", uniq)?;
        }
        Ok(())
    }
}

#[cfg(feature = "evdev-io")]
mod evdev_device {
    use super::*;
    use evdev::{Device, EventType};
    use std::path::Path;

    /// Read the capabilities relevant to keyboard validation
    pub fn capabilities_of(device: &Device) -> DeviceCapabilities {
        let events = device.supported_events();
        let supported_keys = device
            .supported_keys()
            .map(|keys| keys.iter().map(|k| k.code()).collect())
            .unwrap_or_default();

        DeviceCapabilities::new(
            events.contains(EventType::KEY),
            events.contains(EventType::SYNCHRONIZATION),
            device.physical_path().is_some(),
            supported_keys,
        )
    }

    /// Collect identifying metadata for a device
    pub fn device_info(path: &Path, device: &Device) -> DeviceInfo {
        let id = device.input_id();
        DeviceInfo {
            path: path.display().to_string(),
            name: device.name().unwrap_or("Unknown").to_string(),
            bus: id.bus_type().0,
            vendor: id.vendor(),
            product: id.product(),
            phys: device.physical_path().map(str::to_string),
            uniq: device.unique_name().map(str::to_string),
        }
    }

    /// Enumerate /dev/input and return every keyboard-shaped device
    pub fn scan_keyboards() -> Vec<DeviceInfo> {
        let mut keyboards: Vec<DeviceInfo> = evdev::enumerate()
            .filter(|(_, device)| !is_virtual_device(device.name().unwrap_or("")))
            .filter(|(_, device)| is_keyboard(&capabilities_of(device)))
            .map(|(path, device)| device_info(&path, &device))
            .collect();

        keyboards.sort_by(|a, b| a.path.cmp(&b.path));
        keyboards
    }
}

#[cfg(feature = "evdev-io")]
pub use evdev_device::{capabilities_of, device_info, scan_keyboards};
