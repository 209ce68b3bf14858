// spacefn uinput Output Layer
// Virtual device mirroring the grabbed keyboard

use std::io;
use std::path::PathBuf;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, InputEvent};
use smallvec::SmallVec;

use super::sink::{KeySink, OutputError};
use crate::input::{RawEvent, VIRTUAL_DEVICE_NAME};
use crate::Key;

/// uinput-backed sink
pub struct UInputSink {
    device: VirtualDevice,
}

impl UInputSink {
    /// Create a virtual keyboard advertising the capabilities of `source`
    /// plus `extra_keys` (layer outputs and the synthetic shift key, which
    /// the physical board may not report).
    ///
    /// Event classes the virtual device does not declare are dropped by the
    /// kernel, so everything the source reports that uinput can express is
    /// copied: keys, misc events (MSC_SCAN), relative axes, switches and
    /// input properties. Absolute axes and LEDs are not mirrored.
    pub fn mirror(
        source: &Device,
        extra_keys: impl IntoIterator<Item = Key>,
    ) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::<evdev::Key>::new();
        if let Some(supported) = source.supported_keys() {
            for key in supported.iter() {
                keys.insert(key);
            }
        }
        for key in extra_keys {
            keys.insert(evdev::Key::new(key.code()));
        }

        let mut builder = VirtualDeviceBuilder::new()
            .map_err(OutputError::Unavailable)?
            .name(VIRTUAL_DEVICE_NAME)
            .input_id(source.input_id())
            .with_keys(&keys)
            .and_then(|b| b.with_properties(source.properties()))
            .map_err(OutputError::DeviceCreation)?;

        if let Some(misc) = source.misc_properties() {
            builder = builder.with_msc(misc).map_err(OutputError::DeviceCreation)?;
        }
        if let Some(axes) = source.supported_relative_axes() {
            builder = builder
                .with_relative_axes(axes)
                .map_err(OutputError::DeviceCreation)?;
        }
        if let Some(switches) = source.supported_switches() {
            builder = builder
                .with_switches(switches)
                .map_err(OutputError::DeviceCreation)?;
        }

        let device = builder.build().map_err(OutputError::DeviceCreation)?;

        log::debug!(
            "Created virtual device \"{}\" with {} keys, misc events: {}",
            VIRTUAL_DEVICE_NAME,
            keys.iter().count(),
            source.misc_properties().is_some()
        );

        Ok(Self { device })
    }

    /// The /dev/input node the kernel assigned to the virtual device
    pub fn dev_node(&mut self) -> io::Result<Option<PathBuf>> {
        self.device.enumerate_dev_nodes_blocking()?.next().transpose()
    }
}

impl KeySink for UInputSink {
    fn emit(&mut self, batch: &[RawEvent]) -> Result<(), OutputError> {
        let events: SmallVec<[InputEvent; 2]> = batch.iter().copied().map(InputEvent::from).collect();
        // VirtualDevice::emit appends the SYN_REPORT itself
        self.device.emit(&events).map_err(OutputError::Write)
    }
}
