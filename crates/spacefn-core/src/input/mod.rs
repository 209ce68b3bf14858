// spacefn Input Layer
// Event model, keyboard detection and blocking event sources

mod device;
mod event;
mod source;

pub use device::{is_keyboard, is_virtual_device, DeviceCapabilities, DeviceInfo, VIRTUAL_DEVICE_NAME};
pub use event::{is_key_event, Event, EventClass, KeyEvent, RawEvent, EV_KEY, EV_MSC, EV_SYN, SYN_REPORT};
pub use source::{EventSource, InputError, Poll, ScriptedSource, Step};

#[cfg(feature = "evdev-io")]
pub use device::{capabilities_of, device_info, scan_keyboards};
#[cfg(feature = "evdev-io")]
pub use source::EvdevSource;
