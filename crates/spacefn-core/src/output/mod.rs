// spacefn Output Layer
// Event forwarding to the virtual keyboard

mod forwarder;
mod sink;

#[cfg(feature = "evdev-io")]
mod uinput;

pub use forwarder::EventForwarder;
pub use sink::{KeySink, OutputError, RecordingSink};

#[cfg(feature = "evdev-io")]
pub use uinput::UInputSink;
