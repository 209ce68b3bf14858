// spacefn Core Library
// Tap-or-layer remapping of a single modifier key

pub mod action;
pub mod active;
pub mod config;
pub mod engine;
pub mod event;
pub mod input;
pub mod key;
pub mod keymap;
pub mod output;

pub use action::Action;
pub use active::{ActiveKeySet, ACTIVE_CAPACITY};
pub use config::{Config, ConfigError};
pub use engine::{DecidePolicy, DisambiguationEngine, EngineConfig, EngineError, EngineState};
pub use event::{run, EventLoopError, EventLoopResult, LoopExit};
pub use input::{
    is_keyboard, DeviceCapabilities, Event, EventClass, EventSource, InputError, KeyEvent, Poll,
    RawEvent,
};
pub use key::Key;
pub use keymap::{KeyMapTable, MappedKey};
pub use output::{EventForwarder, KeySink, OutputError, RecordingSink};
