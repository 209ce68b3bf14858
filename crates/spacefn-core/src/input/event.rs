// spacefn Input Layer - Event Model
// Raw {type, code, value} triples and their key-event interpretation

use std::fmt;

use crate::{Action, Key};

/// EV_SYN event type code
pub const EV_SYN: u16 = 0x00;
/// EV_KEY event type code
pub const EV_KEY: u16 = 0x01;
/// EV_MSC event type code
pub const EV_MSC: u16 = 0x04;
/// SYN_REPORT code within EV_SYN
pub const SYN_REPORT: u16 = 0x00;

/// Check if an event type is a key event.
pub fn is_key_event(event_type: u16) -> bool {
    event_type == EV_KEY
}

/// A kernel input event as read from, or written to, an event device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    /// An EV_KEY event for `key` with the given transition
    pub fn key(key: Key, action: Action) -> Self {
        Self::new(EV_KEY, key.code(), action.to_i32())
    }

    /// The SYN_REPORT marker that closes a frame
    pub fn sync_report() -> Self {
        Self::new(EV_SYN, SYN_REPORT, 0)
    }

    pub fn is_sync_report(&self) -> bool {
        self.kind == EV_SYN && self.code == SYN_REPORT
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_key_event(self.kind) {
            match Action::from_i32(self.value) {
                Some(action) => write!(f, "{} {}", Key(self.code), action),
                None => write!(f, "{} value={}", Key(self.code), self.value),
            }
        } else {
            write!(
                f,
                "type={:#04x} code={:#06x} value={}",
                self.kind, self.code, self.value
            )
        }
    }
}

#[cfg(feature = "evdev-io")]
impl From<evdev::InputEvent> for RawEvent {
    fn from(event: evdev::InputEvent) -> Self {
        Self::new(event.event_type().0, event.code(), event.value())
    }
}

#[cfg(feature = "evdev-io")]
impl From<RawEvent> for evdev::InputEvent {
    fn from(event: RawEvent) -> Self {
        evdev::InputEvent::new(evdev::EventType(event.kind), event.code, event.value)
    }
}

/// A key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub key: Key,
    pub action: Action,
}

impl KeyEvent {
    pub fn new(key: Key, action: Action) -> Self {
        Self { key, action }
    }

    pub fn press(key: Key) -> Self {
        Self::new(key, Action::Press)
    }

    pub fn release(key: Key) -> Self {
        Self::new(key, Action::Release)
    }

    pub fn repeat(key: Key) -> Self {
        Self::new(key, Action::Repeat)
    }
}

/// Whether an event takes part in remapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Key,
    Other,
}

/// An input event as seen by the engine: a key transition, or anything else
/// (synchronization, scan codes, LEDs) which is forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Key(KeyEvent),
    Other(RawEvent),
}

impl Event {
    pub fn class(&self) -> EventClass {
        match self {
            Event::Key(_) => EventClass::Key,
            Event::Other(_) => EventClass::Other,
        }
    }
}

impl From<RawEvent> for Event {
    /// EV_KEY events with an unknown value are not key transitions and
    /// pass through untouched.
    fn from(raw: RawEvent) -> Self {
        if is_key_event(raw.kind) {
            if let Some(action) = Action::from_i32(raw.value) {
                return Event::Key(KeyEvent::new(Key(raw.code), action));
            }
        }
        Event::Other(raw)
    }
}

impl From<KeyEvent> for Event {
    fn from(event: KeyEvent) -> Self {
        Event::Key(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_key_event() {
        assert!(is_key_event(EV_KEY));
        assert!(!is_key_event(EV_SYN));
        assert!(!is_key_event(EV_MSC));
    }

    #[test]
    fn test_raw_key_event_classifies_as_key() {
        let event = Event::from(RawEvent::new(EV_KEY, 57, 1));
        assert_eq!(event, Event::Key(KeyEvent::press(Key::SPACE)));
        assert_eq!(event.class(), EventClass::Key);
    }

    #[test]
    fn test_repeat_value() {
        let event = Event::from(RawEvent::new(EV_KEY, 35, 2));
        assert_eq!(event, Event::Key(KeyEvent::repeat(Key::H)));
    }

    #[test]
    fn test_sync_classifies_as_other() {
        let raw = RawEvent::sync_report();
        assert!(raw.is_sync_report());
        assert_eq!(Event::from(raw), Event::Other(raw));
        assert_eq!(Event::from(raw).class(), EventClass::Other);
    }

    #[test]
    fn test_scan_code_is_other() {
        let raw = RawEvent::new(EV_MSC, 4, 0x7002c);
        assert_eq!(Event::from(raw), Event::Other(raw));
        assert!(!raw.is_sync_report());
    }

    #[test]
    fn test_unknown_key_value_is_other() {
        let raw = RawEvent::new(EV_KEY, 30, 7);
        assert_eq!(Event::from(raw), Event::Other(raw));
    }

    #[test]
    fn test_raw_key_constructor() {
        assert_eq!(
            RawEvent::key(Key::LEFT, Action::Release),
            RawEvent::new(EV_KEY, 105, 0)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(RawEvent::key(Key::H, Action::Press).to_string(), "H press");
        assert_eq!(
            RawEvent::sync_report().to_string(),
            "type=0x00 code=0x0000 value=0"
        );
    }
}
