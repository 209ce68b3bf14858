// spacefn Output Layer - Event Forwarder
// Logical key emission with optional synthetic shift

use smallvec::SmallVec;

use super::sink::{KeySink, OutputError};
use crate::input::{KeyEvent, RawEvent};
use crate::{Action, Key, MappedKey};

/// Wraps the virtual output device and turns logical key transitions into
/// synchronized event batches.
#[derive(Debug)]
pub struct EventForwarder<S> {
    sink: S,
    shift_key: Key,
}

impl<S: KeySink> EventForwarder<S> {
    pub fn new(sink: S, shift_key: Key) -> Self {
        Self { sink, shift_key }
    }

    /// Emit one key transition followed by a synchronization marker.
    ///
    /// With `shift`, the shift key is pressed before the key on Press and
    /// Repeat, and released after the key on Release.
    pub fn emit(&mut self, key: Key, action: Action, shift: bool) -> Result<(), OutputError> {
        let mut batch: SmallVec<[RawEvent; 2]> = SmallVec::new();
        let main = RawEvent::key(key, action);

        if shift {
            match action {
                Action::Press | Action::Repeat => {
                    batch.push(RawEvent::key(self.shift_key, Action::Press));
                    batch.push(main);
                }
                Action::Release => {
                    batch.push(main);
                    batch.push(RawEvent::key(self.shift_key, Action::Release));
                }
            }
        } else {
            batch.push(main);
        }

        log::trace!("emit {} {} shift={}", key, action, shift);
        self.sink.emit(&batch)
    }

    /// Emit a layer mapping, honoring its shift attribute
    pub fn emit_mapped(&mut self, mapped: MappedKey, action: Action) -> Result<(), OutputError> {
        self.emit(mapped.key, action, mapped.needs_shift)
    }

    /// Press then release, as two synchronized frames
    pub fn tap(&mut self, mapped: MappedKey) -> Result<(), OutputError> {
        self.emit_mapped(mapped, Action::Press)?;
        self.emit_mapped(mapped, Action::Release)
    }

    /// Forward a key event unchanged
    pub fn passthrough(&mut self, event: KeyEvent) -> Result<(), OutputError> {
        self.emit(event.key, event.action, false)
    }

    /// Forward a non-key event verbatim.
    ///
    /// Incoming SYN_REPORTs are absorbed: every emission already closes its
    /// own frame, and repeating the marker would only produce empty frames.
    pub fn forward_raw(&mut self, event: RawEvent) -> Result<(), OutputError> {
        if event.is_sync_report() {
            return Ok(());
        }
        self.sink.emit(&[event])
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
