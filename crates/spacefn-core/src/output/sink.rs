// spacefn Output Layer - Sinks
// Destinations for emitted event batches

use crate::input::RawEvent;
use crate::{Action, Key};

/// Error types for output operations
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to open uinput: {0}")]
    Unavailable(std::io::Error),

    #[error("Failed to create virtual device: {0}")]
    DeviceCreation(std::io::Error),

    #[error("Failed to write event: {0}")]
    Write(std::io::Error),
}

/// A virtual output device.
///
/// `emit` writes a batch of events and terminates it with exactly one
/// SYN_REPORT, so downstream readers observe the batch atomically.
pub trait KeySink {
    fn emit(&mut self, batch: &[RawEvent]) -> Result<(), OutputError>;
}

impl<S: KeySink + ?Sized> KeySink for &mut S {
    fn emit(&mut self, batch: &[RawEvent]) -> Result<(), OutputError> {
        (**self).emit(batch)
    }
}

/// Sink that keeps every batch in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    batches: Vec<Vec<RawEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every emitted batch, each implicitly followed by a SYN_REPORT
    pub fn batches(&self) -> &[Vec<RawEvent>] {
        &self.batches
    }

    /// The full output stream with the synchronization markers spelled out
    pub fn frames(&self) -> Vec<RawEvent> {
        self.batches
            .iter()
            .flat_map(|batch| batch.iter().copied().chain([RawEvent::sync_report()]))
            .collect()
    }

    /// Key transitions only, flattened across batches
    pub fn key_events(&self) -> Vec<(Key, Action)> {
        self.batches
            .iter()
            .flatten()
            .filter(|event| crate::input::is_key_event(event.kind))
            .filter_map(|event| Action::from_i32(event.value).map(|a| (Key(event.code), a)))
            .collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

impl KeySink for RecordingSink {
    fn emit(&mut self, batch: &[RawEvent]) -> Result<(), OutputError> {
        self.batches.push(batch.to_vec());
        Ok(())
    }
}
