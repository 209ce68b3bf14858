// spacefn Event Loop
// Single-threaded read -> disambiguate -> forward cycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::engine::{DisambiguationEngine, EngineError};
use crate::input::{Event, EventSource, InputError, Poll};
use crate::output::KeySink;

/// Result type for event loop operations
pub type EventLoopResult<T> = Result<T, EventLoopError>;

/// Errors that end the event loop. All of them are fatal: the device
/// session is assumed to be permanently broken.
#[derive(Debug, thiserror::Error)]
pub enum EventLoopError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Why the loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A termination signal was received
    Signal,
    /// The eject key was pressed
    Eject,
}

/// Drive `engine` from `source` until shutdown is requested or a fatal
/// error occurs.
///
/// The only blocking point is `source.next_event`, bounded by the engine's
/// Decide deadline when one is pending. Each event is fully processed
/// before the remaining window is recomputed. On a clean exit the engine
/// is unwound so that no key is left pressed downstream.
pub fn run<E, S>(
    source: &mut E,
    engine: &mut DisambiguationEngine<S>,
    shutdown: &AtomicBool,
) -> EventLoopResult<LoopExit>
where
    E: EventSource + ?Sized,
    S: KeySink,
{
    log::info!(
        "Remapping {} (policy {}, window {}ms)",
        engine.config().modifier,
        engine.config().policy,
        engine.config().timeout.as_millis()
    );

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("Shutdown requested, releasing held keys");
            engine.shutdown()?;
            return Ok(LoopExit::Signal);
        }

        if engine.eject_requested() {
            engine.shutdown()?;
            return Ok(LoopExit::Eject);
        }

        match source.next_event(engine.deadline())? {
            Poll::Event(raw) => engine.handle(Event::from(raw), Instant::now())?,
            Poll::TimedOut => engine.handle_timeout()?,
            Poll::Interrupted => continue,
        }
    }
}
