// spacefn Disambiguation Engine
// Tap-vs-hold state machine for the layer modifier key
//
// Idle ──modifier press──▶ Decide ──modifier release (tap)──▶ Idle
//                            │
//                            ├─buffered key released ─┐
//                            └─window elapsed ────────┴──▶ Shift ──modifier release──▶ Idle
//
// The engine owns the set of keys it has reported pressed downstream and
// never returns to Idle from Shift without releasing each of them.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::active::ActiveKeySet;
use crate::input::{Event, KeyEvent};
use crate::output::{EventForwarder, KeySink, OutputError};
use crate::{Action, Key, KeyMapTable, MappedKey};

/// Default length of the disambiguation window
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// Errors raised while processing events
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Modifier up; everything passes through
    Idle,
    /// Modifier down, tap or hold not yet known
    Decide,
    /// Modifier held as a layer
    Shift,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Decide => write!(f, "decide"),
            EngineState::Shift => write!(f, "shift"),
        }
    }
}

/// How the Decide state is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecidePolicy {
    /// Buffer presses until a buffered key is released or the window
    /// elapses
    #[default]
    Timeout,
    /// Resolve to the layer on the first other-key press; no timer
    Immediate,
}

impl FromStr for DecidePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeout" => Ok(DecidePolicy::Timeout),
            "immediate" => Ok(DecidePolicy::Immediate),
            other => Err(format!("Unknown decide policy: {}", other)),
        }
    }
}

impl fmt::Display for DecidePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecidePolicy::Timeout => write!(f, "timeout"),
            DecidePolicy::Immediate => write!(f, "immediate"),
        }
    }
}

/// Configuration for the disambiguation engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Key acting as tap/layer modifier
    pub modifier: Key,
    /// Disambiguation window length
    pub timeout: Duration,
    /// Decide-state exit conditions
    pub policy: DecidePolicy,
    /// Key used for synthetic shift
    pub shift_key: Key,
    /// Key that stops the daemon when pressed while the layer is resolving
    pub eject_key: Option<Key>,
    /// Layer mappings
    pub keymap: KeyMapTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            modifier: Key::SPACE,
            timeout: DEFAULT_TIMEOUT,
            policy: DecidePolicy::Timeout,
            shift_key: Key::RIGHT_SHIFT,
            eject_key: None,
            keymap: KeyMapTable::default_layer(),
        }
    }
}

/// The tap-vs-hold state machine.
///
/// Time is supplied by the caller: `handle` takes the arrival instant of
/// each event, and `handle_timeout` is invoked once `deadline()` passes.
pub struct DisambiguationEngine<S> {
    config: EngineConfig,
    state: EngineState,
    active: ActiveKeySet,
    forwarder: EventForwarder<S>,
    deadline: Option<Instant>,
    eject_requested: bool,
}

impl<S: KeySink> DisambiguationEngine<S> {
    pub fn new(config: EngineConfig, sink: S) -> Self {
        let forwarder = EventForwarder::new(sink, config.shift_key);
        Self {
            config,
            state: EngineState::Idle,
            active: ActiveKeySet::new(),
            forwarder,
            deadline: None,
            eject_requested: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn active(&self) -> &ActiveKeySet {
        &self.active
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        self.forwarder.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.forwarder.sink_mut()
    }

    /// When the pending Decide window closes, if one is running
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the eject key was pressed
    pub fn eject_requested(&self) -> bool {
        self.eject_requested
    }

    /// Process one input event that arrived at `now`.
    pub fn handle(&mut self, event: Event, now: Instant) -> Result<(), EngineError> {
        match event {
            Event::Key(key_event) => {
                log::trace!("[{}] {} {}", self.state, key_event.key, key_event.action);
                match self.state {
                    EngineState::Idle => self.handle_idle(key_event, now),
                    EngineState::Decide => self.handle_decide(key_event),
                    EngineState::Shift => self.handle_shift(key_event),
                }
            }
            Event::Other(raw) => Ok(self.forwarder.forward_raw(raw)?),
        }
    }

    /// The Decide window elapsed with no disambiguating event.
    ///
    /// Ignored outside Decide and under the immediate policy, so a stale
    /// timer firing after resolution is harmless.
    pub fn handle_timeout(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Decide || self.config.policy != DecidePolicy::Timeout {
            return Ok(());
        }
        log::debug!(
            "Decide window elapsed with {} buffered key(s)",
            self.active.len()
        );
        self.fix_buffer()?;
        self.enter(EngineState::Shift);
        Ok(())
    }

    /// Unwind before exit: release every key reported pressed and return to
    /// Idle.
    ///
    /// Presses deferred in Decide were never forwarded and are discarded.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Shift {
            self.release_active()?;
        }
        self.active.clear();
        self.enter(EngineState::Idle);
        Ok(())
    }

    fn enter(&mut self, state: EngineState) {
        if self.state != state {
            log::debug!("{} -> {}", self.state, state);
        }
        self.state = state;
        if state != EngineState::Decide {
            self.deadline = None;
        }
    }

    fn is_modifier(&self, key: Key) -> bool {
        key == self.config.modifier
    }

    /// The eject key only counts while the layer is being resolved, so it
    /// keeps its normal meaning otherwise.
    fn check_eject(&mut self, event: KeyEvent) -> bool {
        if event.action == Action::Press && Some(event.key) == self.config.eject_key {
            log::info!("Eject key {} pressed", event.key);
            self.eject_requested = true;
            return true;
        }
        false
    }

    fn handle_idle(&mut self, event: KeyEvent, now: Instant) -> Result<(), EngineError> {
        if self.is_modifier(event.key) && event.action == Action::Press {
            self.active.clear();
            self.deadline = match self.config.policy {
                DecidePolicy::Timeout => Some(now + self.config.timeout),
                DecidePolicy::Immediate => None,
            };
            self.enter(EngineState::Decide);
            return Ok(());
        }
        Ok(self.forwarder.passthrough(event)?)
    }

    fn handle_decide(&mut self, event: KeyEvent) -> Result<(), EngineError> {
        if self.is_modifier(event.key) {
            if event.action == Action::Release {
                return self.resolve_tap();
            }
            // Modifier repeats carry no information
            return Ok(());
        }

        if self.check_eject(event) {
            return Ok(());
        }

        match (self.config.policy, event.action) {
            (DecidePolicy::Timeout, Action::Press) => {
                if !self.active.append(event.key) {
                    // Untracked keys cannot be replayed later; send now
                    log::warn!("Active key set full, forwarding {} untracked", event.key);
                    self.forwarder.passthrough(event)?;
                }
                Ok(())
            }
            (DecidePolicy::Immediate, Action::Press) => {
                self.press_in_layer(event)?;
                self.enter(EngineState::Shift);
                Ok(())
            }
            (_, Action::Release) => {
                if self.active.remove(event.key) {
                    self.resolve_tap_through(event.key)
                } else {
                    // Held since before the modifier went down
                    Ok(self.forwarder.passthrough(event)?)
                }
            }
            (_, Action::Repeat) => {
                if self.active.contains(event.key) {
                    // Its press is still deferred
                    Ok(())
                } else {
                    Ok(self.forwarder.passthrough(event)?)
                }
            }
        }
    }

    /// Modifier released inside the window: type the modifier's own
    /// character, then replay the deferred presses literally.
    fn resolve_tap(&mut self) -> Result<(), EngineError> {
        log::debug!("Tap of {} with {} deferred key(s)", self.config.modifier, self.active.len());
        self.forwarder.tap(MappedKey::plain(self.config.modifier))?;
        for pending in self.active.to_vec() {
            self.forwarder.emit_mapped(pending, Action::Press)?;
        }
        self.active.clear();
        self.enter(EngineState::Idle);
        Ok(())
    }

    /// A buffered key was pressed and released under the modifier: the
    /// layer is intended.
    fn resolve_tap_through(&mut self, key: Key) -> Result<(), EngineError> {
        let mapped = self.config.keymap.resolve(key);
        log::debug!("Tap-through {} -> {}", key, mapped);
        self.forwarder.tap(mapped)?;
        self.fix_buffer()?;
        self.enter(EngineState::Shift);
        Ok(())
    }

    /// Replace every deferred raw key with its layer mapping and forward the
    /// press.
    ///
    /// The fixed set is built apart from the buffer: a mapped output may
    /// equal the raw code of a key still waiting to be fixed. Only outputs
    /// already fixed count as duplicates.
    fn fix_buffer(&mut self) -> Result<(), EngineError> {
        let mut fixed = ActiveKeySet::new();
        for raw in self.active.to_vec() {
            let mapped = self.config.keymap.resolve(raw.key);
            if fixed.contains(mapped) {
                log::debug!("{} already pressed, skipping {}", mapped, raw.key);
                continue;
            }
            fixed.append(mapped);
            self.forwarder.emit_mapped(mapped, Action::Press)?;
        }
        self.active = fixed;
        Ok(())
    }

    fn handle_shift(&mut self, event: KeyEvent) -> Result<(), EngineError> {
        if self.is_modifier(event.key) {
            if event.action == Action::Release {
                self.release_active()?;
                self.active.clear();
                self.enter(EngineState::Idle);
            }
            return Ok(());
        }

        if self.check_eject(event) {
            return Ok(());
        }

        match event.action {
            Action::Press => self.press_in_layer(event),
            Action::Release => {
                let tracked = self.config.keymap.resolve(event.key);
                if self.active.remove(tracked) {
                    self.forwarder.emit_mapped(tracked, Action::Release)?;
                } else {
                    self.forwarder.passthrough(event)?;
                }
                Ok(())
            }
            Action::Repeat => {
                // Repeat as whatever the press produced. Untracked keys (held
                // since before the layer, or past capacity) repeat raw so a
                // synthetic shift is never pressed without its release.
                let tracked = self.config.keymap.resolve(event.key);
                if self.active.contains(tracked) {
                    self.forwarder.emit_mapped(tracked, Action::Repeat)?;
                } else {
                    self.forwarder.passthrough(event)?;
                }
                Ok(())
            }
        }
    }

    /// Press a key through the layer: mapped keys are tracked, unmapped
    /// keys pass through untracked.
    fn press_in_layer(&mut self, event: KeyEvent) -> Result<(), EngineError> {
        match self.config.keymap.lookup(event.key) {
            Some(mapped) => {
                if !self.active.append(mapped) {
                    log::warn!("Active key set full, {} will not be tracked", mapped);
                }
                Ok(self.forwarder.emit_mapped(mapped, Action::Press)?)
            }
            None => Ok(self.forwarder.passthrough(event)?),
        }
    }

    fn release_active(&mut self) -> Result<(), EngineError> {
        for held in self.active.to_vec() {
            self.forwarder.emit_mapped(held, Action::Release)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingSink;

    fn engine() -> DisambiguationEngine<RecordingSink> {
        DisambiguationEngine::new(EngineConfig::default(), RecordingSink::new())
    }

    fn feed(engine: &mut DisambiguationEngine<RecordingSink>, events: &[KeyEvent]) {
        let now = Instant::now();
        for event in events {
            engine.handle(Event::Key(*event), now).unwrap();
        }
    }

    #[test]
    fn test_starts_idle() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.deadline().is_none());
        assert!(engine.active().is_empty());
    }

    #[test]
    fn test_idle_passthrough() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::H), KeyEvent::release(Key::H)]);
        assert_eq!(
            engine.sink().key_events(),
            vec![(Key::H, Action::Press), (Key::H, Action::Release)]
        );
    }

    #[test]
    fn test_modifier_press_arms_deadline() {
        let mut engine = engine();
        let now = Instant::now();
        engine
            .handle(Event::Key(KeyEvent::press(Key::SPACE)), now)
            .unwrap();

        assert_eq!(engine.state(), EngineState::Decide);
        assert_eq!(engine.deadline(), Some(now + DEFAULT_TIMEOUT));
        assert!(engine.sink().batches().is_empty());
    }

    #[test]
    fn test_immediate_policy_has_no_deadline() {
        let config = EngineConfig {
            policy: DecidePolicy::Immediate,
            ..EngineConfig::default()
        };
        let mut engine = DisambiguationEngine::new(config, RecordingSink::new());
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);

        assert_eq!(engine.state(), EngineState::Decide);
        assert!(engine.deadline().is_none());
    }

    #[test]
    fn test_deadline_cleared_after_resolution() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);
        engine.handle_timeout().unwrap();

        assert_eq!(engine.state(), EngineState::Shift);
        assert!(engine.deadline().is_none());
    }

    #[test]
    fn test_timeout_outside_decide_is_ignored() {
        let mut engine = engine();
        engine.handle_timeout().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.sink().batches().is_empty());
    }

    #[test]
    fn test_decide_swallows_modifier_repeat() {
        let mut engine = engine();
        feed(
            &mut engine,
            &[KeyEvent::press(Key::SPACE), KeyEvent::repeat(Key::SPACE)],
        );
        assert_eq!(engine.state(), EngineState::Decide);
        assert!(engine.sink().batches().is_empty());
    }

    #[test]
    fn test_decide_swallows_repeat_of_buffered_key() {
        let mut engine = engine();
        feed(
            &mut engine,
            &[
                KeyEvent::press(Key::SPACE),
                KeyEvent::press(Key::H),
                KeyEvent::repeat(Key::H),
            ],
        );
        assert!(engine.sink().batches().is_empty());
    }

    #[test]
    fn test_decide_forwards_repeat_of_key_held_before() {
        let mut engine = engine();
        feed(
            &mut engine,
            &[
                KeyEvent::press(Key::J),
                KeyEvent::press(Key::SPACE),
                KeyEvent::repeat(Key::J),
            ],
        );
        assert_eq!(
            engine.sink().key_events(),
            vec![(Key::J, Action::Press), (Key::J, Action::Repeat)]
        );
    }

    #[test]
    fn test_shift_ignores_modifier_repeat() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);
        engine.handle_timeout().unwrap();
        feed(&mut engine, &[KeyEvent::repeat(Key::SPACE)]);

        assert_eq!(engine.state(), EngineState::Shift);
        assert!(engine.sink().batches().is_empty());
    }

    #[test]
    fn test_shift_repeat_uses_mapped_key() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);
        engine.handle_timeout().unwrap();
        feed(
            &mut engine,
            &[KeyEvent::press(Key::H), KeyEvent::repeat(Key::H)],
        );

        assert_eq!(
            engine.sink().key_events(),
            vec![(Key::LEFT, Action::Press), (Key::LEFT, Action::Repeat)]
        );
        assert_eq!(engine.active().len(), 1);
    }

    #[test]
    fn test_eject_only_while_resolving() {
        let config = EngineConfig {
            eject_key: Some(Key::KEY_1),
            ..EngineConfig::default()
        };
        let mut engine = DisambiguationEngine::new(config, RecordingSink::new());

        feed(&mut engine, &[KeyEvent::press(Key::KEY_1)]);
        assert!(!engine.eject_requested());

        feed(&mut engine, &[KeyEvent::press(Key::SPACE), KeyEvent::press(Key::KEY_1)]);
        assert!(engine.eject_requested());
        assert!(!engine.active().contains(Key::KEY_1));
    }

    #[test]
    fn test_other_events_are_forwarded() {
        let mut engine = engine();
        let scan = crate::input::RawEvent::new(crate::input::EV_MSC, 4, 0x7000b);
        engine.handle(Event::Other(scan), Instant::now()).unwrap();
        engine
            .handle(Event::Other(crate::input::RawEvent::sync_report()), Instant::now())
            .unwrap();

        assert_eq!(engine.sink().batches(), &[vec![scan]]);
    }

    #[test]
    fn test_other_events_forwarded_while_deciding() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE), KeyEvent::press(Key::H)]);

        let scan = crate::input::RawEvent::new(crate::input::EV_MSC, 4, 0x7000b);
        engine.handle(Event::Other(scan), Instant::now()).unwrap();

        assert_eq!(engine.sink().batches(), &[vec![scan]]);
        assert_eq!(engine.state(), EngineState::Decide);
        assert!(engine.active().contains(Key::H));
    }

    #[test]
    fn test_other_events_forwarded_in_layer() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);
        engine.handle_timeout().unwrap();
        feed(&mut engine, &[KeyEvent::press(Key::H)]);

        let scan = crate::input::RawEvent::new(crate::input::EV_MSC, 4, 0x7000b);
        engine.handle(Event::Other(scan), Instant::now()).unwrap();

        assert_eq!(engine.sink().batches().last(), Some(&vec![scan]));
        assert_eq!(engine.state(), EngineState::Shift);
    }

    #[test]
    fn test_fix_buffer_with_chained_mapping() {
        let mut mappings = std::collections::HashMap::new();
        mappings.insert(Key::A, MappedKey::plain(Key::B));
        mappings.insert(Key::B, MappedKey::plain(Key::C));
        let config = EngineConfig {
            keymap: KeyMapTable::new(mappings),
            ..EngineConfig::default()
        };
        let mut engine = DisambiguationEngine::new(config, RecordingSink::new());

        feed(
            &mut engine,
            &[
                KeyEvent::press(Key::SPACE),
                KeyEvent::press(Key::A),
                KeyEvent::press(Key::B),
            ],
        );
        engine.handle_timeout().unwrap();

        assert_eq!(
            engine.sink().key_events(),
            vec![(Key::B, Action::Press), (Key::C, Action::Press)]
        );
        assert_eq!(
            engine.active().to_vec(),
            vec![MappedKey::plain(Key::B), MappedKey::plain(Key::C)]
        );
    }

    #[test]
    fn test_fix_buffer_collapses_same_output() {
        let mut mappings = std::collections::HashMap::new();
        mappings.insert(Key::H, MappedKey::plain(Key::LEFT));
        let config = EngineConfig {
            keymap: KeyMapTable::new(mappings),
            ..EngineConfig::default()
        };
        let mut engine = DisambiguationEngine::new(config, RecordingSink::new());

        feed(
            &mut engine,
            &[
                KeyEvent::press(Key::SPACE),
                KeyEvent::press(Key::LEFT),
                KeyEvent::press(Key::H),
            ],
        );
        engine.handle_timeout().unwrap();

        assert_eq!(engine.sink().key_events(), vec![(Key::LEFT, Action::Press)]);
        assert_eq!(engine.active().to_vec(), vec![MappedKey::plain(Key::LEFT)]);
    }

    #[test]
    fn test_untracked_layer_key_repeats_raw() {
        let mut engine = engine();
        feed(&mut engine, &[KeyEvent::press(Key::SPACE)]);
        engine.handle_timeout().unwrap();

        // Fill the set with mapped keys, then overflow with L (Shift+9)
        let fillers = [Key::H, Key::Y, Key::N, Key::U, Key::Z, Key::X, Key::C, Key::V];
        for key in fillers {
            feed(&mut engine, &[KeyEvent::press(key)]);
        }
        assert_eq!(engine.active().len(), crate::ACTIVE_CAPACITY);
        engine.sink_mut().clear();

        feed(&mut engine, &[KeyEvent::press(Key::L), KeyEvent::repeat(Key::L)]);

        assert_eq!(
            engine.sink().key_events(),
            vec![
                (Key::RIGHT_SHIFT, Action::Press),
                (Key::KEY_9, Action::Press),
                (Key::L, Action::Repeat),
            ]
        );
        assert!(!engine.active().contains(MappedKey::shifted(Key::KEY_9)));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("timeout".parse::<DecidePolicy>(), Ok(DecidePolicy::Timeout));
        assert_eq!("Immediate".parse::<DecidePolicy>(), Ok(DecidePolicy::Immediate));
        assert!("later".parse::<DecidePolicy>().is_err());
        assert_eq!(DecidePolicy::Immediate.to_string(), "immediate");
    }
}
