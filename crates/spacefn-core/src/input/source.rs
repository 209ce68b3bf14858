// spacefn Input Layer - Event Sources
// Blocking reads with an optional deadline over a single input source

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Instant;

use super::event::RawEvent;

/// Errors that can occur while reading input events
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read input event: {0}")]
    Read(#[from] std::io::Error),

    #[error("Input device disconnected")]
    Disconnected,
}

/// Outcome of waiting for the next input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// An event arrived
    Event(RawEvent),
    /// The deadline passed with no event
    TimedOut,
    /// The wait was interrupted by a signal before anything arrived
    Interrupted,
}

/// An ordered stream of raw input events.
pub trait EventSource {
    /// Block until the next event, or until `deadline` passes.
    ///
    /// With `deadline == None` the wait is unbounded. Events already
    /// received are returned before the deadline is re-evaluated.
    fn next_event(&mut self, deadline: Option<Instant>) -> Result<Poll, InputError>;
}

/// One step of a scripted input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Event(RawEvent),
    Timeout,
    Interrupt,
}

/// An event source replaying a fixed script, for driving the event loop
/// without hardware. Running past the end reports a disconnect.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    deadlines_seen: Vec<Option<Instant>>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            deadlines_seen: Vec::new(),
        }
    }

    /// The deadline passed to every `next_event` call, in order
    pub fn deadlines_seen(&self) -> &[Option<Instant>] {
        &self.deadlines_seen
    }
}

impl EventSource for ScriptedSource {
    fn next_event(&mut self, deadline: Option<Instant>) -> Result<Poll, InputError> {
        self.deadlines_seen.push(deadline);
        match self.steps.pop_front() {
            Some(Step::Event(event)) => Ok(Poll::Event(event)),
            Some(Step::Timeout) => Ok(Poll::TimedOut),
            Some(Step::Interrupt) => Ok(Poll::Interrupted),
            None => Err(InputError::Disconnected),
        }
    }
}

/// Milliseconds to hand to `poll` for `deadline`, as seen at `now`.
///
/// `-1` waits forever; `None` means the deadline has already passed. The
/// remainder is rounded up so the wait never ends before the deadline.
#[cfg_attr(not(feature = "evdev-io"), allow(dead_code))]
fn poll_timeout_ms(deadline: Option<Instant>, now: Instant) -> Option<i32> {
    let Some(deadline) = deadline else {
        return Some(-1);
    };
    let remaining = deadline.saturating_duration_since(now);
    if remaining.is_zero() {
        return None;
    }
    let ms = remaining.as_micros().div_ceil(1000);
    Some(ms.min(i32::MAX as u128) as i32)
}

/// What ended a `wait_readable` call
#[cfg_attr(not(feature = "evdev-io"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// The input descriptor has data
    Input,
    /// The wakeup descriptor has data
    Wake,
    /// The input descriptor hung up or errored
    Hangup,
    TimedOut,
    /// A signal handler ran during the wait
    Interrupted,
    /// `poll` returned with nothing we asked for
    Spurious,
}

/// Block until `input` or `wake` is readable, or `timeout_ms` passes.
///
/// Wakeups win over input so a pending shutdown is seen before more events
/// are read.
#[cfg_attr(not(feature = "evdev-io"), allow(dead_code))]
fn wait_readable(input: RawFd, wake: Option<RawFd>, timeout_ms: i32) -> io::Result<Readiness> {
    // poll skips entries with a negative fd
    let mut fds = [
        libc::pollfd {
            fd: input,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: wake.unwrap_or(-1),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::Interrupted);
        }
        return Err(err);
    }
    if result == 0 {
        return Ok(Readiness::TimedOut);
    }

    if fds[1].revents & libc::POLLIN != 0 {
        return Ok(Readiness::Wake);
    }
    let revents = fds[0].revents;
    if revents & libc::POLLIN != 0 {
        return Ok(Readiness::Input);
    }
    if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Ok(Readiness::Hangup);
    }
    Ok(Readiness::Spurious)
}

#[cfg(feature = "evdev-io")]
pub use evdev_source::EvdevSource;

#[cfg(feature = "evdev-io")]
mod evdev_source {
    use super::*;
    use evdev::Device;
    use std::io::Read;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    /// Reads events from a single (optionally grabbed) evdev device.
    ///
    /// Waiting uses `libc::poll` on the device fd, so the disambiguation
    /// deadline cuts the wait short. An optional wakeup stream (the read end
    /// of a signal self-pipe) ends the wait as well.
    pub struct EvdevSource {
        device: Device,
        wake: Option<UnixStream>,
        pending: VecDeque<RawEvent>,
        grabbed: bool,
    }

    impl EvdevSource {
        pub fn new(device: Device) -> Self {
            Self {
                device,
                wake: None,
                pending: VecDeque::new(),
                grabbed: false,
            }
        }

        /// Report `Poll::Interrupted` whenever `wake` becomes readable
        pub fn with_wakeup(mut self, wake: UnixStream) -> io::Result<Self> {
            wake.set_nonblocking(true)?;
            self.wake = Some(wake);
            Ok(self)
        }

        /// Take exclusive access: no other reader sees the raw events
        pub fn grab(&mut self) -> io::Result<()> {
            if !self.grabbed {
                self.device.grab()?;
                self.grabbed = true;
            }
            Ok(())
        }

        /// Release exclusive access
        pub fn ungrab(&mut self) {
            if self.grabbed {
                if let Err(e) = self.device.ungrab() {
                    log::warn!("Failed to ungrab input device: {}", e);
                }
                self.grabbed = false;
            }
        }

        pub fn device(&self) -> &Device {
            &self.device
        }

        /// Empty the wakeup stream so the next wait blocks again
        fn drain_wake(&mut self) {
            let Some(wake) = self.wake.as_mut() else {
                return;
            };
            let mut buf = [0u8; 64];
            while let Ok(n) = wake.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        }
    }

    impl EventSource for EvdevSource {
        fn next_event(&mut self, deadline: Option<Instant>) -> Result<Poll, InputError> {
            loop {
                if let Some(event) = self.pending.pop_front() {
                    return Ok(Poll::Event(event));
                }

                let Some(timeout_ms) = poll_timeout_ms(deadline, Instant::now()) else {
                    return Ok(Poll::TimedOut);
                };

                let wake_fd = self.wake.as_ref().map(|wake| wake.as_raw_fd());
                match wait_readable(self.device.as_raw_fd(), wake_fd, timeout_ms)? {
                    Readiness::Wake => {
                        self.drain_wake();
                        return Ok(Poll::Interrupted);
                    }
                    Readiness::Interrupted => return Ok(Poll::Interrupted),
                    Readiness::Hangup => return Err(InputError::Disconnected),
                    // Re-check the deadline at the top of the loop
                    Readiness::TimedOut | Readiness::Spurious => continue,
                    Readiness::Input => {}
                }

                match self.device.fetch_events() {
                    Ok(events) => self.pending.extend(events.map(RawEvent::from)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        return Ok(Poll::Interrupted)
                    }
                    Err(e) => return Err(InputError::Read(e)),
                }
            }
        }
    }

    /// Devices MUST be ungrabbed when the source goes away, otherwise the
    /// keyboard stays unusable until it is replugged.
    impl Drop for EvdevSource {
        fn drop(&mut self) {
            self.ungrab();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::event::EV_KEY;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    #[test]
    fn test_scripted_source_replays_in_order() {
        let press = RawEvent::new(EV_KEY, 57, 1);
        let mut source = ScriptedSource::new([Step::Event(press), Step::Timeout, Step::Interrupt]);

        assert_eq!(source.next_event(None).unwrap(), Poll::Event(press));
        assert_eq!(source.next_event(None).unwrap(), Poll::TimedOut);
        assert_eq!(source.next_event(None).unwrap(), Poll::Interrupted);
        assert!(matches!(
            source.next_event(None),
            Err(InputError::Disconnected)
        ));
    }

    #[test]
    fn test_scripted_source_disconnects_when_exhausted() {
        let mut source = ScriptedSource::new([]);
        assert!(matches!(
            source.next_event(None),
            Err(InputError::Disconnected)
        ));
    }

    #[test]
    fn test_scripted_source_records_deadlines() {
        let mut source = ScriptedSource::new([Step::Timeout, Step::Timeout]);
        let deadline = Instant::now() + Duration::from_millis(200);

        source.next_event(Some(deadline)).unwrap();
        source.next_event(None).unwrap();

        assert_eq!(source.deadlines_seen(), &[Some(deadline), None]);
    }

    #[test]
    fn test_poll_timeout_unbounded_without_deadline() {
        assert_eq!(poll_timeout_ms(None, Instant::now()), Some(-1));
    }

    #[test]
    fn test_poll_timeout_expired_deadline() {
        let now = Instant::now();
        assert_eq!(poll_timeout_ms(Some(now), now), None);
        assert_eq!(
            poll_timeout_ms(Some(now), now + Duration::from_millis(5)),
            None
        );
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        let now = Instant::now();
        let deadline = |d: Duration| Some(now + d);

        assert_eq!(poll_timeout_ms(deadline(Duration::from_millis(200)), now), Some(200));
        assert_eq!(poll_timeout_ms(deadline(Duration::from_micros(1500)), now), Some(2));
        assert_eq!(poll_timeout_ms(deadline(Duration::from_micros(1)), now), Some(1));
    }

    #[test]
    fn test_poll_timeout_saturates() {
        let now = Instant::now();
        let far = now + Duration::from_secs(60 * 60 * 24 * 365);
        assert_eq!(poll_timeout_ms(Some(far), now), Some(i32::MAX));
    }

    #[test]
    fn test_wait_readable_times_out() {
        let (input, _input_peer) = UnixStream::pair().unwrap();
        let readiness = wait_readable(input.as_raw_fd(), None, 0).unwrap();
        assert_eq!(readiness, Readiness::TimedOut);
    }

    #[test]
    fn test_wait_readable_sees_input() {
        let (input, mut input_peer) = UnixStream::pair().unwrap();
        let (wake, _wake_peer) = UnixStream::pair().unwrap();
        input_peer.write_all(&[1]).unwrap();

        let readiness = wait_readable(input.as_raw_fd(), Some(wake.as_raw_fd()), 1000).unwrap();
        assert_eq!(readiness, Readiness::Input);
    }

    #[test]
    fn test_wait_readable_wake_ends_unbounded_wait() {
        let (input, _input_peer) = UnixStream::pair().unwrap();
        let (wake, mut wake_peer) = UnixStream::pair().unwrap();
        wake_peer.write_all(&[0]).unwrap();

        let readiness = wait_readable(input.as_raw_fd(), Some(wake.as_raw_fd()), -1).unwrap();
        assert_eq!(readiness, Readiness::Wake);
    }

    #[test]
    fn test_wait_readable_wake_wins_over_input() {
        let (input, mut input_peer) = UnixStream::pair().unwrap();
        let (wake, mut wake_peer) = UnixStream::pair().unwrap();
        input_peer.write_all(&[1]).unwrap();
        wake_peer.write_all(&[0]).unwrap();

        let readiness = wait_readable(input.as_raw_fd(), Some(wake.as_raw_fd()), 1000).unwrap();
        assert_eq!(readiness, Readiness::Wake);
    }
}
