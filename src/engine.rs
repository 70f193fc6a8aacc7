//! Playback engine: an adapter over the single native audio transport.
//!
//! The engine owns the transport and turns its raw status into the two
//! signals the session controller needs:
//! * whether the status changed enough to be worth publishing ("dirty")
//! * whether the current track has finished
//!
//! # Throttling
//!
//! Transports report status far more often than anything downstream needs.
//! The engine evaluates at most one status every 500 ms, and only considers
//! it dirty when:
//! * the position moved by at least one second, or
//! * the duration changed, or
//! * the play state changed
//!
//! # End of track
//!
//! A track is finished the first time its duration is known and the position
//! is within 100 ms of the end. A one-shot latch makes sure this is reported
//! once per track; loading a new source re-arms it.

use std::{fmt, path::PathBuf, time::Duration};

use tokio::time::Instant;
use url::Url;

use crate::error::Result;

/// Where audio for a track comes from.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Source {
    /// A downloaded file.
    Local(PathBuf),
    /// A stream locator resolved by the catalog.
    Remote(Url),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url.host_str().unwrap_or("stream")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Status {
    pub position: Duration,
    pub duration: Duration,
    pub playing: bool,
}

/// The native audio transport. Commands are non-blocking: they are handed to
/// the transport and their effect shows up in later [`status`](Self::status)
/// reports.
pub trait Transport: Send {
    /// Replaces the current source. Playback does not start until
    /// [`play`](Self::play).
    fn replace(&mut self, source: &Source) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn status(&self) -> Status;
}

/// What the controller should do with one status observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub status: Status,
    /// The status changed enough to publish.
    pub dirty: bool,
    /// The track ended. Reported once per loaded source.
    pub finished: bool,
}

/// Decides which status reports are worth reacting to.
#[derive(Clone, Debug)]
pub struct StatusThrottle {
    min_interval: Duration,
    position_step: Duration,
    last_evaluated: Option<Instant>,
    last_reported: Option<Status>,
}

impl StatusThrottle {
    pub const MIN_INTERVAL: Duration = Duration::from_millis(500);
    pub const POSITION_STEP: Duration = Duration::from_millis(1000);

    #[must_use]
    pub fn new() -> Self {
        Self {
            min_interval: Self::MIN_INTERVAL,
            position_step: Self::POSITION_STEP,
            last_evaluated: None,
            last_reported: None,
        }
    }

    /// Whether a status arriving at `now` may be evaluated at all.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_evaluated {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_evaluated = Some(now);
        true
    }

    /// Whether `status` differs enough from the last reported one.
    pub fn is_dirty(&mut self, status: Status) -> bool {
        let dirty = match self.last_reported {
            None => true,
            Some(last) => {
                last.duration != status.duration
                    || last.playing != status.playing
                    || abs_diff(last.position, status.position) >= self.position_step
            }
        };

        if dirty {
            self.last_reported = Some(status);
        }
        dirty
    }

    /// Forgets the last reported status, so the next admitted one is dirty.
    pub fn reset(&mut self) {
        self.last_reported = None;
    }
}

impl Default for StatusThrottle {
    fn default() -> Self {
        Self::new()
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

pub struct PlaybackEngine {
    transport: Box<dyn Transport>,
    throttle: StatusThrottle,
    finished: bool,
}

impl PlaybackEngine {
    /// How close to the end a track counts as finished.
    pub const END_TOLERANCE: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            throttle: StatusThrottle::new(),
            finished: false,
        }
    }

    /// Replaces the source and starts playback. Re-arms end-of-track
    /// detection.
    pub fn load(&mut self, source: &Source) -> Result<()> {
        debug!("loading {source}");
        self.transport.replace(source)?;
        self.transport.play()?;

        self.finished = false;
        self.throttle.reset();
        Ok(())
    }

    /// Plays the loaded source again from the start.
    pub fn restart(&mut self) -> Result<()> {
        self.transport.seek_to(Duration::ZERO)?;
        self.transport.play()?;

        self.finished = false;
        self.throttle.reset();
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.transport.play()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transport.pause()
    }

    pub fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.transport.seek_to(position)?;

        // Seeking back from the very end makes the track unfinished again.
        let status = self.transport.status();
        if status.duration.is_zero() || position + Self::END_TOLERANCE < status.duration {
            self.finished = false;
        }
        Ok(())
    }

    /// The transport's current status, unthrottled.
    #[must_use]
    pub fn status(&self) -> Status {
        self.transport.status()
    }

    /// Evaluates the transport status at `now`. Returns `None` when the
    /// throttle drops the report.
    pub fn observe(&mut self, now: Instant) -> Option<Observation> {
        if !self.throttle.admit(now) {
            return None;
        }

        let status = self.transport.status();
        let dirty = self.throttle.is_dirty(status);

        let at_end = !status.duration.is_zero()
            && status.position + Self::END_TOLERANCE >= status.duration;
        let finished = at_end && !self.finished;
        if finished {
            self.finished = true;
        }

        Some(Observation {
            status,
            dirty,
            finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Deck(Arc<Mutex<Status>>);

    impl Deck {
        fn set(&self, position_ms: u64, duration_ms: u64, playing: bool) {
            *self.0.lock().unwrap() = Status {
                position: Duration::from_millis(position_ms),
                duration: Duration::from_millis(duration_ms),
                playing,
            };
        }
    }

    impl Transport for Deck {
        fn replace(&mut self, _: &Source) -> Result<()> {
            self.set(0, 0, false);
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            self.0.lock().unwrap().playing = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.0.lock().unwrap().playing = false;
            Ok(())
        }

        fn seek_to(&mut self, position: Duration) -> Result<()> {
            self.0.lock().unwrap().position = position;
            Ok(())
        }

        fn status(&self) -> Status {
            *self.0.lock().unwrap()
        }
    }

    fn source() -> Source {
        Source::Remote(Url::parse("https://cdn.example.com/1.mp3").unwrap())
    }

    #[test]
    fn throttle_admits_two_per_second() {
        let mut throttle = StatusThrottle::new();
        let start = Instant::now();

        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(100)));
        assert!(!throttle.admit(start + Duration::from_millis(499)));
        assert!(throttle.admit(start + Duration::from_millis(500)));
        assert!(throttle.admit(start + Duration::from_millis(1000)));
    }

    #[test]
    fn small_position_changes_are_not_dirty() {
        let mut throttle = StatusThrottle::new();
        let status = |ms, playing| Status {
            position: Duration::from_millis(ms),
            duration: Duration::from_secs(180),
            playing,
        };

        assert!(throttle.is_dirty(status(0, true)));
        assert!(!throttle.is_dirty(status(600, true)));
        assert!(throttle.is_dirty(status(1000, true)));
        assert!(!throttle.is_dirty(status(1500, true)));
        assert!(throttle.is_dirty(status(1500, false)));
    }

    #[test]
    fn finish_is_reported_once_per_load() {
        let deck = Deck::default();
        let mut engine = PlaybackEngine::new(Box::new(deck.clone()));
        let start = Instant::now();
        engine.load(&source()).unwrap();

        deck.set(179_850, 180_000, true);
        let first = engine.observe(start).unwrap();
        assert!(first.finished);

        deck.set(180_000, 180_000, false);
        let second = engine.observe(start + Duration::from_secs(1)).unwrap();
        assert!(!second.finished);

        engine.load(&source()).unwrap();
        deck.set(180_000, 180_000, false);
        let third = engine.observe(start + Duration::from_secs(2)).unwrap();
        assert!(third.finished);
    }

    #[test]
    fn unknown_duration_never_finishes() {
        let deck = Deck::default();
        let mut engine = PlaybackEngine::new(Box::new(deck.clone()));
        engine.load(&source()).unwrap();

        deck.set(0, 0, true);
        let observation = engine.observe(Instant::now()).unwrap();
        assert!(!observation.finished);
        assert!(observation.dirty);
    }

    #[test]
    fn seeking_back_rearms_finish() {
        let deck = Deck::default();
        let mut engine = PlaybackEngine::new(Box::new(deck.clone()));
        let start = Instant::now();
        engine.load(&source()).unwrap();

        deck.set(60_000, 60_000, false);
        assert!(engine.observe(start).unwrap().finished);

        engine.seek_to(Duration::from_secs(10)).unwrap();
        deck.set(60_000, 60_000, false);
        assert!(engine.observe(start + Duration::from_secs(1)).unwrap().finished);
    }
}
