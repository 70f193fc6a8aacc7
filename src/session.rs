//! Session state and the pure queue transitions of the player.
//!
//! [`SessionState`] is owned by exactly one [`Controller`](crate::controller::Controller)
//! and never shared. Methods here do no I/O: the controller resolves sources
//! and talks to the transport, then commits the outcome through these
//! methods. That keeps every queue rule testable without a runtime.
//!
//! # Queues
//!
//! * `original` holds the queue in its canonical, unshuffled order.
//! * `pending` holds what plays next, shuffled or not. The slot the current
//!   track was started from is taken out of it; other copies of the same
//!   track stay queued.
//! * `previous` is the back-stack of tracks that were played before.
//!
//! Turning shuffle off restores the order of `original`, limited to the
//! tracks still pending. Tracks consumed since the queue was built are not
//! brought back.

use std::{collections::HashMap, fmt, time::Duration};

use serde::Serialize;

use crate::{
    catalog::RadioPage,
    engine::Status,
    error::{Error, Result},
    track::{Track, TrackId},
};

/// Radio pages are fetched ahead when this few tracks are left.
pub const RADIO_REFILL_THRESHOLD: usize = 5;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    /// The mode after this one: `Off → All → One → Off`.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::All => write!(f, "all"),
            Self::One => write!(f, "one"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// What a skip to the next track should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Play the current track again.
    Replay,
    /// Play the head of the pending queue.
    Next(Track),
    /// Rebuild the pending queue from the original queue and play its head.
    Wrap(Vec<Track>),
    /// Nothing left to play.
    Stop,
}

/// Read-only view of the session, published to observers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub previous: Vec<Track>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub state: PlaybackState,
    pub position: Duration,
    pub duration: Duration,
    pub is_playing: bool,
    /// Whether a radio feed can extend the queue.
    pub has_radio: bool,
}

pub struct SessionState {
    current: Option<Track>,
    pending: Vec<Track>,
    original: Vec<Track>,
    previous: Vec<Track>,
    shuffle: bool,
    repeat: RepeatMode,
    radio_token: Option<String>,
    position: Duration,
    duration: Duration,
    is_playing: bool,
    state: PlaybackState,
    generation: u64,
    rng: fastrand::Rng,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Creates a session with a deterministic shuffle order.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            current: None,
            pending: Vec::new(),
            original: Vec::new(),
            previous: Vec::new(),
            shuffle: false,
            repeat: RepeatMode::Off,
            radio_token: None,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            is_playing: false,
            state: PlaybackState::Idle,
            generation: 0,
            rng,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn pending(&self) -> &[Track] {
        &self.pending
    }

    #[must_use]
    pub fn original(&self) -> &[Track] {
        &self.original
    }

    #[must_use]
    pub fn previous(&self) -> &[Track] {
        &self.previous
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    #[must_use]
    pub fn radio_token(&self) -> Option<&str> {
        self.radio_token.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Increases every time a new track starts. Asynchronous work captures
    /// it and is discarded when it no longer matches.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
    }

    /// Marks playback as started or stopped at the transport.
    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        if self.current.is_some() && self.state != PlaybackState::Loading {
            self.state = if playing {
                PlaybackState::Playing
            } else {
                PlaybackState::Paused
            };
        }
    }

    pub fn apply_status(&mut self, status: Status) {
        self.position = status.position;
        self.duration = status.duration;
        self.set_playing(status.playing);
    }

    /// Makes `track` the current track after its source was loaded. The
    /// track it replaces goes onto the back-stack. Returns the new
    /// generation.
    pub fn begin_track(&mut self, track: Track) -> u64 {
        if let Some(current) = self.current.replace(track) {
            if !self.is_current(&current.id) {
                self.previous.push(current);
            }
        }
        self.take_current_from_pending();
        self.started()
    }

    /// Removes the first queued copy of the current track.
    fn take_current_from_pending(&mut self) {
        let Some(id) = self.current.as_ref().map(|track| track.id.clone()) else {
            return;
        };
        if let Some(index) = self.pending.iter().position(|track| track.id == id) {
            self.pending.remove(index);
        }
    }

    /// Resets the transport fields for a freshly started current track.
    fn started(&mut self) -> u64 {
        if let Some(current) = &self.current {
            self.duration = current.duration;
        }
        self.position = Duration::ZERO;
        self.is_playing = true;
        self.state = PlaybackState::Playing;
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Marks the current track as restarted from the beginning.
    pub fn restart(&mut self) {
        self.position = Duration::ZERO;
        self.is_playing = true;
        self.state = PlaybackState::Playing;
    }

    /// Marks a seek: the position moves and playback resumes.
    pub fn seeked(&mut self, position: Duration) {
        self.position = position;
        self.set_playing(true);
    }

    /// Replaces the queue with an explicit one. The radio feed is cleared.
    pub fn set_queue(&mut self, queue: Vec<Track>) {
        self.original = queue;
        self.radio_token = None;
        self.pending = self.ordered(&self.original.clone());
    }

    /// Empties the queue ahead of a radio fetch.
    pub fn clear_queue(&mut self) {
        self.original.clear();
        self.pending.clear();
        self.radio_token = None;
    }

    /// Applies the first page of a radio feed started at `generation`.
    /// Returns `false` when a different track has started since, in which
    /// case nothing changes.
    ///
    /// Tracks enqueued while the page was on its way stay in front of it.
    pub fn apply_radio(&mut self, generation: u64, page: RadioPage) -> bool {
        if generation != self.generation {
            return false;
        }

        self.append_radio(page);
        true
    }

    /// Whether the next radio page should be fetched before skipping.
    #[must_use]
    pub fn needs_radio_refill(&self) -> bool {
        self.pending.len() <= RADIO_REFILL_THRESHOLD
            && self.radio_token.is_some()
            && self.current.is_some()
    }

    /// Appends a continuation page to both queues.
    pub fn append_radio(&mut self, page: RadioPage) {
        let current = self.current.as_ref().map(|track| track.id.clone());
        let tracks: Vec<Track> = page
            .tracks
            .into_iter()
            .filter(|track| Some(&track.id) != current.as_ref())
            .collect();

        self.original.extend(tracks.iter().cloned());
        let tracks = self.ordered(&tracks);
        self.pending.extend(tracks);
        self.radio_token = page.continuation_token;
    }

    /// Inserts `track` at the head of the pending queue.
    pub fn enqueue_next(&mut self, track: Track) -> Result<()> {
        self.check_not_current(&track)?;
        self.original.insert(0, track.clone());
        self.pending.insert(0, track);
        Ok(())
    }

    /// Appends `track` at the tail of the pending queue.
    pub fn enqueue_last(&mut self, track: Track) -> Result<()> {
        self.check_not_current(&track)?;
        self.original.push(track.clone());
        self.pending.push(track);
        Ok(())
    }

    fn check_not_current(&self, track: &Track) -> Result<()> {
        if self.is_current(&track.id) {
            return Err(Error::invalid_argument(format!(
                "{track} is already playing"
            )));
        }
        Ok(())
    }

    fn is_current(&self, track_id: &TrackId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| &current.id == track_id)
    }

    /// Flips shuffle and returns the new setting.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        if self.shuffle {
            self.rng.shuffle(&mut self.pending);
        } else {
            self.pending = self.unshuffled();
        }
        self.shuffle
    }

    /// The pending tracks in their original order.
    fn unshuffled(&self) -> Vec<Track> {
        let mut remaining: HashMap<&TrackId, usize> = HashMap::new();
        for track in &self.pending {
            *remaining.entry(&track.id).or_default() += 1;
        }

        let mut restored = Vec::with_capacity(self.pending.len());
        for track in &self.original {
            if let Some(count) = remaining.get_mut(&track.id) {
                if *count > 0 {
                    *count -= 1;
                    restored.push(track.clone());
                }
            }
        }

        // Tracks not in the original queue keep their relative order.
        for track in &self.pending {
            if let Some(count) = remaining.get_mut(&track.id) {
                if *count > 0 {
                    *count -= 1;
                    restored.push(track.clone());
                }
            }
        }

        restored
    }

    /// Cycles the repeat mode and returns the new one.
    pub fn toggle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.next();
        self.repeat
    }

    /// Decides what a skip to the next track does. Does not change the
    /// queues; commit with [`commit_next`](Self::commit_next) or
    /// [`commit_wrap`](Self::commit_wrap) once the track is loaded.
    pub fn plan_next(&mut self) -> Step {
        if self.repeat == RepeatMode::One && self.current.is_some() {
            return Step::Replay;
        }

        if let Some(head) = self.pending.first() {
            return Step::Next(head.clone());
        }

        if self.repeat == RepeatMode::All && !self.original.is_empty() {
            // The whole queue comes around again, current track included.
            let mut queue = self.original.clone();
            if self.shuffle {
                self.rng.shuffle(&mut queue);
            }
            return Step::Wrap(queue);
        }

        Step::Stop
    }

    /// Moves the head of the pending queue into the current slot. Returns
    /// the new generation.
    pub fn commit_next(&mut self) -> u64 {
        if self.pending.is_empty() {
            return self.generation;
        }

        let head = self.pending.remove(0);
        if let Some(current) = self.current.replace(head) {
            self.previous.push(current);
        }
        self.started()
    }

    /// Replaces the pending queue with `queue` and moves its head into the
    /// current slot. Returns the new generation.
    pub fn commit_wrap(&mut self, queue: Vec<Track>) -> u64 {
        self.pending = queue;
        self.commit_next()
    }

    /// Drops the head of the pending queue, which could not be played.
    pub fn discard_head(&mut self) -> Option<Track> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    /// The track a skip to the previous track would play.
    #[must_use]
    pub fn plan_previous(&self) -> Option<Track> {
        self.previous.last().cloned()
    }

    /// Pops the back-stack into the current slot and puts the current track
    /// back at the head of the pending queue.
    pub fn commit_previous(&mut self) -> u64 {
        let Some(previous) = self.previous.pop() else {
            return self.generation;
        };

        let replaced = self.current.replace(previous);
        self.take_current_from_pending();
        let generation = self.started();
        if let Some(current) = replaced {
            self.pending.insert(0, current);
        }
        generation
    }

    /// Stops at the end of the queue.
    pub fn stop(&mut self) {
        self.is_playing = false;
        if self.current.is_some() {
            self.state = PlaybackState::Paused;
        }
    }

    /// `tracks` in play order: shuffled when shuffle is on, without the first
    /// copy of the current track.
    fn ordered(&mut self, tracks: &[Track]) -> Vec<Track> {
        let mut ordered = tracks.to_vec();
        if let Some(index) = ordered.iter().position(|track| self.is_current(&track.id)) {
            ordered.remove(index);
        }
        if self.shuffle {
            self.rng.shuffle(&mut ordered);
        }
        ordered
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current: self.current.clone(),
            pending: self.pending.clone(),
            previous: self.previous.clone(),
            shuffle: self.shuffle,
            repeat: self.repeat,
            state: self.state,
            position: self.position,
            duration: self.duration,
            is_playing: self.is_playing,
            has_radio: self.radio_token.is_some(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), Duration::from_secs(200))
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.id.as_str()).collect()
    }

    fn playing(id: &str) -> SessionState {
        let mut session = SessionState::with_seed(7);
        session.begin_track(track(id));
        session
    }

    #[test]
    fn enqueue_next_is_lifo_and_enqueue_last_is_fifo() {
        let mut session = playing("x");
        session.enqueue_next(track("a")).unwrap();
        session.enqueue_next(track("b")).unwrap();
        session.enqueue_last(track("c")).unwrap();
        session.enqueue_last(track("d")).unwrap();
        session.enqueue_next(track("e")).unwrap();

        assert_eq!(ids(session.pending()), ["e", "b", "a", "c", "d"]);
    }

    #[test]
    fn current_track_cannot_be_enqueued() {
        let mut session = playing("x");
        let err = session.enqueue_last(track("x")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        assert!(session.pending().is_empty());
    }

    #[test]
    fn explicit_queue_excludes_current() {
        let mut session = playing("b");
        session.set_queue(vec![track("a"), track("b"), track("c")]);

        assert_eq!(ids(session.original()), ["a", "b", "c"]);
        assert_eq!(ids(session.pending()), ["a", "c"]);
        assert!(session.radio_token().is_none());
    }

    #[test]
    fn repeated_tracks_in_explicit_queue_are_kept() {
        let mut session = playing("a");
        session.set_queue(vec![track("a"), track("b"), track("a"), track("c")]);
        assert_eq!(ids(session.pending()), ["b", "a", "c"]);

        session.commit_next();
        session.commit_next();
        assert_eq!(session.current().unwrap().id.as_str(), "a");
        assert_eq!(ids(session.pending()), ["c"]);
        assert_eq!(ids(session.previous()), ["a", "b"]);
    }

    #[test]
    fn next_takes_one_copy_of_a_repeated_head() {
        let mut session = playing("x");
        session.set_queue(vec![track("b"), track("b")]);

        session.commit_next();
        assert_eq!(session.current().unwrap().id.as_str(), "b");
        assert_eq!(ids(session.pending()), ["b"]);
    }

    #[test]
    fn shuffle_twice_restores_pending_contents() {
        let mut session = playing("x");
        session.set_queue((0..20).map(|i| track(&i.to_string())).collect());
        let before: HashSet<_> = ids(session.pending()).into_iter().map(String::from).collect();

        assert!(session.toggle_shuffle());
        assert!(!session.toggle_shuffle());

        let after: HashSet<_> = ids(session.pending()).into_iter().map(String::from).collect();
        assert_eq!(before, after);
        assert_eq!(ids(session.pending()), ids(session.original()));
    }

    #[test]
    fn shuffle_off_does_not_reintroduce_consumed_tracks() {
        let mut session = playing("x");
        session.set_queue(vec![track("a"), track("b"), track("c"), track("d")]);
        session.toggle_shuffle();

        let Step::Next(head) = session.plan_next() else {
            panic!("expected a next track");
        };
        session.commit_next();
        assert_eq!(session.current(), Some(&head));

        session.toggle_shuffle();
        let expected: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .filter(|id| *id != head.id.as_str())
            .collect();
        assert_eq!(ids(session.pending()), expected);
    }

    #[test]
    fn repeat_cycles() {
        let mut session = SessionState::new();
        assert_eq!(session.toggle_repeat(), RepeatMode::All);
        assert_eq!(session.toggle_repeat(), RepeatMode::One);
        assert_eq!(session.toggle_repeat(), RepeatMode::Off);
    }

    #[test]
    fn repeat_one_replays() {
        let mut session = playing("x");
        session.set_queue(vec![track("a")]);
        session.toggle_repeat();
        session.toggle_repeat();

        assert_eq!(session.plan_next(), Step::Replay);
        assert_eq!(ids(session.pending()), ["a"]);
        assert!(session.previous().is_empty());
    }

    #[test]
    fn next_pushes_back_stack() {
        let mut session = playing("x");
        session.set_queue(vec![track("a"), track("b")]);

        assert_eq!(session.plan_next(), Step::Next(track("a")));
        session.commit_next();

        assert_eq!(session.current().unwrap().id.as_str(), "a");
        assert_eq!(ids(session.previous()), ["x"]);
        assert_eq!(ids(session.pending()), ["b"]);
    }

    #[test]
    fn repeat_all_wraps_from_original() {
        let mut session = playing("a");
        session.set_queue(vec![track("a"), track("b")]);
        session.toggle_repeat();

        session.commit_next();
        assert_eq!(session.current().unwrap().id.as_str(), "b");

        let Step::Wrap(queue) = session.plan_next() else {
            panic!("expected a wrap");
        };
        assert_eq!(ids(&queue), ["a", "b"]);

        let generation = session.generation();
        assert!(session.commit_wrap(queue) > generation);
        assert_eq!(session.current().unwrap().id.as_str(), "a");
        assert_eq!(ids(session.pending()), ["b"]);
        assert_eq!(ids(session.previous()), ["a", "b"]);
    }

    #[test]
    fn playing_another_track_pushes_back_stack() {
        let mut session = playing("x");
        session.set_queue(vec![track("a"), track("b")]);
        session.begin_track(track("b"));

        assert_eq!(ids(session.previous()), ["x"]);
        assert_eq!(ids(session.pending()), ["a"]);

        session.begin_track(track("b"));
        assert_eq!(ids(session.previous()), ["x"]);
    }

    #[test]
    fn empty_queue_stops() {
        let mut session = playing("x");
        assert_eq!(session.plan_next(), Step::Stop);

        session.stop();
        assert!(!session.is_playing());
        assert_eq!(session.current().unwrap().id.as_str(), "x");
    }

    #[test]
    fn previous_puts_current_back_in_front() {
        let mut session = playing("x");
        session.set_queue(vec![track("a"), track("b")]);
        session.commit_next();

        assert_eq!(session.plan_previous(), Some(track("x")));
        session.commit_previous();

        assert_eq!(session.current().unwrap().id.as_str(), "x");
        assert_eq!(ids(session.pending()), ["a", "b"]);
        assert!(session.previous().is_empty());
    }

    #[test]
    fn stale_radio_is_discarded() {
        let mut session = playing("x");
        let generation = session.generation();
        session.begin_track(track("y"));

        let page = RadioPage {
            tracks: vec![track("a")],
            continuation_token: Some("next".to_owned()),
        };
        assert!(!session.apply_radio(generation, page));
        assert!(session.pending().is_empty());
        assert!(session.radio_token().is_none());
    }

    #[test]
    fn radio_filters_seed_and_refills() {
        let mut session = playing("x");
        let page = RadioPage {
            tracks: vec![track("x"), track("a"), track("b")],
            continuation_token: Some("page-2".to_owned()),
        };
        assert!(session.apply_radio(session.generation(), page));
        assert_eq!(ids(session.pending()), ["a", "b"]);
        assert!(session.needs_radio_refill());

        session.append_radio(RadioPage {
            tracks: vec![track("c")],
            continuation_token: None,
        });
        assert_eq!(ids(session.pending()), ["a", "b", "c"]);
        assert_eq!(ids(session.original()), ["a", "b", "c"]);
        assert!(!session.needs_radio_refill());
    }

    #[test]
    fn radio_page_keeps_tracks_enqueued_meanwhile() {
        let mut session = playing("x");
        session.clear_queue();
        let generation = session.generation();
        session.enqueue_next(track("mine")).unwrap();

        let page = RadioPage {
            tracks: vec![track("x"), track("r1"), track("r2")],
            continuation_token: Some("page-2".to_owned()),
        };
        assert!(session.apply_radio(generation, page));
        assert_eq!(ids(session.pending()), ["mine", "r1", "r2"]);
        assert_eq!(ids(session.original()), ["mine", "r1", "r2"]);
        assert_eq!(session.radio_token(), Some("page-2"));
    }

    #[test]
    fn full_queue_does_not_refill() {
        let mut session = playing("x");
        let page = RadioPage {
            tracks: (0..6).map(|i| track(&i.to_string())).collect(),
            continuation_token: Some("page-2".to_owned()),
        };
        session.apply_radio(session.generation(), page);
        assert!(!session.needs_radio_refill());
    }
}
