//! The session controller: a single actor that owns the session.
//!
//! All playback operations are sent as commands to one task. Track changes
//! (`play_track`, `skip_next`, `skip_previous` and auto-advance) run one at
//! a time: while one waits for the catalog, the ones requested after it wait
//! their turn, so queue mutations never interleave. Pause, resume, seek,
//! enqueues and toggles apply right away, track change in flight or not.
//!
//! The actor itself never waits on the network. Stream resolution and radio
//! pages are fetched in their own tasks and report back as completions.
//! Completions of a track change carry its ticket. The first radio page of a
//! new track carries that track's generation and is dropped when another
//! track has started since. A track change whose queue head was edited while
//! its source resolved plans again.
//!
//! The actor also polls the playback engine. Status changes worth showing are
//! published as [`Snapshot`]s; a finished track triggers exactly one
//! [`skip_next`](Handle::skip_next).
//!
//! # Example
//!
//! ```rust
//! let (handle, task) = Controller::new(&config, transport, catalog, library, history).spawn();
//!
//! handle.play_track(track, None, true).await?;
//! handle.toggle_shuffle().await?;
//! handle.skip_next().await?;
//! ```

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    catalog::{Catalog, RadioPage},
    config::Config,
    engine::{PlaybackEngine, Source, Transport},
    error::{Error, ErrorKind, Result},
    events::Event,
    history::HistoryStore,
    library::Library,
    session::{PlaybackState, RepeatMode, SessionState, Snapshot, Step},
    track::{Track, TrackId},
    util,
};

/// Position after which "previous" restarts the current track instead.
pub const RESTART_THRESHOLD: Duration = Duration::from_secs(3);

/// Commands that can be queued before the actor applies back-pressure.
const COMMAND_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Play {
        track: Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
        reply: Reply<()>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Seek(Duration, Reply<()>),
    EnqueueNext(Track, Reply<()>),
    EnqueueLast(Track, Reply<()>),
    SkipNext(Reply<()>),
    SkipPrevious(Reply<()>),
    ToggleShuffle(Reply<bool>),
    ToggleRepeat(Reply<RepeatMode>),
}

/// A request to change the current track.
enum Request {
    Play {
        track: Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
        reply: Reply<()>,
    },
    /// Without a reply when the track finished on its own.
    SkipNext(Option<Reply<()>>),
    SkipPrevious(Reply<()>),
}

/// What a track change in flight continues with once the catalog answers.
enum Stage {
    Play {
        track: Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
        restore: PlaybackState,
        reply: Reply<()>,
    },
    Refill(Option<Reply<()>>),
    Next {
        track: Track,
        reply: Option<Reply<()>>,
    },
    Wrap {
        queue: Vec<Track>,
        reply: Option<Reply<()>>,
    },
    Previous {
        track: Track,
        reply: Reply<()>,
    },
}

struct Transition {
    ticket: u64,
    stage: Stage,
}

enum Completion {
    /// First page of a radio feed, for the track of `generation`.
    Radio {
        generation: u64,
        result: Result<RadioPage>,
    },
    /// Continuation page fetched by a skip.
    Refill {
        ticket: u64,
        result: Result<RadioPage>,
    },
    Source {
        ticket: u64,
        result: Result<Source>,
    },
}

pub struct Controller {
    session: SessionState,
    engine: PlaybackEngine,
    catalog: Arc<dyn Catalog>,
    library: Arc<Library>,
    history: Arc<HistoryStore>,
    fetch_timeout: Duration,
    poll_interval: Duration,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl Controller {
    #[must_use]
    pub fn new(
        config: &Config,
        transport: Box<dyn Transport>,
        catalog: Arc<dyn Catalog>,
        library: Arc<Library>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            session: SessionState::new(),
            engine: PlaybackEngine::new(transport),
            catalog,
            library,
            history,
            fetch_timeout: config.fetch_timeout,
            poll_interval: config.status_poll_interval,
            event_tx: None,
        }
    }

    /// Sends playback events to `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Starts from `session` instead of an empty one, for example to fix
    /// the shuffle order.
    #[must_use]
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = session;
        self
    }

    /// Spawns the actor. It runs until every [`Handle`] is dropped.
    pub fn spawn(self) -> (Handle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.session.snapshot());

        let handle = Handle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        let task = tokio::spawn(self.run(command_rx, snapshot_tx));

        (handle, task)
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>, snapshots: watch::Sender<Snapshot>) {
        let (completion_tx, mut completions) = mpsc::unbounded_channel();
        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut actor = Actor {
            controller: self,
            snapshots,
            completion_tx,
            transition: None,
            waiting: VecDeque::new(),
            tickets: 0,
        };

        let mut poll = tokio::time::interval(period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    actor.handle(command);
                }

                Some(completion) = completions.recv() => {
                    actor.complete(completion);
                }

                _ = poll.tick() => {
                    actor.poll();
                }
            }
        }

        debug!("session controller stopped");
    }
}

/// The running actor: the controller plus its channels.
struct Actor {
    controller: Controller,
    snapshots: watch::Sender<Snapshot>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    /// The track change waiting for the catalog, if any.
    transition: Option<Transition>,
    /// Track changes requested while another one was in flight.
    waiting: VecDeque<Request>,
    tickets: u64,
}

impl Actor {
    fn handle(&mut self, command: Command) {
        // A caller that stopped waiting does not care about the outcome.
        match command {
            Command::Play {
                track,
                queue,
                auto_radio,
                reply,
            } => self.request(Request::Play {
                track,
                queue,
                auto_radio,
                reply,
            }),
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            Command::Seek(position, reply) => {
                let _ = reply.send(self.seek(position));
            }
            Command::EnqueueNext(track, reply) => {
                let result = self.controller.session.enqueue_next(track);
                let _ = reply.send(self.queue_changed(result));
            }
            Command::EnqueueLast(track, reply) => {
                let result = self.controller.session.enqueue_last(track);
                let _ = reply.send(self.queue_changed(result));
            }
            Command::SkipNext(reply) => self.request(Request::SkipNext(Some(reply))),
            Command::SkipPrevious(reply) => self.request(Request::SkipPrevious(reply)),
            Command::ToggleShuffle(reply) => {
                let shuffle = self.controller.session.toggle_shuffle();
                debug!("shuffle {}", if shuffle { "on" } else { "off" });
                let _ = reply.send(self.queue_changed(Ok(shuffle)));
            }
            Command::ToggleRepeat(reply) => {
                let repeat = self.controller.session.toggle_repeat();
                debug!("repeat {repeat}");
                self.publish();
                let _ = reply.send(Ok(repeat));
            }
        }
    }

    /// Starts `request`, or queues it behind the track change in flight.
    fn request(&mut self, request: Request) {
        if self.transition.is_some() {
            self.waiting.push_back(request);
            return;
        }
        self.begin(request);
    }

    fn begin(&mut self, request: Request) {
        match request {
            Request::Play {
                track,
                queue,
                auto_radio,
                reply,
            } => self.begin_play(track, queue, auto_radio, reply),
            Request::SkipNext(reply) => self.begin_skip_next(reply),
            Request::SkipPrevious(reply) => self.begin_skip_previous(reply),
        }
    }

    /// Starts queued track changes until one has to wait for the catalog.
    fn resume_waiting(&mut self) {
        while self.transition.is_none() {
            let Some(request) = self.waiting.pop_front() else {
                break;
            };
            self.begin(request);
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Radio { generation, result } => self.radio_arrived(generation, result),
            Completion::Refill { ticket, result } => {
                if let Some(Stage::Refill(reply)) = self.take_stage(ticket) {
                    self.refill_arrived(result);
                    self.advance(reply);
                }
            }
            Completion::Source { ticket, result } => {
                if let Some(stage) = self.take_stage(ticket) {
                    self.source_resolved(stage, result);
                }
            }
        }

        self.resume_waiting();
    }

    fn take_stage(&mut self, ticket: u64) -> Option<Stage> {
        if self
            .transition
            .as_ref()
            .is_some_and(|transition| transition.ticket == ticket)
        {
            return self.transition.take().map(|transition| transition.stage);
        }

        debug!("discarding completion of an earlier track change");
        None
    }

    fn poll(&mut self) {
        let Some(observation) = self.controller.engine.observe(Instant::now()) else {
            return;
        };

        if self.controller.session.current().is_none() {
            return;
        }

        if observation.dirty {
            self.controller.session.apply_status(observation.status);
            self.publish();
        }

        if observation.finished {
            debug!("track finished");
            if self.transition.is_some() {
                debug!("track change already in progress");
            } else {
                self.begin(Request::SkipNext(None));
            }
        }
    }

    fn begin_play(
        &mut self,
        track: Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
        reply: Reply<()>,
    ) {
        let restore = self.controller.session.state();
        self.controller.session.set_state(PlaybackState::Loading);
        self.publish();

        self.resolve(
            track.clone(),
            Stage::Play {
                track,
                queue,
                auto_radio,
                restore,
                reply,
            },
        );
    }

    fn play_resolved(
        &mut self,
        track: &Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
        restore: PlaybackState,
        source: Result<Source>,
    ) -> Result<()> {
        if let Err(e) = source.and_then(|source| self.load(track, &source)) {
            self.controller.session.set_state(restore);
            self.publish();
            return Err(e);
        }

        let session = &mut self.controller.session;
        let generation = session.begin_track(track.clone());
        match queue {
            Some(queue) => session.set_queue(queue),
            None if auto_radio => {
                session.clear_queue();
                self.fetch_radio(generation, track.id.clone());
            }
            None => {}
        }

        self.started(track);
        self.emit(Event::QueueChanged);
        Ok(())
    }

    fn begin_skip_next(&mut self, reply: Option<Reply<()>>) {
        let session = &self.controller.session;
        let replay = session.repeat() == RepeatMode::One && session.current().is_some();
        let refill = (!replay && session.needs_radio_refill())
            .then(|| {
                let seed = session.current().map(|current| current.id.clone());
                seed.zip(session.radio_token().map(str::to_owned))
            })
            .flatten();
        if let Some((seed, token)) = refill {
            self.refill_radio(seed, token, reply);
            return;
        }

        self.advance(reply);
    }

    /// Moves on to whatever the queue says comes next.
    fn advance(&mut self, reply: Option<Reply<()>>) {
        match self.controller.session.plan_next() {
            Step::Replay => {
                let result = self.replay();
                Self::respond(reply, result);
            }
            Step::Next(track) => self.resolve(track.clone(), Stage::Next { track, reply }),
            Step::Wrap(queue) => match queue.first().cloned() {
                Some(head) => self.resolve(head, Stage::Wrap { queue, reply }),
                None => Self::respond(reply, Ok(())),
            },
            Step::Stop => {
                let result = self.stop();
                Self::respond(reply, result);
            }
        }
    }

    fn next_resolved(&mut self, track: &Track, reply: Option<Reply<()>>, source: Result<Source>) {
        // Enqueues and shuffles may have changed the head in the meantime.
        let head = self.controller.session.pending().first();
        if head.map(|head| &head.id) != Some(&track.id) {
            debug!("queue changed while resolving {track}");
            self.advance(reply);
            return;
        }

        match source.and_then(|source| self.load(track, &source)) {
            Ok(()) => {
                self.controller.session.commit_next();
                self.started(track);
                Self::respond(reply, Ok(()));
            }
            Err(e) if e.kind == ErrorKind::NoStreamAvailable => {
                warn!("skipping {track}: {e}");
                self.controller.session.discard_head();
                self.emit(Event::QueueChanged);
                self.advance(reply);
            }
            Err(e) => Self::respond(reply, Err(e)),
        }
    }

    fn wrap_resolved(&mut self, queue: Vec<Track>, reply: Option<Reply<()>>, source: Result<Source>) {
        if !self.controller.session.pending().is_empty() {
            debug!("queue changed while wrapping around");
            self.advance(reply);
            return;
        }

        let Some(head) = queue.first().cloned() else {
            Self::respond(reply, Ok(()));
            return;
        };

        match source.and_then(|source| self.load(&head, &source)) {
            Ok(()) => {
                self.controller.session.commit_wrap(queue);
                self.started(&head);
                self.emit(Event::QueueChanged);
                Self::respond(reply, Ok(()));
            }
            Err(e) => Self::respond(reply, Err(e)),
        }
    }

    fn begin_skip_previous(&mut self, reply: Reply<()>) {
        if self.controller.session.current().is_none() {
            let _ = reply.send(Err(Error::not_found("nothing is playing")));
            return;
        }

        let position = self.controller.engine.status().position;
        if position <= RESTART_THRESHOLD {
            if let Some(previous) = self.controller.session.plan_previous() {
                self.resolve(
                    previous.clone(),
                    Stage::Previous {
                        track: previous,
                        reply,
                    },
                );
                return;
            }
        }

        let _ = reply.send(self.restart());
    }

    fn previous_resolved(&mut self, track: &Track, source: Result<Source>) -> Result<()> {
        source.and_then(|source| self.load(track, &source))?;
        self.controller.session.commit_previous();
        self.started(track);
        self.emit(Event::QueueChanged);
        Ok(())
    }

    fn source_resolved(&mut self, stage: Stage, source: Result<Source>) {
        match stage {
            Stage::Play {
                track,
                queue,
                auto_radio,
                restore,
                reply,
            } => {
                let result = self.play_resolved(&track, queue, auto_radio, restore, source);
                let _ = reply.send(result);
            }
            Stage::Next { track, reply } => self.next_resolved(&track, reply, source),
            Stage::Wrap { queue, reply } => self.wrap_resolved(queue, reply, source),
            Stage::Previous { track, reply } => {
                let result = self.previous_resolved(&track, source);
                let _ = reply.send(result);
            }
            Stage::Refill(reply) => self.advance(reply),
        }
    }

    fn respond(reply: Option<Reply<()>>, result: Result<()>) {
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!("auto-advance failed: {e}");
                }
            }
        }
    }

    fn replay(&mut self) -> Result<()> {
        self.controller.engine.restart()?;
        self.controller.session.restart();
        if let Some(track) = self.controller.session.current().cloned() {
            self.record_play(&track);
        }
        self.emit(Event::Play);
        self.publish();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("end of queue");
        self.controller.engine.pause()?;
        self.controller.session.stop();
        self.emit(Event::Stopped);
        self.publish();
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.controller.engine.restart()?;
        self.controller.session.restart();
        self.emit(Event::Play);
        self.publish();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.require_current()?;
        self.controller.engine.pause()?;
        self.controller.session.set_playing(false);
        self.emit(Event::Pause);
        self.publish();
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.require_current()?;
        self.controller.engine.play()?;
        self.controller.session.set_playing(true);
        self.emit(Event::Play);
        self.publish();
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.require_current()?;
        self.controller.engine.seek_to(position)?;
        self.controller.engine.play()?;
        self.controller.session.seeked(position);
        self.emit(Event::Play);
        self.publish();
        Ok(())
    }

    fn require_current(&self) -> Result<()> {
        if self.controller.session.current().is_none() {
            return Err(Error::not_found("nothing is playing"));
        }
        Ok(())
    }

    fn next_ticket(&mut self) -> u64 {
        self.tickets = self.tickets.wrapping_add(1);
        self.tickets
    }

    /// Resolves a source for `track` in its own task. `stage` picks up once
    /// it arrives.
    fn resolve(&mut self, track: Track, stage: Stage) {
        let ticket = self.next_ticket();
        let library = Arc::clone(&self.controller.library);
        let catalog = Arc::clone(&self.controller.catalog);
        let timeout = self.controller.fetch_timeout;
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = resolve_source(&library, catalog.as_ref(), timeout, &track).await;
            let _ = tx.send(Completion::Source { ticket, result });
        });

        self.transition = Some(Transition { ticket, stage });
    }

    /// Hands a resolved source to the engine. Leaves the session alone.
    fn load(&mut self, track: &Track, source: &Source) -> Result<()> {
        info!("playing {track}");
        self.controller.engine.load(source)
    }

    /// Bookkeeping after a new current track started.
    fn started(&mut self, track: &Track) {
        self.record_play(track);
        self.emit(Event::TrackChanged);
        self.emit(Event::Play);
        self.publish();
    }

    fn record_play(&self, track: &Track) {
        let history = Arc::clone(&self.controller.history);
        let track = track.clone();
        tokio::spawn(async move {
            history.record_play(&track, track.duration).await;
        });
    }

    fn fetch_radio(&self, generation: u64, seed: TrackId) {
        let catalog = Arc::clone(&self.controller.catalog);
        let timeout = self.controller.fetch_timeout;
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = util::timeout(timeout, catalog.radio(&seed, None)).await;
            let _ = tx.send(Completion::Radio { generation, result });
        });
    }

    fn radio_arrived(&mut self, generation: u64, result: Result<RadioPage>) {
        if generation != self.controller.session.generation() {
            debug!("discarding radio page for an earlier track");
            return;
        }

        match result {
            Ok(page) => {
                let count = page.tracks.len();
                if self.controller.session.apply_radio(generation, page) {
                    debug!("radio queued {count} tracks");
                    self.emit(Event::QueueChanged);
                    self.publish();
                }
            }
            Err(e) => warn!("radio unavailable: {e}"),
        }
    }

    /// Fetches the next radio page in its own task, then advances.
    fn refill_radio(&mut self, seed: TrackId, token: String, reply: Option<Reply<()>>) {
        let ticket = self.next_ticket();
        let catalog = Arc::clone(&self.controller.catalog);
        let timeout = self.controller.fetch_timeout;
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = util::timeout(timeout, catalog.radio(&seed, Some(&token))).await;
            let _ = tx.send(Completion::Refill { ticket, result });
        });

        self.transition = Some(Transition {
            ticket,
            stage: Stage::Refill(reply),
        });
    }

    /// Failures are logged and leave the queue as it was.
    fn refill_arrived(&mut self, result: Result<RadioPage>) {
        match result {
            Ok(page) => {
                debug!("radio continued with {} tracks", page.tracks.len());
                self.controller.session.append_radio(page);
                self.emit(Event::QueueChanged);
                self.publish();
            }
            Err(e) => warn!("radio continuation failed: {e}"),
        }
    }

    fn queue_changed<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.emit(Event::QueueChanged);
            self.publish();
        }
        result
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.controller.event_tx {
            if tx.send(event).is_err() {
                trace!("event listener is gone");
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.controller.session.snapshot());
    }
}

/// A downloaded file that still exists, or else a fresh stream locator.
async fn resolve_source(
    library: &Library,
    catalog: &dyn Catalog,
    fetch_timeout: Duration,
    track: &Track,
) -> Result<Source> {
    if let Some(path) = library.download_path(&track.id).await {
        return Ok(Source::Local(path));
    }

    match util::timeout(fetch_timeout, catalog.resolve_stream(&track.id)).await {
        Ok(Some(url)) => Ok(Source::Remote(url)),
        Ok(None) => Err(Error::no_stream_available(format!(
            "{track} has no stream"
        ))),
        Err(e) => Err(Error::no_stream_available(format!(
            "{track} could not be resolved: {e}"
        ))),
    }
}

/// Cheap, cloneable access to a running [`Controller`].
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl Handle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::cancelled("session controller stopped"))?;
        rx.await
            .map_err(|_| Error::cancelled("session controller dropped the request"))?
    }

    /// Plays `track`. With an explicit `queue`, that queue follows it;
    /// otherwise, with `auto_radio`, a radio feed seeded by the track fills
    /// the queue in the background.
    ///
    /// # Errors
    ///
    /// Returns [`NoStreamAvailable`](ErrorKind::NoStreamAvailable) when no
    /// source resolves. The session is left as it was.
    pub async fn play_track(
        &self,
        track: Track,
        queue: Option<Vec<Track>>,
        auto_radio: bool,
    ) -> Result<()> {
        self.request(|reply| Command::Play {
            track,
            queue,
            auto_radio,
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    /// Seeks within the current track and resumes playback.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.request(|reply| Command::Seek(position, reply)).await
    }

    /// Plays `track` right after the current one.
    pub async fn enqueue_next(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::EnqueueNext(track, reply)).await
    }

    /// Plays `track` after everything already queued.
    pub async fn enqueue_last(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::EnqueueLast(track, reply)).await
    }

    pub async fn skip_next(&self) -> Result<()> {
        self.request(Command::SkipNext).await
    }

    /// Restarts the current track, or goes back one track when less than
    /// [`RESTART_THRESHOLD`] has played.
    pub async fn skip_previous(&self) -> Result<()> {
        self.request(Command::SkipPrevious).await
    }

    /// Returns whether shuffle is now on.
    pub async fn toggle_shuffle(&self) -> Result<bool> {
        self.request(Command::ToggleShuffle).await
    }

    /// Returns the new repeat mode.
    pub async fn toggle_repeat(&self) -> Result<RepeatMode> {
        self.request(Command::ToggleRepeat).await
    }

    /// The most recently published session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receives every published session snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }
}
