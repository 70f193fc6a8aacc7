//! Events emitted by the session controller.
//!
//! These events can be used to:
//! * Monitor playback state changes
//! * React to track changes
//! * Refresh queue views
//!
//! For the full session state, subscribe to snapshots with
//! [`Handle::subscribe`](crate::controller::Handle::subscribe) instead.
//!
//! # Example
//!
//! ```rust
//! use auraplay::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Play => println!("Playback started"),
//!         Event::TrackChanged => println!("New track playing"),
//!         Event::Stopped => println!("Reached the end of the queue"),
//!         // ... handle other events ...
//!     }
//! }
//! ```

/// Significant state changes of a playback session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Playback has started.
    ///
    /// Emitted when a track begins playing, either from a paused
    /// state or when starting a new track.
    Play,

    /// Playback has paused.
    Pause,

    /// Current track has changed.
    ///
    /// Emitted when switching to a different track, whether through
    /// manual selection, automatic progression or navigating back.
    TrackChanged,

    /// The pending queue has changed.
    ///
    /// Emitted on enqueues, shuffle changes and when a radio page arrives.
    QueueChanged,

    /// Playback reached the end of the queue and stopped.
    Stopped,
}
