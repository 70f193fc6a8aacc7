//! Headless streaming playback queue with listening statistics.
//!
//! The crate drives one playback session against a remote catalog:
//! * [`controller`]: the session actor, with shuffle, repeat, back-stack
//!   navigation and radio continuation
//! * [`engine`]: the adapter over the native audio transport
//! * [`library`]: liked songs, playlists and downloads, synchronized with
//!   the catalog local-first
//! * [`history`] and [`stats`]: the play log and what it adds up to
//! * [`genre`]: classification of played tracks
//!
//! The catalog service, audio transport and key-value store are
//! collaborators behind the [`catalog::Catalog`], [`engine::Transport`] and
//! [`store::KeyValueStore`] traits.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod catalog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod genre;
pub mod history;
pub mod http;
pub mod library;
pub mod playlist;
pub mod session;
pub mod stats;
pub mod store;
pub mod track;
pub mod util;
