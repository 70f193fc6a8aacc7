//! Contract of the remote catalog and streaming service.
//!
//! The catalog is an opaque collaborator: it resolves tracks to stream
//! locators, serves radio continuations and owns the remote copy of the
//! user's library. Every call may fail (timeout, authentication, not found).
//! Callers treat a failure as "no remote effect" and keep their local state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::Result,
    playlist::RemotePlaylist,
    track::{Artist, Track, TrackId},
};

/// Collection that holds the user's liked songs in [`Catalog::library`].
pub const LIKED_SONGS_COLLECTION: &str = "liked";

/// Collection that holds the user's playlists in [`Catalog::library`].
pub const PLAYLISTS_COLLECTION: &str = "playlists";

/// One page of a radio feed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioPage {
    /// Related tracks in the order the feed suggests them.
    pub tracks: Vec<Track>,

    /// Token to fetch the next page. `None` when the feed is exhausted.
    pub continuation_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LibraryItem {
    Track(Track),
    Playlist(RemotePlaylist),
    Artist(Artist),
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolves a track to a playable stream locator, if the catalog has one.
    async fn resolve_stream(&self, track_id: &TrackId) -> Result<Option<Url>>;

    /// Fetches the radio feed seeded by `seed`. Without a continuation token
    /// this starts a new feed; with one it fetches the next page.
    async fn radio(&self, seed: &TrackId, continuation_token: Option<&str>) -> Result<RadioPage>;

    /// The catalog's own genre classification for a track.
    async fn genre(&self, track_id: &TrackId) -> Result<Option<String>>;

    async fn library(&self, collection_id: &str) -> Result<Vec<LibraryItem>>;

    /// Sets the liked flag of a track. Returns whether the change was
    /// accepted.
    async fn like(&self, track_id: &TrackId, liked: bool) -> Result<bool>;

    /// Creates a playlist and returns its remote id.
    async fn create_playlist(&self, title: &str, track_ids: &[TrackId]) -> Result<String>;

    async fn add_to_playlist(&self, playlist_id: &str, track_ids: &[TrackId]) -> Result<bool>;

    async fn remove_from_playlist(&self, playlist_id: &str, track_ids: &[TrackId])
        -> Result<bool>;

    async fn edit_playlist(&self, playlist_id: &str, title: &str) -> Result<bool>;

    async fn delete_playlist(&self, playlist_id: &str) -> Result<bool>;

    async fn playlist(&self, playlist_id: &str) -> Result<Option<RemotePlaylist>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    };

    use super::*;
    use crate::error::Error;

    /// In-memory catalog that records the calls it receives.
    #[derive(Default)]
    pub(crate) struct FakeCatalog {
        pub streams: Mutex<HashMap<TrackId, Url>>,
        pub genres: Mutex<HashMap<TrackId, String>>,
        pub collections: Mutex<HashMap<String, Vec<LibraryItem>>>,
        pub reject_writes: AtomicBool,
        pub offline: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn call(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::fetch_error("offline"));
            }
            Ok(())
        }

        fn write(&self, call: String) -> Result<bool> {
            self.call(call)?;
            Ok(!self.reject_writes.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn resolve_stream(&self, track_id: &TrackId) -> Result<Option<Url>> {
            self.call(format!("resolve {track_id}"))?;
            Ok(self.streams.lock().unwrap().get(track_id).cloned())
        }

        async fn radio(&self, seed: &TrackId, _: Option<&str>) -> Result<RadioPage> {
            self.call(format!("radio {seed}"))?;
            Ok(RadioPage::default())
        }

        async fn genre(&self, track_id: &TrackId) -> Result<Option<String>> {
            self.call(format!("genre {track_id}"))?;
            Ok(self.genres.lock().unwrap().get(track_id).cloned())
        }

        async fn library(&self, collection_id: &str) -> Result<Vec<LibraryItem>> {
            self.call(format!("library {collection_id}"))?;
            Ok(self
                .collections
                .lock()
                .unwrap()
                .get(collection_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn like(&self, track_id: &TrackId, liked: bool) -> Result<bool> {
            self.write(format!("like {track_id} {liked}"))
        }

        async fn create_playlist(&self, title: &str, _: &[TrackId]) -> Result<String> {
            if self.write(format!("create {title}"))? {
                Ok(format!("PL-{title}"))
            } else {
                Err(Error::fetch_error("rejected"))
            }
        }

        async fn add_to_playlist(&self, playlist_id: &str, track_ids: &[TrackId]) -> Result<bool> {
            self.write(format!("add {playlist_id} {}", track_ids.len()))
        }

        async fn remove_from_playlist(
            &self,
            playlist_id: &str,
            track_ids: &[TrackId],
        ) -> Result<bool> {
            self.write(format!("remove {playlist_id} {}", track_ids.len()))
        }

        async fn edit_playlist(&self, playlist_id: &str, title: &str) -> Result<bool> {
            self.write(format!("edit {playlist_id} {title}"))
        }

        async fn delete_playlist(&self, playlist_id: &str) -> Result<bool> {
            self.write(format!("delete {playlist_id}"))
        }

        async fn playlist(&self, playlist_id: &str) -> Result<Option<RemotePlaylist>> {
            self.call(format!("playlist {playlist_id}"))?;
            Ok(None)
        }
    }
}
