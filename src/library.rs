//! The user's library: liked songs, playlists and downloaded tracks.
//!
//! Every mutation is local-first:
//! 1. the change is applied to the in-memory collections
//! 2. the affected document is persisted (fire-and-forget)
//! 3. if the target is remote-backed, the change is sent to the catalog
//!
//! When step 3 fails, only the delta applied in step 1 is inverted and
//! [`RemoteSyncFailure`](crate::error::ErrorKind::RemoteSyncFailure) is
//! returned. Concurrent mutations to other items are left alone.
//!
//! A periodic [`SyncTask`] pulls the remote copy of liked songs and
//! playlists while a credential is configured.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    catalog::{Catalog, LibraryItem, LIKED_SONGS_COLLECTION, PLAYLISTS_COLLECTION},
    config::{Config, Credential},
    error::{Error, Result},
    playlist::{LocalPlaylist, Playlist, PlaylistId, RemotePlaylist},
    store::{self, keys, KeyValueStore},
    track::{Track, TrackId},
    util,
};

#[derive(Debug, Default)]
struct Collections {
    liked: Vec<Track>,
    playlists: Vec<Playlist>,
    downloads: HashMap<TrackId, PathBuf>,
}

pub struct Library {
    store: Arc<dyn KeyValueStore>,
    catalog: Arc<dyn Catalog>,
    collections: Mutex<Collections>,
}

impl Library {
    /// Shortest interval between two scheduled syncs.
    pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

    /// Opens the library from the persisted documents. Unreadable documents
    /// are logged and treated as empty.
    pub async fn open(store: Arc<dyn KeyValueStore>, catalog: Arc<dyn Catalog>) -> Self {
        let liked = Self::load_or_default(store.as_ref(), keys::LIKED_SONGS).await;
        let playlists = Self::load_or_default(store.as_ref(), keys::PLAYLISTS).await;
        let downloads = Self::load_or_default(store.as_ref(), keys::DOWNLOADS).await;

        Self {
            store,
            catalog,
            collections: Mutex::new(Collections {
                liked,
                playlists,
                downloads,
            }),
        }
    }

    async fn load_or_default<T>(store: &dyn KeyValueStore, key: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match store::load(store, key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!("starting with empty {key}: {e}");
                T::default()
            }
        }
    }

    pub async fn liked_songs(&self) -> Vec<Track> {
        self.collections.lock().await.liked.clone()
    }

    pub async fn is_liked(&self, track_id: &TrackId) -> bool {
        self.collections
            .lock()
            .await
            .liked
            .iter()
            .any(|track| &track.id == track_id)
    }

    /// Likes or unlikes a track, locally first and then on the catalog.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSyncFailure` when the catalog rejects the change; the
    /// local change is reverted in that case.
    pub async fn set_liked(&self, track: &Track, liked: bool) -> Result<()> {
        let previous_index = {
            let mut collections = self.collections.lock().await;
            let index = collections.liked.iter().position(|t| t.id == track.id);
            match (index, liked) {
                (Some(_), true) | (None, false) => return Ok(()),
                (None, true) => {
                    let mut track = track.clone();
                    track.liked = true;
                    collections.liked.insert(0, track);
                }
                (Some(index), false) => {
                    collections.liked.remove(index);
                }
            }
            store::save_or_warn(self.store.as_ref(), keys::LIKED_SONGS, &collections.liked).await;
            index
        };

        let accepted = self.catalog.like(&track.id, liked).await;
        if matches!(accepted, Ok(true)) {
            debug!("{} track {track}", if liked { "liked" } else { "unliked" });
            return Ok(());
        }

        let mut collections = self.collections.lock().await;
        if liked {
            collections.liked.retain(|t| t.id != track.id);
        } else if !collections.liked.iter().any(|t| t.id == track.id) {
            let index = previous_index.unwrap_or(0).min(collections.liked.len());
            let mut track = track.clone();
            track.liked = true;
            collections.liked.insert(index, track);
        }
        store::save_or_warn(self.store.as_ref(), keys::LIKED_SONGS, &collections.liked).await;

        Err(Self::sync_failure(&format!("like {}", track.id), accepted))
    }

    pub async fn playlists(&self) -> Vec<Playlist> {
        self.collections.lock().await.playlists.clone()
    }

    pub async fn playlist(&self, id: &PlaylistId) -> Option<Playlist> {
        self.collections
            .lock()
            .await
            .playlists
            .iter()
            .find(|playlist| &playlist.id() == id)
            .cloned()
    }

    /// Creates a playlist that only exists on this device.
    pub async fn create_local_playlist(&self, title: &str) -> PlaylistId {
        let playlist = Playlist::Local(LocalPlaylist {
            id: Uuid::new_v4(),
            title: title.to_owned(),
            tracks: Vec::new(),
            created_at: util::now_from_epoch_ms(),
        });
        let id = playlist.id();

        let mut collections = self.collections.lock().await;
        collections.playlists.insert(0, playlist);
        self.persist_playlists(&collections).await;

        id
    }

    /// Creates a playlist on the catalog.
    ///
    /// The playlist appears locally right away under a provisional id, which
    /// is replaced by the catalog's id once it is known.
    pub async fn create_remote_playlist(&self, title: &str, tracks: &[Track]) -> Result<PlaylistId> {
        let provisional = format!("pending-{}", Uuid::new_v4());
        {
            let mut collections = self.collections.lock().await;
            collections.playlists.insert(
                0,
                Playlist::Remote(RemotePlaylist {
                    id: provisional.clone(),
                    title: title.to_owned(),
                    tracks: tracks.to_vec(),
                    owned: true,
                    thumbnail: None,
                }),
            );
            self.persist_playlists(&collections).await;
        }

        let track_ids: Vec<_> = tracks.iter().map(|track| track.id.clone()).collect();
        let result = self.catalog.create_playlist(title, &track_ids).await;

        let mut collections = self.collections.lock().await;
        let index = collections
            .playlists
            .iter()
            .position(|playlist| playlist.id() == PlaylistId::Remote(provisional.clone()));

        let outcome = match (result, index) {
            (Ok(remote_id), Some(index)) => {
                if let Playlist::Remote(playlist) = &mut collections.playlists[index] {
                    playlist.id.clone_from(&remote_id);
                }
                Ok(PlaylistId::Remote(remote_id))
            }
            (Ok(remote_id), None) => {
                // Deleted locally while the request was in flight.
                Ok(PlaylistId::Remote(remote_id))
            }
            (Err(e), index) => {
                if let Some(index) = index {
                    collections.playlists.remove(index);
                }
                Err(Error::remote_sync_failure(format!(
                    "create playlist \"{title}\": {e}"
                )))
            }
        };
        self.persist_playlists(&collections).await;

        outcome
    }

    pub async fn add_to_playlist(&self, id: &PlaylistId, tracks: &[Track]) -> Result<()> {
        let (added, remote_id) = {
            let mut collections = self.collections.lock().await;
            let playlist = Self::mutable_playlist(&mut collections, id)?;
            let added = playlist.append(tracks);
            let remote_id = Self::remote_id(playlist);
            self.persist_playlists(&collections).await;
            (added, remote_id)
        };

        let Some(remote_id) = remote_id else {
            return Ok(());
        };
        if added.is_empty() {
            return Ok(());
        }

        let track_ids: Vec<_> = added.iter().map(|track| track.id.clone()).collect();
        let accepted = self.catalog.add_to_playlist(&remote_id, &track_ids).await;
        if matches!(accepted, Ok(true)) {
            return Ok(());
        }

        let mut collections = self.collections.lock().await;
        if let Some(playlist) = Self::find(&mut collections, id) {
            playlist.remove(&track_ids);
        }
        self.persist_playlists(&collections).await;

        Err(Self::sync_failure(&format!("add to playlist {id}"), accepted))
    }

    pub async fn remove_from_playlist(&self, id: &PlaylistId, track_ids: &[TrackId]) -> Result<()> {
        let (removed, remote_id) = {
            let mut collections = self.collections.lock().await;
            let playlist = Self::mutable_playlist(&mut collections, id)?;
            let removed = playlist.remove(track_ids);
            let remote_id = Self::remote_id(playlist);
            self.persist_playlists(&collections).await;
            (removed, remote_id)
        };

        let Some(remote_id) = remote_id else {
            return Ok(());
        };
        if removed.is_empty() {
            return Ok(());
        }

        let removed_ids: Vec<_> = removed.iter().map(|(_, track)| track.id.clone()).collect();
        let accepted = self
            .catalog
            .remove_from_playlist(&remote_id, &removed_ids)
            .await;
        if matches!(accepted, Ok(true)) {
            return Ok(());
        }

        let mut collections = self.collections.lock().await;
        if let Some(playlist) = Self::find(&mut collections, id) {
            playlist.restore(removed);
        }
        self.persist_playlists(&collections).await;

        Err(Self::sync_failure(
            &format!("remove from playlist {id}"),
            accepted,
        ))
    }

    pub async fn rename_playlist(&self, id: &PlaylistId, title: &str) -> Result<()> {
        let (previous, remote_id) = {
            let mut collections = self.collections.lock().await;
            let playlist = Self::mutable_playlist(&mut collections, id)?;
            let previous = playlist.set_title(title.to_owned());
            let remote_id = Self::remote_id(playlist);
            self.persist_playlists(&collections).await;
            (previous, remote_id)
        };

        let Some(remote_id) = remote_id else {
            return Ok(());
        };

        let accepted = self.catalog.edit_playlist(&remote_id, title).await;
        if matches!(accepted, Ok(true)) {
            return Ok(());
        }

        let mut collections = self.collections.lock().await;
        if let Some(playlist) = Self::find(&mut collections, id) {
            // Only undo our own rename.
            if playlist.title() == title {
                playlist.set_title(previous);
            }
        }
        self.persist_playlists(&collections).await;

        Err(Self::sync_failure(&format!("rename playlist {id}"), accepted))
    }

    /// Deletes a playlist. Owned remote playlists are deleted on the catalog
    /// too; other remote playlists are only removed from this device.
    pub async fn delete_playlist(&self, id: &PlaylistId) -> Result<()> {
        let (index, playlist) = {
            let mut collections = self.collections.lock().await;
            let index = collections
                .playlists
                .iter()
                .position(|playlist| &playlist.id() == id)
                .ok_or_else(|| Error::not_found(format!("playlist {id} not found")))?;
            let playlist = collections.playlists.remove(index);
            self.persist_playlists(&collections).await;
            (index, playlist)
        };

        let remote_id = match &playlist {
            Playlist::Remote(remote) if remote.owned => remote.id.clone(),
            _ => return Ok(()),
        };

        let accepted = self.catalog.delete_playlist(&remote_id).await;
        if matches!(accepted, Ok(true)) {
            return Ok(());
        }

        let mut collections = self.collections.lock().await;
        let index = index.min(collections.playlists.len());
        collections.playlists.insert(index, playlist);
        self.persist_playlists(&collections).await;

        Err(Self::sync_failure(&format!("delete playlist {id}"), accepted))
    }

    /// Replaces a remote playlist's contents with the catalog's copy.
    /// Failures keep the local copy.
    pub async fn refresh_playlist(&self, id: &PlaylistId) -> Result<Playlist> {
        let PlaylistId::Remote(remote_id) = id else {
            return self
                .playlist(id)
                .await
                .ok_or_else(|| Error::not_found(format!("playlist {id} not found")));
        };

        let fetched = self.catalog.playlist(remote_id).await;

        let mut collections = self.collections.lock().await;
        let index = collections
            .playlists
            .iter()
            .position(|playlist| &playlist.id() == id);

        match (fetched, index) {
            (Ok(Some(remote)), Some(index)) => {
                collections.playlists[index] = Playlist::Remote(remote);
                self.persist_playlists(&collections).await;
                Ok(collections.playlists[index].clone())
            }
            (Ok(Some(remote)), None) => {
                collections.playlists.push(Playlist::Remote(remote));
                self.persist_playlists(&collections).await;
                Ok(collections.playlists[collections.playlists.len() - 1].clone())
            }
            (Ok(None), _) => Err(Error::not_found(format!("playlist {id} not in catalog"))),
            (Err(e), Some(index)) => {
                debug!("keeping local copy of playlist {id}: {e}");
                Ok(collections.playlists[index].clone())
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Path of the downloaded file for a track, if it was downloaded and the
    /// file still exists.
    pub async fn download_path(&self, track_id: &TrackId) -> Option<PathBuf> {
        let path = self.collections.lock().await.downloads.get(track_id).cloned()?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => {
                debug!("download of {track_id} missing at {}", path.display());
                None
            }
        }
    }

    pub async fn register_download(&self, track_id: TrackId, path: impl AsRef<Path>) {
        let mut collections = self.collections.lock().await;
        collections
            .downloads
            .insert(track_id, path.as_ref().to_path_buf());
        store::save_or_warn(self.store.as_ref(), keys::DOWNLOADS, &collections.downloads).await;
    }

    pub async fn remove_download(&self, track_id: &TrackId) -> Option<PathBuf> {
        let mut collections = self.collections.lock().await;
        let removed = collections.downloads.remove(track_id);
        if removed.is_some() {
            store::save_or_warn(self.store.as_ref(), keys::DOWNLOADS, &collections.downloads)
                .await;
        }
        removed
    }

    /// Pulls liked songs and playlists from the catalog.
    ///
    /// Remote-backed state is replaced with the catalog's copy; local
    /// playlists are kept. A failed fetch leaves the corresponding collection
    /// untouched.
    pub async fn sync(&self) {
        match self.catalog.library(LIKED_SONGS_COLLECTION).await {
            Ok(items) => {
                let liked: Vec<_> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        LibraryItem::Track(mut track) => {
                            track.liked = true;
                            Some(track)
                        }
                        _ => None,
                    })
                    .collect();
                debug!("synced {} liked songs", liked.len());

                let mut collections = self.collections.lock().await;
                collections.liked = liked;
                store::save_or_warn(self.store.as_ref(), keys::LIKED_SONGS, &collections.liked)
                    .await;
            }
            Err(e) => warn!("failed to sync liked songs: {e}"),
        }

        match self.catalog.library(PLAYLISTS_COLLECTION).await {
            Ok(items) => {
                let remote: Vec<_> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        LibraryItem::Playlist(playlist) => Some(Playlist::Remote(playlist)),
                        _ => None,
                    })
                    .collect();
                debug!("synced {} playlists", remote.len());

                let mut collections = self.collections.lock().await;
                collections.playlists.retain(|playlist| !playlist.is_remote());
                collections.playlists.extend(remote);
                self.persist_playlists(&collections).await;
            }
            Err(e) => warn!("failed to sync playlists: {e}"),
        }
    }

    /// Starts synchronizing with the credential and interval of `config`.
    #[must_use]
    pub fn start_configured_sync(self: &Arc<Self>, config: &Config) -> Option<SyncTask> {
        self.start_sync(config.credential.as_ref(), config.sync_interval)
    }

    /// Starts synchronizing every `interval`, but only with a credential.
    ///
    /// The first sync runs immediately. Dropping the returned [`SyncTask`]
    /// stops the schedule.
    #[must_use]
    pub fn start_sync(
        self: &Arc<Self>,
        credential: Option<&Credential>,
        interval: Duration,
    ) -> Option<SyncTask> {
        if credential.is_none() {
            debug!("not syncing library without a credential");
            return None;
        }

        // `interval` panics on a zero period.
        let interval = interval.max(Self::MIN_SYNC_INTERVAL);

        let library = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => library.sync().await,
                }
            }
            debug!("library sync stopped");
        });

        info!("syncing library every {}s", interval.as_secs());
        Some(SyncTask {
            cancel,
            handle: Some(handle),
        })
    }

    fn find<'a>(collections: &'a mut Collections, id: &PlaylistId) -> Option<&'a mut Playlist> {
        collections
            .playlists
            .iter_mut()
            .find(|playlist| &playlist.id() == id)
    }

    fn mutable_playlist<'a>(
        collections: &'a mut Collections,
        id: &PlaylistId,
    ) -> Result<&'a mut Playlist> {
        let playlist = Self::find(collections, id)
            .ok_or_else(|| Error::not_found(format!("playlist {id} not found")))?;
        if !playlist.is_mutable() {
            return Err(Error::invalid_argument(format!(
                "playlist {playlist} is read-only"
            )));
        }
        Ok(playlist)
    }

    fn remote_id(playlist: &Playlist) -> Option<String> {
        match playlist {
            Playlist::Remote(remote) => Some(remote.id.clone()),
            Playlist::Local(_) => None,
        }
    }

    async fn persist_playlists(&self, collections: &Collections) {
        store::save_or_warn(self.store.as_ref(), keys::PLAYLISTS, &collections.playlists).await;
    }

    fn sync_failure(operation: &str, outcome: Result<bool>) -> Error {
        let reason = match outcome {
            Ok(_) => "rejected by catalog".to_owned(),
            Err(e) => e.to_string(),
        };
        warn!("reverted {operation}: {reason}");
        Error::remote_sync_failure(format!("{operation}: {reason}"))
    }
}

/// Handle to the periodic library sync. Dropping it cancels the schedule.
pub struct SyncTask {
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SyncTask {
    /// Cancels the schedule and waits for an in-flight sync to wind down.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!("library sync task ended abnormally: {e}");
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, tokio::task::JoinHandle::is_finished)
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
