//! Playlists as a tagged union of local and remote variants.
//!
//! Local playlists exist only on this device and are always mutable. Remote
//! playlists mirror the catalog and can only be edited when the user owns
//! them; their mutations are synchronized with the catalog.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::track::{Track, TrackId};

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PlaylistId {
    Local(Uuid),
    Remote(String),
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local:{uuid}"),
            Self::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPlaylist {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlaylist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Whether the user owns this playlist and may edit it.
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum Playlist {
    Local(LocalPlaylist),
    Remote(RemotePlaylist),
}

impl Playlist {
    #[must_use]
    pub fn id(&self) -> PlaylistId {
        match self {
            Self::Local(playlist) => PlaylistId::Local(playlist.id),
            Self::Remote(playlist) => PlaylistId::Remote(playlist.id.clone()),
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Local(playlist) => &playlist.title,
            Self::Remote(playlist) => &playlist.title,
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        match self {
            Self::Local(playlist) => &playlist.tracks,
            Self::Remote(playlist) => &playlist.tracks,
        }
    }

    /// Whether the user may change this playlist.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        match self {
            Self::Local(_) => true,
            Self::Remote(playlist) => playlist.owned,
        }
    }

    /// Whether mutations must be mirrored to the catalog.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut Vec<Track> {
        match self {
            Self::Local(playlist) => &mut playlist.tracks,
            Self::Remote(playlist) => &mut playlist.tracks,
        }
    }

    pub(crate) fn set_title(&mut self, title: String) -> String {
        let slot = match self {
            Self::Local(playlist) => &mut playlist.title,
            Self::Remote(playlist) => &mut playlist.title,
        };
        std::mem::replace(slot, title)
    }

    /// Appends tracks that are not yet in the playlist and returns the ones
    /// that were added.
    pub(crate) fn append(&mut self, tracks: &[Track]) -> Vec<Track> {
        let mut added = Vec::new();
        for track in tracks {
            if !self.contains(&track.id) && !added.iter().any(|t: &Track| t.id == track.id) {
                added.push(track.clone());
            }
        }
        self.tracks_mut().extend(added.iter().cloned());
        added
    }

    /// Removes the given tracks and returns them with their former positions,
    /// in ascending position order.
    pub(crate) fn remove(&mut self, track_ids: &[TrackId]) -> Vec<(usize, Track)> {
        let mut removed = Vec::new();
        let mut index = 0;
        self.tracks_mut().retain(|track| {
            let keep = !track_ids.contains(&track.id);
            if !keep {
                removed.push((index, track.clone()));
            }
            index += 1;
            keep
        });
        removed
    }

    /// Undoes [`remove`](Self::remove).
    pub(crate) fn restore(&mut self, removed: Vec<(usize, Track)>) {
        let tracks = self.tracks_mut();
        for (index, track) in removed {
            let index = index.min(tracks.len());
            tracks.insert(index, track);
        }
    }

    #[must_use]
    pub fn contains(&self, track_id: &TrackId) -> bool {
        self.tracks().iter().any(|track| &track.id == track_id)
    }
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.id(), self.title())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), Duration::from_secs(60))
    }

    fn local(tracks: Vec<Track>) -> Playlist {
        Playlist::Local(LocalPlaylist {
            id: Uuid::new_v4(),
            title: "Mix".to_owned(),
            tracks,
            created_at: 0,
        })
    }

    #[test]
    fn remove_then_restore_keeps_order() {
        let mut playlist = local(vec![track("a"), track("b"), track("c"), track("d")]);
        let removed = playlist.remove(&["b".into(), "d".into()]);
        assert_eq!(
            removed.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![1, 3]
        );

        playlist.restore(removed);
        let ids: Vec<_> = playlist.tracks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[test]
    fn append_skips_duplicates() {
        let mut playlist = local(vec![track("a")]);
        let added = playlist.append(&[track("a"), track("b"), track("b")]);
        assert_eq!(added.len(), 1);
        assert_eq!(playlist.tracks().len(), 2);
    }

    #[test]
    fn only_owned_remote_playlists_are_mutable() {
        let remote = Playlist::Remote(RemotePlaylist {
            id: "PL1".to_owned(),
            title: "Top 50".to_owned(),
            tracks: Vec::new(),
            owned: false,
            thumbnail: None,
        });
        assert!(!remote.is_mutable());
        assert!(local(Vec::new()).is_mutable());
        assert_eq!(remote.id().to_string(), "remote:PL1");
    }
}
