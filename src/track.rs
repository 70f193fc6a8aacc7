//! Catalog track metadata.
//!
//! A [`Track`] is immutable once fetched from the catalog: it is cloned into
//! queues, back-stacks, playlists and play events as a snapshot.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Opaque, globally unique track identifier as issued by the catalog.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

impl Artist {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Key to aggregate plays by: the catalog id, or the name for artists
    /// that the catalog did not identify.
    #[must_use]
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "durationMs")]
    pub duration: Duration,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub liked: bool,
}

impl Track {
    #[must_use]
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists: Vec::new(),
            duration,
            thumbnail: None,
            album: None,
            liked: false,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: Artist) -> Self {
        self.artists.push(artist);
        self
    }

    /// The first credited artist, which lookups keyed by artist use.
    #[must_use]
    pub fn primary_artist(&self) -> Option<&Artist> {
        self.artists.first()
    }

    /// All artist names joined the way they are displayed.
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist_names(), self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_duration_as_milliseconds() {
        let track = Track::new("abc", "Song", Duration::from_millis(183_500))
            .with_artist(Artist::new("a1", "Someone"));
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["durationMs"], 183_500);
        assert_eq!(json["id"], "abc");

        let back: Track = serde_json::from_value(json).unwrap();
        assert_eq!(back, track);
    }

    #[test]
    fn displays_artists_and_title() {
        let track = Track::new("7", "Intro", Duration::ZERO)
            .with_artist(Artist::new("1", "A"))
            .with_artist(Artist::new("", "B"));
        assert_eq!(track.to_string(), "7: \"A, B - Intro\"");
        assert_eq!(track.artists[1].key(), "B");
    }
}
