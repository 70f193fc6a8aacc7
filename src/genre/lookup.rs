//! External genre lookup services.
//!
//! Each provider returns free-text tags ordered by relevance. The detector
//! normalizes them through the rule table; providers never interpret them.
//!
//! Providers:
//! * [`LastFm`]: `track.getTopTags` by artist and title (needs an API key)
//! * [`ITunes`]: `primaryGenreName` of the best search hit
//! * [`MusicBrainz`]: tags of the primary artist

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::{error::Result, http::Client, track::Track};

#[async_trait]
pub trait GenreLookup: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// Tags for `track`, most relevant first. An empty list means the
    /// provider knows nothing about it.
    async fn tags(&self, track: &Track) -> Result<Vec<String>>;
}

pub struct LastFm {
    client: Arc<Client>,
    api_key: String,
}

impl LastFm {
    const ENDPOINT: &'static str = "https://ws.audioscrobbler.com/2.0/";

    #[must_use]
    pub fn new(client: Arc<Client>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct LastFmResponse {
    #[serde(default)]
    toptags: Option<LastFmTopTags>,
}

#[derive(Deserialize)]
struct LastFmTopTags {
    #[serde(default)]
    tag: Vec<NamedTag>,
}

#[derive(Deserialize)]
struct NamedTag {
    name: String,
}

#[async_trait]
impl GenreLookup for LastFm {
    fn name(&self) -> &'static str {
        "last.fm"
    }

    async fn tags(&self, track: &Track) -> Result<Vec<String>> {
        let Some(artist) = track.primary_artist() else {
            return Ok(Vec::new());
        };

        let url = Url::parse_with_params(
            Self::ENDPOINT,
            &[
                ("method", "track.gettoptags"),
                ("artist", artist.name.as_str()),
                ("track", track.title.as_str()),
                ("autocorrect", "1"),
                ("api_key", self.api_key.as_str()),
                ("format", "json"),
            ],
        )?;

        let response = self.client.execute(self.client.get(url)).await?;
        let body: LastFmResponse = response.json().await?;

        Ok(body
            .toptags
            .map(|top| top.tag.into_iter().map(|tag| tag.name).collect())
            .unwrap_or_default())
    }
}

pub struct ITunes {
    client: Arc<Client>,
}

impl ITunes {
    const ENDPOINT: &'static str = "https://itunes.apple.com/search";

    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct ITunesResponse {
    #[serde(default)]
    results: Vec<ITunesResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ITunesResult {
    primary_genre_name: Option<String>,
}

#[async_trait]
impl GenreLookup for ITunes {
    fn name(&self) -> &'static str {
        "itunes"
    }

    async fn tags(&self, track: &Track) -> Result<Vec<String>> {
        let term = format!("{} {}", track.artist_names(), track.title);
        let url = Url::parse_with_params(
            Self::ENDPOINT,
            &[
                ("term", term.trim()),
                ("media", "music"),
                ("entity", "song"),
                ("limit", "1"),
            ],
        )?;

        let response = self.client.execute(self.client.get(url)).await?;
        let body: ITunesResponse = response.json().await?;

        Ok(body
            .results
            .into_iter()
            .filter_map(|result| result.primary_genre_name)
            .collect())
    }
}

pub struct MusicBrainz {
    client: Arc<Client>,
}

impl MusicBrainz {
    const ENDPOINT: &'static str = "https://musicbrainz.org/ws/2/artist/";

    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct MusicBrainzResponse {
    #[serde(default)]
    artists: Vec<MusicBrainzArtist>,
}

#[derive(Deserialize)]
struct MusicBrainzArtist {
    #[serde(default)]
    tags: Vec<CountedTag>,
}

#[derive(Deserialize)]
struct CountedTag {
    #[serde(default)]
    count: i64,
    name: String,
}

#[async_trait]
impl GenreLookup for MusicBrainz {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn tags(&self, track: &Track) -> Result<Vec<String>> {
        let Some(artist) = track.primary_artist() else {
            return Ok(Vec::new());
        };

        let query = format!("artist:\"{}\"", artist.name.replace('"', ""));
        let url = Url::parse_with_params(
            Self::ENDPOINT,
            &[("query", query.as_str()), ("fmt", "json"), ("limit", "1")],
        )?;

        let response = self.client.execute(self.client.get(url)).await?;
        let body: MusicBrainzResponse = response.json().await?;

        let mut tags: Vec<CountedTag> = body
            .artists
            .into_iter()
            .next()
            .map(|artist| artist.tags)
            .unwrap_or_default();
        tags.sort_by(|a, b| b.count.cmp(&a.count));

        Ok(tags.into_iter().map(|tag| tag.name).collect())
    }
}

/// The lookup providers in waterfall order. Last.fm is left out without an
/// API key.
#[must_use]
pub fn providers(client: &Arc<Client>, lastfm_api_key: Option<&str>) -> Vec<Box<dyn GenreLookup>> {
    let mut providers: Vec<Box<dyn GenreLookup>> = Vec::with_capacity(3);
    match lastfm_api_key {
        Some(key) if !key.is_empty() => {
            providers.push(Box::new(LastFm::new(Arc::clone(client), key)));
        }
        _ => debug!("no last.fm api key; skipping last.fm lookups"),
    }
    providers.push(Box::new(ITunes::new(Arc::clone(client))));
    providers.push(Box::new(MusicBrainz::new(Arc::clone(client))));
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lastfm_top_tags() {
        let body = r#"{"toptags":{"tag":[{"count":100,"name":"phonk"},{"count":40,"name":"seen live"}],"@attr":{"artist":"Phonk Boyz","track":"Midnight Drift"}}}"#;
        let response: LastFmResponse = serde_json::from_str(body).unwrap();
        let names: Vec<_> = response.toptags.unwrap().tag.into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["phonk", "seen live"]);
    }

    #[test]
    fn parses_lastfm_error_as_empty() {
        let body = r#"{"error":6,"message":"Track not found"}"#;
        let response: LastFmResponse = serde_json::from_str(body).unwrap();
        assert!(response.toptags.is_none());
    }

    #[test]
    fn parses_itunes_genre() {
        let body = r#"{"resultCount":1,"results":[{"trackName":"x","primaryGenreName":"Hip-Hop/Rap"}]}"#;
        let response: ITunesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.results[0].primary_genre_name.as_deref(),
            Some("Hip-Hop/Rap")
        );
    }

    #[test]
    fn parses_musicbrainz_tags() {
        let body = r#"{"artists":[{"name":"x","tags":[{"count":1,"name":"pop"},{"count":9,"name":"metal"}]}]}"#;
        let response: MusicBrainzResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.artists[0].tags.len(), 2);
    }
}
