//! Genre classification for play events.
//!
//! Genres are resolved through a waterfall that stops at the first real
//! answer:
//! 1. the persisted per-track cache
//! 2. the catalog's own classification
//! 3. each external [`GenreLookup`] in order
//! 4. keyword rules over the title and artist names
//!
//! Every network step is bounded by the lookup timeout and any failure counts
//! as "no signal". Only resolved genres are cached, so a track that came out
//! as [`OTHER`] during an outage is classified again next time.

pub mod lookup;
pub mod rules;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use tokio::sync::Mutex;

pub use lookup::GenreLookup;
pub use rules::classify_text;

use crate::{
    catalog::Catalog,
    error::Result,
    store::{self, keys, KeyValueStore},
    track::{Track, TrackId},
    util,
};

/// Genre of tracks that nothing could classify.
pub const OTHER: &str = "Other";

pub struct GenreDetector {
    store: Arc<dyn KeyValueStore>,
    catalog: Option<Arc<dyn Catalog>>,
    lookups: Vec<Box<dyn GenreLookup>>,
    lookup_timeout: Duration,
    cache: Mutex<HashMap<TrackId, String>>,
}

impl GenreDetector {
    /// Creates a detector with the cache loaded from `store`. Without a
    /// catalog, the waterfall starts at the external lookups.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        catalog: Option<Arc<dyn Catalog>>,
        lookups: Vec<Box<dyn GenreLookup>>,
        lookup_timeout: Duration,
    ) -> Self {
        let cache = match store::load(store.as_ref(), keys::GENRE_CACHE).await {
            Ok(cache) => cache.unwrap_or_default(),
            Err(e) => {
                warn!("starting with empty genre cache: {e}");
                HashMap::new()
            }
        };

        Self {
            store,
            catalog,
            lookups,
            lookup_timeout,
            cache: Mutex::new(cache),
        }
    }

    /// The cached genre of a track, if it was resolved before.
    pub async fn cached(&self, track_id: &TrackId) -> Option<String> {
        self.cache.lock().await.get(track_id).cloned()
    }

    /// Classifies `track`. Never fails: the worst outcome is [`OTHER`].
    pub async fn detect(&self, track: &Track) -> String {
        if let Some(genre) = self.cached(&track.id).await {
            trace!("genre of {} cached as {genre}", track.id);
            return genre;
        }

        let Some(genre) = self.resolve(track).await else {
            debug!("{track} not classified");
            return OTHER.to_owned();
        };

        debug!("{track} classified as {genre}");
        let snapshot = {
            let mut cache = self.cache.lock().await;
            cache.insert(track.id.clone(), genre.clone());
            cache.clone()
        };
        store::save_or_warn(self.store.as_ref(), keys::GENRE_CACHE, &snapshot).await;

        genre
    }

    /// Runs the waterfall for `track` without reading or filling the cache.
    pub async fn classify(&self, track: &Track) -> String {
        self.resolve(track).await.unwrap_or_else(|| OTHER.to_owned())
    }

    async fn resolve(&self, track: &Track) -> Option<String> {
        if let Some(catalog) = &self.catalog {
            match self.bounded(catalog.genre(&track.id)).await {
                Ok(Some(text)) => {
                    if let Some(genre) = normalize_catalog_genre(&text) {
                        return Some(genre);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("catalog genre of {} unavailable: {e}", track.id),
            }
        }

        for lookup in &self.lookups {
            match self.bounded(lookup.tags(track)).await {
                Ok(tags) => {
                    if let Some(genre) = tags.iter().find_map(|tag| classify_text(tag)) {
                        trace!("{} tagged {} as {genre}", lookup.name(), track.id);
                        return Some(genre.to_owned());
                    }
                }
                Err(e) => debug!("{} lookup of {} failed: {e}", lookup.name(), track.id),
            }
        }

        let text = format!("{} {}", track.title, track.artist_names());
        classify_text(&text).map(ToOwned::to_owned)
    }

    async fn bounded<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        util::timeout(self.lookup_timeout, future).await
    }
}

/// The catalog classifies with its own vocabulary. Known genres are mapped
/// onto the rule buckets; anything else is kept as is.
fn normalize_catalog_genre(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case(OTHER) {
        return None;
    }

    Some(classify_text(text).map_or_else(|| text.to_owned(), ToOwned::to_owned))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{catalog::testing::FakeCatalog, error::Error, store::MemoryStore, track::Artist};

    struct Failing;

    #[async_trait]
    impl GenreLookup for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn tags(&self, _: &Track) -> Result<Vec<String>> {
            Err(Error::fetch_error("503 Service Unavailable"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl GenreLookup for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn tags(&self, _: &Track) -> Result<Vec<String>> {
            std::future::pending().await
        }
    }

    struct Tags(Vec<&'static str>, Arc<AtomicUsize>);

    #[async_trait]
    impl GenreLookup for Tags {
        fn name(&self) -> &'static str {
            "tags"
        }

        async fn tags(&self, _: &Track) -> Result<Vec<String>> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.iter().map(|&tag| tag.to_owned()).collect())
        }
    }

    fn midnight_drift() -> Track {
        Track::new("1", "Midnight Drift", Duration::from_secs(150))
            .with_artist(Artist::new("7", "Phonk Boyz"))
    }

    #[tokio::test]
    async fn falls_back_to_keywords_when_lookups_fail() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FakeCatalog::default());
        catalog.offline.store(true, Ordering::SeqCst);

        let detector = GenreDetector::open(
            store,
            Some(catalog),
            vec![Box::new(Failing), Box::new(Failing), Box::new(Failing)],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(detector.detect(&midnight_drift()).await, "Phonk");
    }

    #[tokio::test]
    async fn catalog_answer_short_circuits() {
        let catalog = Arc::new(FakeCatalog::default());
        catalog
            .genres
            .lock()
            .unwrap()
            .insert("1".into(), "Rap/Hip Hop".to_owned());
        let calls = Arc::new(AtomicUsize::new(0));

        let detector = GenreDetector::open(
            Arc::new(MemoryStore::new()),
            Some(catalog),
            vec![Box::new(Tags(vec!["rock"], Arc::clone(&calls)))],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(detector.detect(&midnight_drift()).await, "Hip-Hop");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_classifiable_tag_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = GenreDetector::open(
            Arc::new(MemoryStore::new()),
            None,
            vec![
                Box::new(Tags(vec!["seen live", "favourites"], Arc::clone(&calls))),
                Box::new(Tags(vec!["seen live", "Reggaeton"], Arc::clone(&calls))),
                Box::new(Tags(vec!["pop"], Arc::clone(&calls))),
            ],
            Duration::from_secs(5),
        )
        .await;

        let track = Track::new("2", "Untitled", Duration::from_secs(60));
        assert_eq!(detector.detect(&track).await, "Reggaeton");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_lookup_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = GenreDetector::open(
            Arc::new(MemoryStore::new()),
            None,
            vec![
                Box::new(Hanging),
                Box::new(Tags(vec!["jazz"], Arc::clone(&calls))),
            ],
            Duration::from_secs(5),
        )
        .await;

        let track = Track::new("3", "So What", Duration::from_secs(560));
        assert_eq!(detector.detect(&track).await, "Jazz");
    }

    #[tokio::test]
    async fn only_resolved_genres_are_cached() {
        let store = Arc::new(MemoryStore::new());
        let detector = GenreDetector::open(
            store.clone(),
            None,
            vec![Box::new(Failing)],
            Duration::from_secs(5),
        )
        .await;

        let unknown = Track::new("4", "Untitled", Duration::from_secs(60));
        assert_eq!(detector.detect(&unknown).await, OTHER);
        assert!(detector.cached(&unknown.id).await.is_none());

        detector.detect(&midnight_drift()).await;
        let persisted: HashMap<TrackId, String> = store::load(store.as_ref(), keys::GENRE_CACHE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[&TrackId::from("1")], "Phonk");

        // A fresh detector starts from the persisted cache.
        let reopened = GenreDetector::open(store, None, Vec::new(), Duration::from_secs(5)).await;
        assert_eq!(reopened.cached(&"1".into()).await.as_deref(), Some("Phonk"));
    }

    #[tokio::test]
    async fn classify_leaves_cache_alone() {
        let store = Arc::new(MemoryStore::new());
        let detector = GenreDetector::open(store.clone(), None, Vec::new(), Duration::from_secs(5)).await;

        assert_eq!(detector.classify(&midnight_drift()).await, "Phonk");
        assert!(detector.cached(&"1".into()).await.is_none());
        assert!(store.get(keys::GENRE_CACHE).await.unwrap().is_none());
    }
}
