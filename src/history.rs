//! Listening history: an append-only log of play events.
//!
//! Events are kept newest first and capped; once the cap is reached the
//! oldest events are evicted. The whole log is persisted as one document
//! after every play. Persistence failures are logged and otherwise ignored.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::sync::Mutex;

use crate::{
    genre::GenreDetector,
    stats::{compute_stats, AuraStats},
    store::{self, keys, KeyValueStore},
    track::Track,
    util,
};

/// One playback start.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    /// `{track id}_{played at}`; unique within the log.
    pub id: String,
    pub track: Track,
    /// Milliseconds since the Unix epoch.
    pub played_at: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub listened_duration: Duration,
    #[serde(default)]
    pub genre: Option<String>,
}

pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    detector: Arc<GenreDetector>,
    limit: usize,
    events: Mutex<Vec<PlayEvent>>,
}

impl HistoryStore {
    /// Number of events retained by default.
    pub const DEFAULT_LIMIT: usize = 10_000;

    /// Opens the log persisted in `store`, keeping at most `limit` events.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        detector: Arc<GenreDetector>,
        limit: usize,
    ) -> Self {
        let limit = limit.max(1);
        let mut events: Vec<PlayEvent> = match store::load(store.as_ref(), keys::PLAY_HISTORY).await
        {
            Ok(events) => events.unwrap_or_default(),
            Err(e) => {
                warn!("starting with empty play history: {e}");
                Vec::new()
            }
        };
        events.truncate(limit);
        debug!("loaded {} play events", events.len());

        Self {
            store,
            detector,
            limit,
            events: Mutex::new(events),
        }
    }

    /// Records that `track` started playing.
    ///
    /// The event takes its place in the log right away; the genre is filled
    /// in once classified, since lookups can take seconds and later plays
    /// must still sort after this one. The oldest events over the cap are
    /// evicted and the log is persisted.
    pub async fn record_play(&self, track: &Track, listened_duration: Duration) -> PlayEvent {
        let mut event = {
            let mut events = self.events.lock().await;

            // Keep timestamps strictly decreasing so event ids stay unique.
            let mut played_at = util::now_from_epoch_ms();
            if let Some(latest) = events.first() {
                played_at = played_at.max(latest.played_at + 1);
            }

            let event = PlayEvent {
                id: format!("{}_{played_at}", track.id),
                track: track.clone(),
                played_at,
                listened_duration,
                genre: None,
            };

            events.insert(0, event.clone());
            events.truncate(self.limit);
            event
        };

        let genre = self.detector.detect(track).await;
        event.genre = Some(genre);

        let snapshot = {
            let mut events = self.events.lock().await;
            if let Some(logged) = events.iter_mut().find(|logged| logged.id == event.id) {
                logged.genre.clone_from(&event.genre);
            }
            events.clone()
        };

        store::save_or_warn(self.store.as_ref(), keys::PLAY_HISTORY, &snapshot).await;
        event
    }

    /// All events, newest first.
    pub async fn events(&self) -> Vec<PlayEvent> {
        self.events.lock().await.clone()
    }

    /// The `count` most recent events.
    pub async fn recent(&self, count: usize) -> Vec<PlayEvent> {
        let events = self.events.lock().await;
        events.iter().take(count).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    /// Statistics over the whole log, computed on demand.
    pub async fn stats(&self) -> AuraStats {
        let events = self.events.lock().await;
        compute_stats(&events)
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
        if let Err(e) = self.store.remove(keys::PLAY_HISTORY).await {
            warn!("failed to clear play history: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, track::Artist};

    async fn history(store: Arc<MemoryStore>, limit: usize) -> HistoryStore {
        let detector = GenreDetector::open(store.clone(), None, Vec::new(), Duration::from_secs(1)).await;
        HistoryStore::open(store, Arc::new(detector), limit).await
    }

    fn track(id: &str) -> Track {
        Track::new(id, format!("Song {id}"), Duration::from_secs(180))
            .with_artist(Artist::new("9", "Someone"))
    }

    struct SlowFor(&'static str);

    #[async_trait::async_trait]
    impl crate::genre::GenreLookup for SlowFor {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn tags(&self, track: &Track) -> crate::error::Result<Vec<String>> {
            if track.id.as_str() == self.0 {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Ok(vec!["jazz".to_owned()])
        }
    }

    #[test]
    fn default_limit() {
        assert_eq!(HistoryStore::DEFAULT_LIMIT, 10_000);
    }

    #[tokio::test]
    async fn evicts_oldest_first() {
        let history = history(Arc::new(MemoryStore::new()), 3).await;
        for id in ["1", "2", "3", "4", "5"] {
            history.record_play(&track(id), Duration::from_secs(180)).await;
        }

        let ids: Vec<_> = history
            .events()
            .await
            .into_iter()
            .map(|event| event.track.id.to_string())
            .collect();
        assert_eq!(ids, ["5", "4", "3"]);
    }

    #[tokio::test]
    async fn event_ids_are_unique() {
        let history = history(Arc::new(MemoryStore::new()), 100).await;
        for _ in 0..20 {
            history.record_play(&track("1"), Duration::from_secs(180)).await;
        }

        let events = history.events().await;
        let mut ids: Vec<_> = events.iter().map(|event| event.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert!(events.windows(2).all(|pair| pair[0].played_at > pair[1].played_at));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classification_keeps_play_order() {
        let store = Arc::new(MemoryStore::new());
        let detector = GenreDetector::open(
            store.clone(),
            None,
            vec![Box::new(SlowFor("first"))],
            Duration::from_secs(5),
        )
        .await;
        let history = HistoryStore::open(store, Arc::new(detector), 10).await;

        let first_track = track("first");
        let (first, second) = tokio::join!(
            history.record_play(&first_track, Duration::from_secs(180)),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                history.record_play(&track("second"), Duration::from_secs(180)).await
            }
        );
        assert!(first.played_at < second.played_at);

        let events = history.events().await;
        let ids: Vec<_> = events.iter().map(|event| event.track.id.as_str()).collect();
        assert_eq!(ids, ["second", "first"]);
        assert!(events.iter().all(|event| event.genre.as_deref() == Some("Jazz")));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let store = Arc::new(MemoryStore::new());
        let recorded = history(store.clone(), 10)
            .await
            .record_play(&track("1"), Duration::from_secs(42))
            .await;
        assert_eq!(recorded.genre.as_deref(), Some(crate::genre::OTHER));

        let reopened = history(store.clone(), 10).await;
        assert_eq!(reopened.events().await, vec![recorded]);

        reopened.clear().await;
        assert!(reopened.is_empty().await);
        assert!(store.get(keys::PLAY_HISTORY).await.unwrap().is_none());
    }
}
