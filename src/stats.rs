//! Listening statistics derived from the play history.
//!
//! Statistics are recomputed from the full log in a single pass whenever
//! they are asked for; nothing is cached or updated incrementally.
//!
//! The score is ten points per minute listened, rounded to the nearest
//! point. Ranks follow the score:
//!
//! | rank      | score       |
//! |-----------|-------------|
//! | Common    | < 1,000     |
//! | Uncommon  | < 5,000     |
//! | Rare      | < 10,000    |
//! | Epic      | < 25,000    |
//! | Mythic    | < 50,000    |
//! | Legendary | ≥ 50,000    |

use std::{cmp::Ordering, collections::HashMap, fmt, time::Duration};

use serde::Serialize;
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{genre::OTHER, history::PlayEvent, track::Track};

/// Entries kept in each top list.
pub const TOP_N: usize = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Rank {
    Common,
    Uncommon,
    Rare,
    Epic,
    Mythic,
    Legendary,
}

impl Rank {
    const ALL: [Self; 6] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Mythic,
        Self::Legendary,
    ];

    /// The lowest score that reaches this rank.
    #[must_use]
    pub fn threshold(self) -> u64 {
        match self {
            Self::Common => 0,
            Self::Uncommon => 1_000,
            Self::Rare => 5_000,
            Self::Epic => 10_000,
            Self::Mythic => 25_000,
            Self::Legendary => 50_000,
        }
    }

    #[must_use]
    pub fn for_score(score: u64) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|rank| score >= rank.threshold())
            .unwrap_or(Self::Common)
    }

    /// The rank after this one, or `None` at the top.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ALL.into_iter().find(|rank| *rank > self)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRank {
    pub rank: Rank,
    pub threshold: u64,
    pub points_needed: u64,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreShare {
    pub genre: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub time: Duration,
    /// Share of the total listening time, 0 to 100.
    pub percentage: f64,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistStats {
    /// Artist id, or the name for artists without one.
    pub key: String,
    pub name: String,
    pub play_count: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub time: Duration,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongStats {
    pub track: Track,
    pub play_count: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub time: Duration,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuraStats {
    pub play_count: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub total_listening_time: Duration,
    /// Top genres by listening time.
    pub genres: Vec<GenreShare>,
    pub top_artists: Vec<ArtistStats>,
    pub top_songs: Vec<SongStats>,
    pub aura_score: u64,
    pub rank: Rank,
    pub next_rank: Option<NextRank>,
}

/// Ten points per minute, rounded half up.
#[must_use]
pub fn aura_score(total: Duration) -> u64 {
    let millis = total.as_millis();
    u64::try_from((millis + 3_000) / 6_000).unwrap_or(u64::MAX)
}

/// Computes statistics over `events`, which are expected newest first.
#[must_use]
pub fn compute_stats(events: &[PlayEvent]) -> AuraStats {
    let mut total = Duration::ZERO;
    let mut genres: HashMap<&str, Duration> = HashMap::new();
    let mut artists: HashMap<&str, ArtistStats> = HashMap::new();
    let mut songs: HashMap<&str, SongStats> = HashMap::new();

    for event in events {
        let listened = event.listened_duration;
        total += listened;

        let genre = event.genre.as_deref().unwrap_or(OTHER);
        *genres.entry(genre).or_default() += listened;

        for artist in &event.track.artists {
            let entry = artists.entry(artist.key()).or_insert_with(|| ArtistStats {
                key: artist.key().to_owned(),
                name: artist.name.clone(),
                play_count: 0,
                time: Duration::ZERO,
            });
            entry.play_count += 1;
            entry.time += listened;
        }

        // The newest snapshot of a track describes it.
        let entry = songs
            .entry(event.track.id.as_str())
            .or_insert_with(|| SongStats {
                track: event.track.clone(),
                play_count: 0,
                time: Duration::ZERO,
            });
        entry.play_count += 1;
        entry.time += listened;
    }

    let mut genres: Vec<GenreShare> = genres
        .into_iter()
        .map(|(genre, time)| GenreShare {
            genre: genre.to_owned(),
            time,
            percentage: if total.is_zero() {
                0.0
            } else {
                time.as_secs_f64() / total.as_secs_f64() * 100.0
            },
        })
        .collect();
    genres.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.genre.cmp(&b.genre)));
    genres.truncate(TOP_N);

    let mut top_artists: Vec<ArtistStats> = artists.into_values().collect();
    top_artists.sort_by(|a, b| {
        by_time(a.time, a.play_count, b.time, b.play_count).then_with(|| a.key.cmp(&b.key))
    });
    top_artists.truncate(TOP_N);

    let mut top_songs: Vec<SongStats> = songs.into_values().collect();
    top_songs.sort_by(|a, b| {
        by_time(a.time, a.play_count, b.time, b.play_count)
            .then_with(|| a.track.id.as_str().cmp(b.track.id.as_str()))
    });
    top_songs.truncate(TOP_N);

    let aura_score = aura_score(total);
    let rank = Rank::for_score(aura_score);
    let next_rank = rank.next().map(|next| NextRank {
        rank: next,
        threshold: next.threshold(),
        points_needed: next.threshold().saturating_sub(aura_score),
    });

    AuraStats {
        play_count: events.len() as u64,
        total_listening_time: total,
        genres,
        top_artists,
        top_songs,
        aura_score,
        rank,
        next_rank,
    }
}

/// Descending by time, then by play count.
fn by_time(a_time: Duration, a_count: u64, b_time: Duration, b_count: u64) -> Ordering {
    b_time.cmp(&a_time).then_with(|| b_count.cmp(&a_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Artist;

    fn event(track: &Track, played_at: u64, listened: Duration, genre: Option<&str>) -> PlayEvent {
        PlayEvent {
            id: format!("{}_{played_at}", track.id),
            track: track.clone(),
            played_at,
            listened_duration: listened,
            genre: genre.map(ToOwned::to_owned),
        }
    }

    fn song(id: &str, artist: &str) -> Track {
        Track::new(id, format!("Song {id}"), Duration::from_secs(200))
            .with_artist(Artist::new(artist, artist.to_uppercase()))
    }

    #[test]
    fn repeated_plays_of_one_track() {
        let track = song("1", "a");
        let d = Duration::from_millis(187_654);
        let n = 7;
        let events: Vec<_> = (0..n).map(|i| event(&track, i, d, Some("Pop"))).collect();

        let stats = compute_stats(&events);
        assert_eq!(stats.total_listening_time, d * 7);
        assert_eq!(stats.top_songs[0].play_count, 7);

        // round(7 * 187.654 s / 60 * 10) = round(218.93)
        assert_eq!(stats.aura_score, 219);
    }

    #[test]
    fn score_rounds_half_up() {
        assert_eq!(aura_score(Duration::from_millis(2_999)), 0);
        assert_eq!(aura_score(Duration::from_millis(3_000)), 1);
        assert_eq!(aura_score(Duration::from_secs(60)), 10);
        assert_eq!(aura_score(Duration::from_secs(6_000)), 1_000);
    }

    #[test]
    fn rank_thresholds() {
        assert_eq!(Rank::for_score(0), Rank::Common);
        assert_eq!(Rank::for_score(999), Rank::Common);
        assert_eq!(Rank::for_score(1_000), Rank::Uncommon);
        assert_eq!(Rank::for_score(9_999), Rank::Rare);
        assert_eq!(Rank::for_score(25_000), Rank::Mythic);
        assert_eq!(Rank::for_score(50_000), Rank::Legendary);
        assert_eq!(Rank::Legendary.next(), None);
    }

    #[test]
    fn next_rank_gap() {
        // 120 minutes is 1,200 points: Uncommon, 3,800 short of Rare.
        let track = song("1", "a");
        let stats = compute_stats(&[event(&track, 0, Duration::from_secs(7_200), None)]);
        assert_eq!(stats.rank, Rank::Uncommon);
        assert_eq!(
            stats.next_rank,
            Some(NextRank {
                rank: Rank::Rare,
                threshold: 5_000,
                points_needed: 3_800,
            })
        );
    }

    #[test]
    fn genre_breakdown_counts_unknown_as_other() {
        let a = song("1", "a");
        let b = song("2", "b");
        let events = [
            event(&a, 3, Duration::from_secs(30), Some("Jazz")),
            event(&b, 2, Duration::from_secs(10), None),
            event(&a, 1, Duration::from_secs(60), Some("Jazz")),
        ];

        let stats = compute_stats(&events);
        assert_eq!(stats.genres.len(), 2);
        assert_eq!(stats.genres[0].genre, "Jazz");
        assert!((stats.genres[0].percentage - 90.0).abs() < 1e-9);
        assert_eq!(stats.genres[1].genre, OTHER);
    }

    #[test]
    fn top_lists_are_capped_and_sorted_by_time() {
        let events: Vec<_> = (0..15_u64)
            .map(|i| {
                let track = song(&i.to_string(), &format!("artist{i}"));
                event(&track, i, Duration::from_secs(10 * (i + 1)), Some(&format!("g{i}")))
            })
            .collect();

        let stats = compute_stats(&events);
        assert_eq!(stats.genres.len(), TOP_N);
        assert_eq!(stats.top_artists.len(), TOP_N);
        assert_eq!(stats.top_songs.len(), TOP_N);
        assert_eq!(stats.top_songs[0].track.id.as_str(), "14");
        assert_eq!(stats.top_artists[0].key, "artist14");
        assert!(stats
            .top_songs
            .windows(2)
            .all(|pair| pair[0].time >= pair[1].time));
    }

    #[test]
    fn empty_log() {
        let stats = compute_stats(&[]);
        assert_eq!(stats.aura_score, 0);
        assert_eq!(stats.rank, Rank::Common);
        assert!(stats.genres.is_empty());
        assert_eq!(stats.next_rank.unwrap().points_needed, 1_000);
    }
}
