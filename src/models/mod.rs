use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod profile;

pub use profile::{FavoredArtist, GenreAffinity, PreferenceProfile};

// ============================================================================
// Catalog entities (canonical form, after field mapping)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist_id: Option<String>,
    pub release_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    /// Genre reference as it appears in the source document; may be an id or
    /// a plain name depending on the schema revision.
    pub genre: Option<String>,
    pub duration_ms: Option<i64>,
    pub release_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    /// ISO country code, uppercased during sync
    pub country: Option<String>,
}

// ============================================================================
// Behavioral events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayEvent {
    pub user_id: String,
    pub song_id: String,
    pub played_at: DateTime<Utc>,
    pub ms_played: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Like {
    pub user_id: String,
    pub song_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Follow {
    pub user_id: String,
    pub artist_id: String,
}

/// One weighted (user, song) LISTENED edge, aggregated from raw play events
#[derive(Debug, Clone, PartialEq)]
pub struct ListenUpsert {
    pub user_id: String,
    pub song_id: String,
    pub count: i64,
    pub last_played: DateTime<Utc>,
}

// ============================================================================
// Graph query rows
// ============================================================================

/// Song row with its aggregated play count, as returned by feed traversals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongStats {
    pub id: String,
    pub title: String,
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub genre: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub play_count: i64,
}

/// A for-you candidate: song stats plus whether the user follows its artist
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSong {
    pub stats: SongStats,
    pub followed_artist: bool,
}

/// An emerging-feed candidate: song stats plus the artist's listener count
#[derive(Debug, Clone, PartialEq)]
pub struct EmergingCandidate {
    pub stats: SongStats,
    pub artist_listeners: i64,
}

/// Genre/artist/duration references for a song, used by the aggregator to
/// classify raw play events
#[derive(Debug, Clone, PartialEq)]
pub struct SongRef {
    pub id: String,
    pub genre: Option<String>,
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub duration_ms: Option<i64>,
}

// ============================================================================
// Feed results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedSong {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub play_count: i64,
    pub release_date: Option<NaiveDate>,
}

impl From<SongStats> for RankedSong {
    fn from(stats: SongStats) -> Self {
        Self {
            id: stats.id,
            title: stats.title,
            artist: stats.artist_name,
            genre: stats.genre,
            play_count: stats.play_count,
            release_date: stats.release_date,
        }
    }
}

/// A for-you result with its score and the reasons it was selected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonalizedSong {
    #[serde(flatten)]
    pub song: RankedSong,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Listener-count bracket of an emerging artist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmergingTier {
    Rising,
    Promising,
    Notable,
}

impl std::fmt::Display for EmergingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergingTier::Rising => write!(f, "rising"),
            EmergingTier::Promising => write!(f, "promising"),
            EmergingTier::Notable => write!(f, "notable"),
        }
    }
}

/// An emerging-feed result with its velocity score and tier label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergingSong {
    #[serde(flatten)]
    pub song: RankedSong,
    pub velocity: f64,
    pub tier: EmergingTier,
}
