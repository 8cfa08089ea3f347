//! Field Mapping Config
//!
//! The document store has gone through several schema revisions, so the same
//! canonical field may appear under different names across records. Each
//! canonical field declares an ordered list of candidate source fields; the
//! first candidate present and non-null wins. Pure lookup, no I/O.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::db::documents::DocumentRow;
use crate::error::{AppError, AppResult};
use crate::models::{Album, Artist, Follow, Genre, Like, PlayEvent, Song, User};

/// Ordered candidate source-field names for the canonical fields of one
/// collection
#[derive(Debug, Clone)]
pub struct FieldMap {
    fields: Vec<(&'static str, &'static [&'static str])>,
}

impl FieldMap {
    pub fn new(fields: Vec<(&'static str, &'static [&'static str])>) -> Self {
        Self { fields }
    }

    fn candidates(&self, canonical: &str) -> &[&'static str] {
        self.fields
            .iter()
            .find(|(name, _)| *name == canonical)
            .map(|(_, candidates)| *candidates)
            .unwrap_or(&[])
    }

    /// First candidate field present and non-null, in declaration order
    pub fn lookup<'a>(&self, doc: &'a Value, canonical: &str) -> Option<&'a Value> {
        self.candidates(canonical)
            .iter()
            .filter_map(|field| doc.get(*field))
            .find(|v| !v.is_null())
    }

    pub fn string(&self, doc: &Value, canonical: &str) -> Option<String> {
        match self.lookup(doc, canonical)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            // Older revisions stored some ids as bare numbers
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn require_string(&self, doc: &Value, canonical: &str) -> AppResult<String> {
        self.string(doc, canonical).ok_or_else(|| {
            AppError::Validation(format!("missing required field '{}'", canonical))
        })
    }

    pub fn integer(&self, doc: &Value, canonical: &str) -> Option<i64> {
        match self.lookup(doc, canonical)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn float(&self, doc: &Value, canonical: &str) -> Option<f64> {
        match self.lookup(doc, canonical)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// RFC 3339 string or epoch milliseconds, depending on the revision
    pub fn datetime(&self, doc: &Value, canonical: &str) -> Option<DateTime<Utc>> {
        match self.lookup(doc, canonical)? {
            Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }

    /// `YYYY-MM-DD`, optionally with a trailing time component
    pub fn date(&self, doc: &Value, canonical: &str) -> Option<NaiveDate> {
        let raw = self.lookup(doc, canonical)?.as_str()?;
        raw.parse::<NaiveDate>()
            .ok()
            .or_else(|| raw.get(..10)?.parse().ok())
    }
}

/// Per-collection field maps plus decoders into canonical models
#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub genres: FieldMap,
    pub artists: FieldMap,
    pub albums: FieldMap,
    pub songs: FieldMap,
    pub users: FieldMap,
    pub plays: FieldMap,
    pub likes: FieldMap,
    pub follows: FieldMap,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            genres: FieldMap::new(vec![
                ("id", &["_id", "id", "genreId"]),
                ("name", &["name", "genreName", "title"]),
            ]),
            artists: FieldMap::new(vec![
                ("id", &["_id", "id", "artistId"]),
                ("name", &["name", "artistName", "stageName"]),
                ("country", &["country", "countryCode", "origin"]),
            ]),
            albums: FieldMap::new(vec![
                ("id", &["_id", "id", "albumId"]),
                ("title", &["title", "name", "albumName"]),
                ("artist_id", &["artistId", "artist_id", "artist"]),
                ("release_date", &["releaseDate", "release_date", "releasedAt"]),
            ]),
            songs: FieldMap::new(vec![
                ("id", &["_id", "id", "songId"]),
                ("title", &["title", "name", "songName"]),
                ("artist_id", &["artistId", "artist_id", "artist"]),
                ("album_id", &["albumId", "album_id", "album"]),
                ("genre", &["genreId", "genre_id", "genre", "genreName"]),
                ("duration_ms", &["durationMs", "duration_ms", "duration"]),
                ("release_date", &["releaseDate", "release_date", "releasedAt"]),
            ]),
            users: FieldMap::new(vec![
                ("id", &["_id", "id", "userId"]),
                ("username", &["username", "userName", "handle", "name"]),
                ("country", &["country", "countryCode", "region"]),
            ]),
            plays: FieldMap::new(vec![
                ("user_id", &["userId", "user_id", "user"]),
                ("song_id", &["songId", "song_id", "song", "trackId"]),
                ("played_at", &["playedAt", "played_at", "timestamp", "ts"]),
                ("ms_played", &["msPlayed", "ms_played", "playedMs", "progressMs"]),
            ]),
            likes: FieldMap::new(vec![
                ("user_id", &["userId", "user_id", "user"]),
                ("song_id", &["songId", "song_id", "song", "trackId"]),
            ]),
            follows: FieldMap::new(vec![
                ("user_id", &["userId", "user_id", "user", "follower"]),
                ("artist_id", &["artistId", "artist_id", "artist", "followee"]),
            ]),
        }
    }
}

impl MappingConfig {
    /// Canonical id: prefer the document's own id field, fall back to the row
    /// key the store assigned
    fn id_of(&self, map: &FieldMap, row: &DocumentRow) -> String {
        map.string(&row.doc, "id").unwrap_or_else(|| row.id.clone())
    }

    pub fn genre(&self, row: &DocumentRow) -> AppResult<Genre> {
        Ok(Genre {
            id: self.id_of(&self.genres, row),
            name: self.genres.require_string(&row.doc, "name")?,
        })
    }

    pub fn artist(&self, row: &DocumentRow) -> AppResult<Artist> {
        Ok(Artist {
            id: self.id_of(&self.artists, row),
            name: self.artists.require_string(&row.doc, "name")?,
            country: self
                .artists
                .string(&row.doc, "country")
                .map(|c| c.to_uppercase()),
        })
    }

    pub fn album(&self, row: &DocumentRow) -> AppResult<Album> {
        Ok(Album {
            id: self.id_of(&self.albums, row),
            title: self.albums.require_string(&row.doc, "title")?,
            artist_id: self.albums.string(&row.doc, "artist_id"),
            release_date: self.albums.date(&row.doc, "release_date"),
        })
    }

    pub fn song(&self, row: &DocumentRow) -> AppResult<Song> {
        Ok(Song {
            id: self.id_of(&self.songs, row),
            title: self.songs.require_string(&row.doc, "title")?,
            artist_id: self.songs.string(&row.doc, "artist_id"),
            album_id: self.songs.string(&row.doc, "album_id"),
            genre: self.songs.string(&row.doc, "genre"),
            duration_ms: self.songs.integer(&row.doc, "duration_ms"),
            release_date: self.songs.date(&row.doc, "release_date"),
        })
    }

    pub fn user(&self, row: &DocumentRow) -> AppResult<User> {
        Ok(User {
            id: self.id_of(&self.users, row),
            username: self.users.string(&row.doc, "username"),
            country: self
                .users
                .string(&row.doc, "country")
                .map(|c| c.to_uppercase()),
        })
    }

    pub fn play(&self, row: &DocumentRow) -> AppResult<PlayEvent> {
        Ok(PlayEvent {
            user_id: self.plays.require_string(&row.doc, "user_id")?,
            song_id: self.plays.require_string(&row.doc, "song_id")?,
            played_at: self.plays.datetime(&row.doc, "played_at").ok_or_else(|| {
                AppError::Validation("missing or unparseable 'played_at'".to_string())
            })?,
            ms_played: self.plays.integer(&row.doc, "ms_played"),
        })
    }

    pub fn like(&self, row: &DocumentRow) -> AppResult<Like> {
        Ok(Like {
            user_id: self.likes.require_string(&row.doc, "user_id")?,
            song_id: self.likes.require_string(&row.doc, "song_id")?,
        })
    }

    pub fn follow(&self, row: &DocumentRow) -> AppResult<Follow> {
        Ok(Follow {
            user_id: self.follows.require_string(&row.doc, "user_id")?,
            artist_id: self.follows.require_string(&row.doc, "artist_id")?,
        })
    }
}
