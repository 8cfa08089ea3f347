use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One genre's share of a user's listening, in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenreAffinity {
    pub genre: String,
    pub share: f64,
}

/// One favored artist with its share of the user's (decayed) play weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoredArtist {
    pub artist_id: String,
    pub name: Option<String>,
    pub share: f64,
}

/// Derived per-user listening summary: normalized genre affinity plus top-K
/// favored artists. Replaced wholesale on every recompute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreferenceProfile {
    pub genre_affinity: Vec<GenreAffinity>,
    pub favored_artists: Vec<FavoredArtist>,
    pub computed_at: Option<DateTime<Utc>>,
}

impl PreferenceProfile {
    /// Builds a profile from accumulated play weights.
    ///
    /// Genre shares are normalized to sum to 1.0; artists are truncated to the
    /// `top_artists` heaviest with shares over the kept set. Entries are sorted
    /// by descending share, then name, so equal inputs produce equal profiles.
    pub fn from_weights(
        genre_weights: HashMap<String, f64>,
        artist_weights: HashMap<String, (Option<String>, f64)>,
        top_artists: usize,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let genre_total: f64 = genre_weights.values().sum();
        let mut genre_affinity: Vec<GenreAffinity> = genre_weights
            .into_iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|(genre, w)| GenreAffinity {
                genre,
                share: w / genre_total,
            })
            .collect();
        genre_affinity.sort_by(|a, b| {
            b.share
                .partial_cmp(&a.share)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.genre.cmp(&b.genre))
        });

        let mut ranked_artists: Vec<(String, Option<String>, f64)> = artist_weights
            .into_iter()
            .filter(|(_, (_, w))| *w > 0.0)
            .map(|(id, (name, w))| (id, name, w))
            .collect();
        ranked_artists.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked_artists.truncate(top_artists);

        let kept_total: f64 = ranked_artists.iter().map(|(_, _, w)| w).sum();
        let favored_artists = ranked_artists
            .into_iter()
            .map(|(artist_id, name, w)| FavoredArtist {
                artist_id,
                name,
                share: w / kept_total,
            })
            .collect();

        Self {
            genre_affinity,
            favored_artists,
            computed_at: Some(computed_at),
        }
    }

    /// True when the user had no qualifying history
    pub fn is_empty(&self) -> bool {
        self.genre_affinity.is_empty() && self.favored_artists.is_empty()
    }

    pub fn favored_genres(&self) -> Vec<String> {
        self.genre_affinity.iter().map(|g| g.genre.clone()).collect()
    }

    pub fn favored_artist_ids(&self) -> Vec<String> {
        self.favored_artists
            .iter()
            .map(|a| a.artist_id.clone())
            .collect()
    }

    pub fn genre_share(&self, genre: &str) -> f64 {
        self.genre_affinity
            .iter()
            .find(|g| g.genre == genre)
            .map(|g| g.share)
            .unwrap_or(0.0)
    }

    pub fn artist_share(&self, artist_id: &str) -> f64 {
        self.favored_artists
            .iter()
            .find(|a| a.artist_id == artist_id)
            .map(|a| a.share)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_genre_affinity_sums_to_one() {
        let profile = PreferenceProfile::from_weights(
            weights(&[("Rock", 7.0), ("Reggaeton", 3.0)]),
            HashMap::new(),
            10,
            Utc::now(),
        );

        let total: f64 = profile.genre_affinity.iter().map(|g| g.share).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(profile.genre_affinity[0].genre, "Rock");
        assert!((profile.genre_affinity[0].share - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_top_artists_truncated_and_normalized() {
        let mut artists = HashMap::new();
        for i in 0..15 {
            artists.insert(format!("a{:02}", i), (None, (i + 1) as f64));
        }

        let profile =
            PreferenceProfile::from_weights(HashMap::new(), artists, 10, Utc::now());

        assert_eq!(profile.favored_artists.len(), 10);
        // Heaviest artist first
        assert_eq!(profile.favored_artists[0].artist_id, "a14");
        let total: f64 = profile.favored_artists.iter().map(|a| a.share).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_weights_give_empty_profile() {
        let profile = PreferenceProfile::from_weights(
            HashMap::new(),
            HashMap::new(),
            10,
            Utc::now(),
        );
        assert!(profile.is_empty());
        assert!(profile.favored_genres().is_empty());
    }

    #[test]
    fn test_deterministic_ordering_on_equal_shares() {
        let build = || {
            PreferenceProfile::from_weights(
                weights(&[("Rock", 1.0), ("Jazz", 1.0), ("Pop", 1.0)]),
                HashMap::new(),
                10,
                DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            )
        };
        assert_eq!(build(), build());
        // Ties broken by name
        assert_eq!(build().favored_genres(), vec!["Jazz", "Pop", "Rock"]);
    }

    #[test]
    fn test_share_lookups() {
        let profile = PreferenceProfile::from_weights(
            weights(&[("Rock", 3.0), ("Jazz", 1.0)]),
            HashMap::from([("a1".to_string(), (Some("Band".to_string()), 4.0))]),
            10,
            Utc::now(),
        );

        assert!((profile.genre_share("Rock") - 0.75).abs() < 1e-9);
        assert_eq!(profile.genre_share("Metal"), 0.0);
        assert!((profile.artist_share("a1") - 1.0).abs() < 1e-9);
        assert_eq!(profile.artist_share("a2"), 0.0);
    }
}
