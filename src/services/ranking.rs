//! Scoring core of the Recommendation Query Engine.
//!
//! Pure functions over candidate rows fetched from the graph: same input,
//! same ordered output. Every ordering ends in the id tie-break so ranking
//! is total.

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{
    CandidateSong, EmergingCandidate, EmergingSong, EmergingTier, PersonalizedSong,
    PreferenceProfile, RankedSong, SongStats,
};

/// Weights of the for-you score terms
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub genre: f64,
    pub artist: f64,
    pub popularity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            genre: 0.5,
            artist: 0.3,
            popularity: 0.2,
        }
    }
}

/// Newer first; undated songs sort after any dated one
fn release_desc(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn popularity_order(a: &SongStats, b: &SongStats) -> Ordering {
    b.play_count
        .cmp(&a.play_count)
        .then_with(|| release_desc(a.release_date, b.release_date))
        .then_with(|| a.id.cmp(&b.id))
}

/// Popularity ranking with the release-date/id tie-break. Used by the global
/// and country feeds and by the for-you fallbacks.
pub fn rank_by_popularity(mut rows: Vec<SongStats>, limit: usize) -> Vec<RankedSong> {
    rows.sort_by(popularity_order);
    rows.truncate(limit);
    rows.into_iter().map(RankedSong::from).collect()
}

/// Play-count percentile of each song within the candidate snapshot, in
/// [0, 1]. Equal play counts share a percentile.
pub fn popularity_percentiles(rows: &[SongStats]) -> HashMap<String, f64> {
    let n = rows.len();
    if n == 0 {
        return HashMap::new();
    }
    if n == 1 {
        return HashMap::from([(rows[0].id.clone(), 1.0)]);
    }

    let mut counts: Vec<i64> = rows.iter().map(|r| r.play_count).collect();
    counts.sort_unstable();

    rows.iter()
        .map(|r| {
            let below = counts.partition_point(|c| *c < r.play_count);
            (r.id.clone(), below as f64 / (n - 1) as f64)
        })
        .collect()
}

/// Scores for-you candidates against the profile:
/// `w_genre * genre_share + w_artist * artist_affinity + w_popularity * percentile`,
/// where a followed artist counts as full affinity. Results carry the reasons
/// they were selected.
pub fn score_for_user(
    candidates: Vec<CandidateSong>,
    profile: &PreferenceProfile,
    weights: &ScoringWeights,
    limit: usize,
) -> Vec<PersonalizedSong> {
    let stats: Vec<SongStats> = candidates.iter().map(|c| c.stats.clone()).collect();
    let percentiles = popularity_percentiles(&stats);

    let mut scored: Vec<PersonalizedSong> = candidates
        .into_iter()
        .map(|candidate| {
            let genre_share = candidate
                .stats
                .genre
                .as_deref()
                .map(|g| profile.genre_share(g))
                .unwrap_or(0.0);
            let artist_share = candidate
                .stats
                .artist_id
                .as_deref()
                .map(|a| profile.artist_share(a))
                .unwrap_or(0.0);
            let artist_affinity = if candidate.followed_artist {
                1.0
            } else {
                artist_share
            };
            let popularity = percentiles
                .get(&candidate.stats.id)
                .copied()
                .unwrap_or(0.0);

            let score = weights.genre * genre_share
                + weights.artist * artist_affinity
                + weights.popularity * popularity;

            let mut reasons = Vec::new();
            if genre_share > 0.0 {
                if let Some(genre) = &candidate.stats.genre {
                    reasons.push(format!("genre:{}", genre));
                }
            }
            if candidate.followed_artist {
                reasons.push("followed-artist".to_string());
            }
            if artist_share > 0.0 {
                reasons.push("favorite-artist".to_string());
            }

            PersonalizedSong {
                song: RankedSong::from(candidate.stats),
                score,
                reasons,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| release_desc(a.song.release_date, b.song.release_date))
            .then_with(|| a.song.id.cmp(&b.song.id))
    });
    scored.truncate(limit);
    scored
}

/// Listener-count bracket, or `None` for an established artist
pub fn artist_tier(listeners: i64) -> Option<EmergingTier> {
    if listeners < 10_000 {
        Some(EmergingTier::Rising)
    } else if listeners < 50_000 {
        Some(EmergingTier::Promising)
    } else if listeners < 200_000 {
        Some(EmergingTier::Notable)
    } else {
        None
    }
}

/// Ranks emerging candidates by listen velocity: plays per day since release
/// (minimum age one day), so a song gaining traction beats a merely obscure
/// one. Songs without a release date carry no velocity and are dropped.
pub fn rank_emerging(
    candidates: Vec<EmergingCandidate>,
    today: NaiveDate,
    limit: usize,
) -> Vec<EmergingSong> {
    let mut ranked: Vec<EmergingSong> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let tier = artist_tier(candidate.artist_listeners)?;
            let released = candidate.stats.release_date?;
            let days = (today - released).num_days().max(1);
            let velocity = candidate.stats.play_count as f64 / days as f64;
            Some(EmergingSong {
                song: RankedSong::from(candidate.stats),
                velocity,
                tier,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.velocity
            .partial_cmp(&a.velocity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| release_desc(a.song.release_date, b.song.release_date))
            .then_with(|| a.song.id.cmp(&b.song.id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn stats(id: &str, genre: &str, plays: i64, released: Option<&str>) -> SongStats {
        SongStats {
            id: id.to_string(),
            title: format!("Song {}", id),
            artist_id: Some(format!("artist-{}", id)),
            artist_name: None,
            genre: Some(genre.to_string()),
            release_date: released.map(|d| d.parse().unwrap()),
            play_count: plays,
        }
    }

    fn profile(genres: &[(&str, f64)], artists: &[(&str, f64)]) -> PreferenceProfile {
        PreferenceProfile::from_weights(
            genres.iter().map(|(g, w)| (g.to_string(), *w)).collect(),
            artists
                .iter()
                .map(|(a, w)| (a.to_string(), (None, *w)))
                .collect::<StdHashMap<_, _>>(),
            10,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn test_tie_break_release_date_then_id() {
        // Two songs tied on plays: newer release wins, then ascending id
        let rows = vec![
            stats("s3", "Rock", 10, Some("2023-01-01")),
            stats("s1", "Rock", 10, Some("2024-06-01")),
            stats("s2", "Rock", 25, Some("2020-01-01")),
        ];

        let ranked = rank_by_popularity(rows, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1", "s3"]);
    }

    #[test]
    fn test_tie_break_id_when_dates_equal() {
        let rows = vec![
            stats("b", "Rock", 10, Some("2024-01-01")),
            stats("a", "Rock", 10, Some("2024-01-01")),
        ];
        let ranked = rank_by_popularity(rows, 10);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn test_undated_songs_rank_after_dated_on_ties() {
        let rows = vec![
            stats("s1", "Rock", 10, None),
            stats("s2", "Rock", 10, Some("2010-01-01")),
        ];
        let ranked = rank_by_popularity(rows, 10);
        assert_eq!(ranked[0].id, "s2");
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let rows = || {
            vec![
                stats("s1", "Rock", 5, Some("2024-01-01")),
                stats("s2", "Jazz", 5, Some("2024-01-01")),
                stats("s3", "Pop", 9, None),
            ]
        };
        assert_eq!(rank_by_popularity(rows(), 10), rank_by_popularity(rows(), 10));
    }

    #[test]
    fn test_percentiles_span_zero_to_one() {
        let rows = vec![
            stats("low", "Rock", 1, None),
            stats("mid", "Rock", 5, None),
            stats("high", "Rock", 9, None),
        ];
        let pct = popularity_percentiles(&rows);
        assert_eq!(pct["low"], 0.0);
        assert_eq!(pct["mid"], 0.5);
        assert_eq!(pct["high"], 1.0);
    }

    #[test]
    fn test_percentiles_equal_counts_share_value() {
        let rows = vec![
            stats("a", "Rock", 3, None),
            stats("b", "Rock", 3, None),
            stats("c", "Rock", 7, None),
        ];
        let pct = popularity_percentiles(&rows);
        assert_eq!(pct["a"], pct["b"]);
        assert!(pct["c"] > pct["a"]);
    }

    #[test]
    fn test_score_for_user_is_deterministic() {
        let profile = profile(&[("Rock", 1.0)], &[]);
        let weights = ScoringWeights::default();
        let candidates = || {
            vec![
                CandidateSong {
                    stats: stats("s1", "Rock", 3, None),
                    followed_artist: false,
                },
                CandidateSong {
                    stats: stats("s2", "Rock", 3, None),
                    followed_artist: true,
                },
            ]
        };

        let first = score_for_user(candidates(), &profile, &weights, 10);
        let second = score_for_user(candidates(), &profile, &weights, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_followed_artist_counts_as_full_affinity() {
        let profile = profile(&[("Rock", 1.0)], &[]);
        let weights = ScoringWeights::default();
        let candidates = vec![
            CandidateSong {
                stats: stats("followed", "Jazz", 0, None),
                followed_artist: true,
            },
            CandidateSong {
                stats: stats("plain", "Jazz", 0, None),
                followed_artist: false,
            },
        ];

        let ranked = score_for_user(candidates, &profile, &weights, 10);
        assert_eq!(ranked[0].song.id, "followed");
        assert!(ranked[0].reasons.contains(&"followed-artist".to_string()));
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_genre_mix_dominates_top_half() {
        // 70% Rock / 30% Reggaeton profile; candidates from the matched set
        let profile = profile(&[("Rock", 7.0), ("Reggaeton", 3.0)], &[]);
        let weights = ScoringWeights::default();

        let mut candidates = Vec::new();
        for i in 0..6 {
            candidates.push(CandidateSong {
                stats: stats(&format!("rock{}", i), "Rock", 0, None),
                followed_artist: false,
            });
        }
        for i in 0..3 {
            candidates.push(CandidateSong {
                stats: stats(&format!("regg{}", i), "Reggaeton", 0, None),
                followed_artist: false,
            });
        }
        candidates.push(CandidateSong {
            stats: stats("jazz0", "Jazz", 0, None),
            followed_artist: true,
        });

        let ranked = score_for_user(candidates, &profile, &weights, 10);

        for entry in &ranked {
            let allowed_genre = matches!(
                entry.song.genre.as_deref(),
                Some("Rock") | Some("Reggaeton")
            );
            let followed = entry.reasons.contains(&"followed-artist".to_string());
            assert!(allowed_genre || followed, "unexpected entry {:?}", entry.song.id);
        }

        let top_half = &ranked[..ranked.len() / 2];
        let rock = top_half
            .iter()
            .filter(|e| e.song.genre.as_deref() == Some("Rock"))
            .count();
        let reggaeton = top_half
            .iter()
            .filter(|e| e.song.genre.as_deref() == Some("Reggaeton"))
            .count();
        assert!(rock > reggaeton);
    }

    #[test]
    fn test_artist_tier_boundaries() {
        assert_eq!(artist_tier(0), Some(EmergingTier::Rising));
        assert_eq!(artist_tier(9_999), Some(EmergingTier::Rising));
        assert_eq!(artist_tier(10_000), Some(EmergingTier::Promising));
        assert_eq!(artist_tier(49_999), Some(EmergingTier::Promising));
        assert_eq!(artist_tier(50_000), Some(EmergingTier::Notable));
        assert_eq!(artist_tier(199_999), Some(EmergingTier::Notable));
        assert_eq!(artist_tier(200_000), None);
    }

    #[test]
    fn test_velocity_beats_absolute_popularity() {
        let today: NaiveDate = "2025-08-01".parse().unwrap();
        let candidates = vec![
            // 100 plays over 100 days: velocity 1.0
            EmergingCandidate {
                stats: stats("old", "Rock", 100, Some("2025-04-23")),
                artist_listeners: 5_000,
            },
            // 30 plays over 3 days: velocity 10.0
            EmergingCandidate {
                stats: stats("fresh", "Rock", 30, Some("2025-07-29")),
                artist_listeners: 5_000,
            },
        ];

        let ranked = rank_emerging(candidates, today, 10);
        assert_eq!(ranked[0].song.id, "fresh");
        assert!(ranked[0].velocity > ranked[1].velocity);
        assert_eq!(ranked[0].tier, EmergingTier::Rising);
    }

    #[test]
    fn test_established_or_undated_candidates_dropped() {
        let today: NaiveDate = "2025-08-01".parse().unwrap();
        let candidates = vec![
            EmergingCandidate {
                stats: stats("big", "Rock", 500, Some("2025-07-01")),
                artist_listeners: 200_000,
            },
            EmergingCandidate {
                stats: stats("undated", "Rock", 500, None),
                artist_listeners: 100,
            },
            EmergingCandidate {
                stats: stats("keep", "Rock", 10, Some("2025-07-01")),
                artist_listeners: 100,
            },
        ];

        let ranked = rank_emerging(candidates, today, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].song.id, "keep");
    }

    #[test]
    fn test_release_day_counts_as_one_day() {
        let today: NaiveDate = "2025-08-01".parse().unwrap();
        let candidates = vec![EmergingCandidate {
            stats: stats("today", "Rock", 12, Some("2025-08-01")),
            artist_listeners: 100,
        }];

        let ranked = rank_emerging(candidates, today, 10);
        assert_eq!(ranked[0].velocity, 12.0);
    }
}
