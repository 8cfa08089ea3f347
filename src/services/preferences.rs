use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::documents::DocumentSource;
use crate::db::graph::{GraphReader, GraphWriter};
use crate::error::AppResult;
use crate::mapping::MappingConfig;
use crate::models::{PlayEvent, PreferenceProfile, SongRef};

/// Upper bound on raw play documents considered per recompute
const PLAY_FETCH_LIMIT: i64 = 5000;

/// Derives per-user preference profiles from raw play history.
///
/// Genre affinity counts only completed or near-complete plays; skipped
/// tracks are weak signals and would bias the profile toward accidental
/// starts. Favored artists rank by play count over the same window. The
/// stored profile is replaced wholesale on every recompute.
pub struct PreferenceAggregator {
    documents: Arc<dyn DocumentSource>,
    reader: Arc<dyn GraphReader>,
    writer: Arc<dyn GraphWriter>,
    mapping: Arc<MappingConfig>,
    lookback_days: i64,
    top_artists: usize,
    completion_threshold: f64,
    decay_half_life_days: Option<f64>,
}

impl PreferenceAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentSource>,
        reader: Arc<dyn GraphReader>,
        writer: Arc<dyn GraphWriter>,
        mapping: Arc<MappingConfig>,
        lookback_days: i64,
        top_artists: usize,
        completion_threshold: f64,
        decay_half_life_days: Option<f64>,
    ) -> Self {
        Self {
            documents,
            reader,
            writer,
            mapping,
            lookback_days,
            top_artists,
            completion_threshold,
            decay_half_life_days,
        }
    }

    /// Recomputes and persists the user's profile. A user with no qualifying
    /// history yields an empty profile; feeds fall back to charts then.
    pub async fn compute_profile(&self, user_id: &str) -> AppResult<PreferenceProfile> {
        let rows = self
            .documents
            .recent_plays(user_id.to_string(), PLAY_FETCH_LIMIT)
            .await?;

        let mut plays = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.mapping.play(row) {
                Ok(play) => plays.push(play),
                Err(e) => {
                    tracing::debug!(id = %row.id, error = %e, "Skipping malformed play record")
                }
            }
        }

        let now = Utc::now();
        let cutoff = now - Duration::days(self.lookback_days);
        plays.retain(|p| p.played_at >= cutoff);

        let mut song_ids: Vec<String> = plays.iter().map(|p| p.song_id.clone()).collect();
        song_ids.sort();
        song_ids.dedup();

        let refs = if song_ids.is_empty() {
            Vec::new()
        } else {
            self.reader.song_refs(&song_ids).await?
        };
        let refs: HashMap<String, SongRef> =
            refs.into_iter().map(|r| (r.id.clone(), r)).collect();

        let profile = build_profile(
            &plays,
            &refs,
            self.completion_threshold,
            self.decay_half_life_days,
            self.top_artists,
            now,
        );

        self.writer.replace_profile(user_id, &profile).await?;
        tracing::info!(
            user_id,
            genres = profile.genre_affinity.len(),
            artists = profile.favored_artists.len(),
            "Preference profile recomputed"
        );
        Ok(profile)
    }
}

/// Exponential decay of a play's weight by age; 1.0 when decay is disabled
pub fn decay_weight(age_days: f64, half_life_days: Option<f64>) -> f64 {
    match half_life_days {
        Some(half_life) if half_life > 0.0 => 0.5_f64.powf(age_days.max(0.0) / half_life),
        _ => 1.0,
    }
}

/// Completion ratio gate. Records predating progress tracking carry no
/// played-duration and count as complete.
fn qualifies(ms_played: Option<i64>, duration_ms: Option<i64>, threshold: f64) -> bool {
    match (ms_played, duration_ms) {
        (Some(played), Some(duration)) if duration > 0 => {
            played as f64 / duration as f64 >= threshold
        }
        _ => true,
    }
}

fn build_profile(
    plays: &[PlayEvent],
    refs: &HashMap<String, SongRef>,
    completion_threshold: f64,
    decay_half_life_days: Option<f64>,
    top_artists: usize,
    now: DateTime<Utc>,
) -> PreferenceProfile {
    let mut genre_weights: HashMap<String, f64> = HashMap::new();
    let mut artist_weights: HashMap<String, (Option<String>, f64)> = HashMap::new();

    for play in plays {
        let Some(song) = refs.get(&play.song_id) else {
            continue;
        };
        let age_days = (now - play.played_at).num_seconds() as f64 / 86_400.0;
        let weight = decay_weight(age_days, decay_half_life_days);

        if let Some(artist_id) = &song.artist_id {
            let entry = artist_weights
                .entry(artist_id.clone())
                .or_insert((song.artist_name.clone(), 0.0));
            entry.1 += weight;
        }

        if qualifies(play.ms_played, song.duration_ms, completion_threshold) {
            if let Some(genre) = &song.genre {
                *genre_weights.entry(genre.clone()).or_insert(0.0) += weight;
            }
        }
    }

    PreferenceProfile::from_weights(genre_weights, artist_weights, top_artists, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000, 0).unwrap()
    }

    fn play(song_id: &str, ms_played: Option<i64>, age_days: i64) -> PlayEvent {
        PlayEvent {
            user_id: "u1".to_string(),
            song_id: song_id.to_string(),
            played_at: now() - Duration::days(age_days),
            ms_played,
        }
    }

    fn song_ref(id: &str, genre: &str, artist_id: &str, duration_ms: i64) -> SongRef {
        SongRef {
            id: id.to_string(),
            genre: Some(genre.to_string()),
            artist_id: Some(artist_id.to_string()),
            artist_name: None,
            duration_ms: Some(duration_ms),
        }
    }

    fn refs(entries: Vec<SongRef>) -> HashMap<String, SongRef> {
        entries.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_completion_gate_at_80_percent() {
        assert!(qualifies(Some(160_000), Some(200_000), 0.8));
        assert!(!qualifies(Some(159_999), Some(200_000), 0.8));
        assert!(qualifies(Some(200_000), Some(200_000), 0.8));
        // Legacy records without progress tracking count as complete
        assert!(qualifies(None, Some(200_000), 0.8));
        assert!(qualifies(Some(10), None, 0.8));
    }

    #[test]
    fn test_decay_disabled_by_default() {
        assert_eq!(decay_weight(45.0, None), 1.0);
    }

    #[test]
    fn test_decay_halves_at_half_life() {
        assert!((decay_weight(30.0, Some(30.0)) - 0.5).abs() < 1e-9);
        assert!((decay_weight(60.0, Some(30.0)) - 0.25).abs() < 1e-9);
        assert_eq!(decay_weight(0.0, Some(30.0)), 1.0);
    }

    #[test]
    fn test_partial_plays_excluded_from_genres_but_counted_for_artists() {
        let catalog = refs(vec![
            song_ref("s1", "Rock", "a1", 200_000),
            song_ref("s2", "Jazz", "a2", 200_000),
        ]);
        let plays = vec![
            play("s1", Some(200_000), 1),
            // Skipped after 10%: no genre signal, still an artist play
            play("s2", Some(20_000), 1),
        ];

        let profile = build_profile(&plays, &catalog, 0.8, None, 10, now());

        assert_eq!(profile.favored_genres(), vec!["Rock".to_string()]);
        assert!((profile.genre_share("Rock") - 1.0).abs() < 1e-9);
        assert_eq!(profile.favored_artists.len(), 2);
    }

    #[test]
    fn test_genre_affinity_normalized_over_qualifying_plays() {
        let catalog = refs(vec![
            song_ref("rock", "Rock", "a1", 100_000),
            song_ref("regg", "Reggaeton", "a2", 100_000),
        ]);
        let mut plays = Vec::new();
        for _ in 0..7 {
            plays.push(play("rock", Some(100_000), 1));
        }
        for _ in 0..3 {
            plays.push(play("regg", Some(100_000), 1));
        }

        let profile = build_profile(&plays, &catalog, 0.8, None, 10, now());

        let total: f64 = profile.genre_affinity.iter().map(|g| g.share).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((profile.genre_share("Rock") - 0.7).abs() < 1e-9);
        assert!((profile.genre_share("Reggaeton") - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_decay_shifts_affinity_toward_recent_listening() {
        let catalog = refs(vec![
            song_ref("old", "Jazz", "a1", 100_000),
            song_ref("new", "Rock", "a2", 100_000),
        ]);
        // Equal play counts; the Jazz phase is months old
        let plays = vec![
            play("old", Some(100_000), 80),
            play("new", Some(100_000), 1),
        ];

        let profile = build_profile(&plays, &catalog, 0.8, Some(30.0), 10, now());
        assert!(profile.genre_share("Rock") > profile.genre_share("Jazz"));
    }

    #[test]
    fn test_unknown_songs_ignored() {
        let plays = vec![play("ghost", Some(100_000), 1)];
        let profile = build_profile(&plays, &HashMap::new(), 0.8, None, 10, now());
        assert!(profile.is_empty());
    }
}
