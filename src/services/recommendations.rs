use chrono::Utc;
use std::sync::Arc;

use crate::cached;
use crate::db::documents::DocumentSource;
use crate::db::graph::GraphReader;
use crate::db::redis::{CacheKey, FeedCache};
use crate::error::AppResult;
use crate::mapping::MappingConfig;
use crate::models::{EmergingSong, PersonalizedSong, PlayEvent, PreferenceProfile, RankedSong};
use crate::services::preferences::PreferenceAggregator;
use crate::services::ranking::{self, ScoringWeights};

/// Rows fetched from the graph per feed query; ranking then truncates to the
/// requested limit
const CANDIDATE_POOL: i64 = 500;

/// A stored profile older than this is recomputed before personalization
const PROFILE_MAX_AGE_SECS: i64 = 3600;

/// Listener ceiling of the widest emerging tier
const EMERGING_CEILING: i64 = 200_000;

/// Serves the four feeds over the current graph snapshot, with the feed
/// cache in front and chart fallbacks where personalization has nothing to
/// work with.
pub struct RecommendationService {
    reader: Arc<dyn GraphReader>,
    documents: Arc<dyn DocumentSource>,
    aggregator: Arc<PreferenceAggregator>,
    cache: FeedCache,
    mapping: Arc<MappingConfig>,
    weights: ScoringWeights,
    popular_ttl: u64,
    personal_ttl: u64,
}

impl RecommendationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: Arc<dyn GraphReader>,
        documents: Arc<dyn DocumentSource>,
        aggregator: Arc<PreferenceAggregator>,
        cache: FeedCache,
        mapping: Arc<MappingConfig>,
        weights: ScoringWeights,
        popular_ttl: u64,
        personal_ttl: u64,
    ) -> Self {
        Self {
            reader,
            documents,
            aggregator,
            cache,
            mapping,
            weights,
            popular_ttl,
            personal_ttl,
        }
    }

    pub async fn top_global(&self, limit: usize) -> AppResult<Vec<RankedSong>> {
        let key = CacheKey::TopGlobal { limit };
        let ranked = cached!(self.cache, key, self.popular_ttl, {
            let rows = self
                .reader
                .global_song_stats(CANDIDATE_POOL.max(limit as i64))
                .await?;
            ranking::rank_by_popularity(rows, limit)
        });
        Ok(ranked)
    }

    /// Country-scoped charts. Short results are returned short, never
    /// backfilled from the global feed.
    pub async fn top_country(&self, code: &str, limit: usize) -> AppResult<Vec<RankedSong>> {
        let key = CacheKey::TopCountry {
            code: code.to_string(),
            limit,
        };
        let ranked = cached!(self.cache, key, self.popular_ttl, {
            let rows = self
                .reader
                .country_song_stats(code, CANDIDATE_POOL.max(limit as i64))
                .await?;
            ranking::rank_by_popularity(rows, limit)
        });
        Ok(ranked)
    }

    pub async fn for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<PersonalizedSong>> {
        let key = CacheKey::ForUser {
            user_id: user_id.to_string(),
            limit,
        };
        let results = cached!(self.cache, key, self.personal_ttl, {
            let profile = self.profile_for(user_id).await?;
            if profile.is_empty() {
                tracing::debug!(user_id, "Empty profile, serving global charts");
                self.global_fallback(limit).await?
            } else {
                self.personalized(user_id, &profile, limit).await?
            }
        });
        Ok(results)
    }

    pub async fn discover_emerging(
        &self,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<EmergingSong>> {
        let key = CacheKey::Emerging {
            user_id: user_id.to_string(),
            limit,
        };
        let results = cached!(self.cache, key, self.personal_ttl, {
            let profile = self.profile_for(user_id).await?;
            // An empty profile widens discovery to every genre
            let genres = profile.favored_genres();
            let candidates = self
                .reader
                .emerging_candidates(&genres, EMERGING_CEILING, CANDIDATE_POOL)
                .await?;
            ranking::rank_emerging(candidates, Utc::now().date_naive(), limit)
        });
        Ok(results)
    }

    /// Chronological recent plays, straight from the document store
    pub async fn recent_history(&self, user_id: &str, limit: usize) -> AppResult<Vec<PlayEvent>> {
        let rows = self
            .documents
            .recent_plays(user_id.to_string(), limit as i64)
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
        Ok(plays)
    }

    /// Stored profile if fresh enough, otherwise a recompute
    async fn profile_for(&self, user_id: &str) -> AppResult<PreferenceProfile> {
        if let Some(profile) = self.reader.load_profile(user_id).await? {
            let fresh = profile
                .computed_at
                .map(|t| (Utc::now() - t).num_seconds() < PROFILE_MAX_AGE_SECS)
                .unwrap_or(false);
            if fresh {
                return Ok(profile);
            }
        }
        self.aggregator.compute_profile(user_id).await
    }

    async fn global_fallback(&self, limit: usize) -> AppResult<Vec<PersonalizedSong>> {
        let rows = self
            .reader
            .global_song_stats(CANDIDATE_POOL.max(limit as i64))
            .await?;
        Ok(ranking::rank_by_popularity(rows, limit)
            .into_iter()
            .map(|song| PersonalizedSong {
                song,
                score: 0.0,
                reasons: vec!["global-charts".to_string()],
            })
            .collect())
    }

    async fn personalized(
        &self,
        user_id: &str,
        profile: &PreferenceProfile,
        limit: usize,
    ) -> AppResult<Vec<PersonalizedSong>> {
        let genres = profile.favored_genres();
        let artists = profile.favored_artist_ids();
        let candidates = self
            .reader
            .candidates_for_user(user_id, &genres, &artists, CANDIDATE_POOL)
            .await?;

        let mut ranked = ranking::score_for_user(candidates, profile, &self.weights, limit);

        // Candidate pool exhausted: pad the tail from the user's own history,
        // labeled so callers can present it distinctly
        if ranked.len() < limit {
            let needed = limit - ranked.len();
            let listened = self
                .reader
                .listened_ranked(user_id, needed as i64)
                .await?;
            ranked.extend(
                ranking::rank_by_popularity(listened, needed)
                    .into_iter()
                    .map(|song| PersonalizedSong {
                        song,
                        score: 0.0,
                        reasons: vec!["listened-again".to_string()],
                    }),
            );
        }

        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::{Collection, DocumentBatch, DocumentRow};
    use crate::db::graph::GraphWriter;
    use crate::db::redis::create_redis_client;
    use crate::error::AppError;
    use crate::models::{
        Album, Artist, CandidateSong, EmergingCandidate, Follow, Genre, Like, ListenUpsert,
        Song, SongRef, SongStats, User,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn stats(id: &str, genre: &str, plays: i64) -> SongStats {
        SongStats {
            id: id.to_string(),
            title: format!("Song {}", id),
            artist_id: Some(format!("artist-{}", id)),
            artist_name: Some(format!("Artist {}", id)),
            genre: Some(genre.to_string()),
            release_date: Some("2025-01-01".parse().unwrap()),
            play_count: plays,
        }
    }

    #[derive(Default)]
    struct FakeReader {
        global: Vec<SongStats>,
        country: Vec<SongStats>,
        candidates: Vec<CandidateSong>,
        listened: Vec<SongStats>,
        emerging: Vec<EmergingCandidate>,
        profile: Option<PreferenceProfile>,
    }

    #[async_trait]
    impl GraphReader for FakeReader {
        async fn global_song_stats(&self, _limit: i64) -> AppResult<Vec<SongStats>> {
            Ok(self.global.clone())
        }

        async fn country_song_stats(&self, _code: &str, _limit: i64) -> AppResult<Vec<SongStats>> {
            Ok(self.country.clone())
        }

        async fn candidates_for_user(
            &self,
            _user_id: &str,
            _genres: &[String],
            _artist_ids: &[String],
            _limit: i64,
        ) -> AppResult<Vec<CandidateSong>> {
            Ok(self.candidates.clone())
        }

        async fn listened_ranked(&self, _user_id: &str, _limit: i64) -> AppResult<Vec<SongStats>> {
            Ok(self.listened.clone())
        }

        async fn emerging_candidates(
            &self,
            _genres: &[String],
            _max_listeners: i64,
            _limit: i64,
        ) -> AppResult<Vec<EmergingCandidate>> {
            Ok(self.emerging.clone())
        }

        async fn song_refs(&self, _song_ids: &[String]) -> AppResult<Vec<SongRef>> {
            Ok(Vec::new())
        }

        async fn load_profile(&self, _user_id: &str) -> AppResult<Option<PreferenceProfile>> {
            Ok(self.profile.clone())
        }
    }

    struct NoopWriter;

    #[async_trait]
    impl GraphWriter for NoopWriter {
        async fn upsert_genre(&self, _: &Genre, _: DateTime<Utc>) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_artist(&self, _: &Artist, _: DateTime<Utc>) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_album(&self, _: &Album, _: DateTime<Utc>) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_song(&self, _: &Song, _: DateTime<Utc>) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_user(&self, _: &User, _: DateTime<Utc>) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_song_edges(&self, _: &Song) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_listen(&self, _: &ListenUpsert, _: bool) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_follow(&self, _: &Follow) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_like(&self, _: &Like) -> AppResult<()> {
            Ok(())
        }
        async fn delete_stale(&self, _: DateTime<Utc>) -> AppResult<u64> {
            Ok(0)
        }
        async fn replace_profile(&self, _: &str, _: &PreferenceProfile) -> AppResult<()> {
            Ok(())
        }
    }

    struct FakeDocuments {
        plays: Vec<DocumentRow>,
    }

    #[async_trait]
    impl DocumentSource for FakeDocuments {
        async fn fetch_batch(
            &self,
            _collection: Collection,
            _cursor: Option<String>,
            _limit: i64,
            _since: Option<DateTime<Utc>>,
        ) -> AppResult<DocumentBatch> {
            Err(AppError::Internal("not used".to_string()))
        }

        async fn recent_plays(
            &self,
            _user_id: String,
            limit: i64,
        ) -> AppResult<Vec<DocumentRow>> {
            Ok(self.plays.iter().take(limit as usize).cloned().collect())
        }
    }

    fn fresh_profile(genres: &[(&str, f64)]) -> PreferenceProfile {
        PreferenceProfile::from_weights(
            genres.iter().map(|(g, w)| (g.to_string(), *w)).collect(),
            std::collections::HashMap::new(),
            10,
            Utc::now(),
        )
    }

    fn empty_profile() -> PreferenceProfile {
        PreferenceProfile {
            genre_affinity: Vec::new(),
            favored_artists: Vec::new(),
            computed_at: Some(Utc::now()),
        }
    }

    fn service(reader: FakeReader, plays: Vec<DocumentRow>) -> RecommendationService {
        let reader = Arc::new(reader);
        let documents = Arc::new(FakeDocuments { plays });
        let mapping = Arc::new(MappingConfig::default());
        let aggregator = Arc::new(PreferenceAggregator::new(
            documents.clone(),
            reader.clone(),
            Arc::new(NoopWriter),
            mapping.clone(),
            90,
            10,
            0.8,
            None,
        ));
        // Nothing listens on this port; every lookup is a silent cache miss
        let client = create_redis_client("redis://127.0.0.1:1/").unwrap();
        let (cache, _handle) = FeedCache::new(client);

        RecommendationService::new(
            reader,
            documents,
            aggregator,
            cache,
            mapping,
            ScoringWeights::default(),
            600,
            120,
        )
    }

    #[tokio::test]
    async fn test_top_global_ranks_and_truncates() {
        let reader = FakeReader {
            global: vec![stats("s1", "Rock", 5), stats("s2", "Rock", 50), stats("s3", "Pop", 20)],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.top_global(2).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].id, "s2");
        assert_eq!(feed[1].id, "s3");
    }

    #[tokio::test]
    async fn test_top_global_is_deterministic() {
        let reader = FakeReader {
            global: vec![stats("a", "Rock", 5), stats("b", "Rock", 5), stats("c", "Rock", 5)],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let first = svc.top_global(3).await.unwrap();
        let second = svc.top_global(3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_top_country_returned_short_without_backfill() {
        let reader = FakeReader {
            country: vec![stats("s1", "Rock", 9)],
            global: vec![stats("g1", "Rock", 99), stats("g2", "Rock", 98)],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.top_country("AR", 5).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, "s1");
    }

    #[tokio::test]
    async fn test_for_user_empty_profile_serves_global_charts() {
        let reader = FakeReader {
            global: vec![stats("hit", "Pop", 100)],
            profile: Some(empty_profile()),
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.for_user("nobody", 5).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].song.id, "hit");
        assert_eq!(feed[0].reasons, vec!["global-charts".to_string()]);
    }

    #[tokio::test]
    async fn test_for_user_backfills_only_when_pool_exhausted() {
        let reader = FakeReader {
            profile: Some(fresh_profile(&[("Rock", 1.0)])),
            candidates: vec![
                CandidateSong {
                    stats: stats("new1", "Rock", 10),
                    followed_artist: false,
                },
                CandidateSong {
                    stats: stats("new2", "Rock", 8),
                    followed_artist: false,
                },
            ],
            listened: vec![stats("old1", "Rock", 90), stats("old2", "Rock", 80)],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.for_user("u1", 4).await.unwrap();
        assert_eq!(feed.len(), 4);
        // Unlistened candidates first, the labeled backfill after
        assert!(feed[0].reasons.contains(&"genre:Rock".to_string()));
        assert!(feed[1].reasons.contains(&"genre:Rock".to_string()));
        assert_eq!(feed[2].reasons, vec!["listened-again".to_string()]);
        assert_eq!(feed[3].reasons, vec!["listened-again".to_string()]);
    }

    #[tokio::test]
    async fn test_for_user_no_backfill_when_pool_suffices() {
        let reader = FakeReader {
            profile: Some(fresh_profile(&[("Rock", 1.0)])),
            candidates: vec![
                CandidateSong {
                    stats: stats("new1", "Rock", 10),
                    followed_artist: false,
                },
                CandidateSong {
                    stats: stats("new2", "Rock", 8),
                    followed_artist: false,
                },
            ],
            listened: vec![stats("old1", "Rock", 90)],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.for_user("u1", 2).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed
            .iter()
            .all(|e| !e.reasons.contains(&"listened-again".to_string())));
    }

    #[tokio::test]
    async fn test_discover_emerging_labels_tiers() {
        let reader = FakeReader {
            profile: Some(fresh_profile(&[("Rock", 1.0)])),
            emerging: vec![
                EmergingCandidate {
                    stats: stats("small", "Rock", 30),
                    artist_listeners: 9_999,
                },
                EmergingCandidate {
                    stats: stats("mid", "Rock", 30),
                    artist_listeners: 10_000,
                },
            ],
            ..Default::default()
        };
        let svc = service(reader, Vec::new());

        let feed = svc.discover_emerging("u1", 10).await.unwrap();
        assert_eq!(feed.len(), 2);
        let small = feed.iter().find(|e| e.song.id == "small").unwrap();
        let mid = feed.iter().find(|e| e.song.id == "mid").unwrap();
        assert_eq!(small.tier, crate::models::EmergingTier::Rising);
        assert_eq!(mid.tier, crate::models::EmergingTier::Promising);
    }

    #[tokio::test]
    async fn test_recent_history_passthrough_skips_malformed() {
        let plays = vec![
            DocumentRow {
                id: "p1".to_string(),
                doc: json!({"userId": "u1", "songId": "s1", "playedAt": "2025-06-01T12:00:00Z"}),
            },
            DocumentRow {
                id: "p2".to_string(),
                doc: json!({"userId": "u1"}),
            },
        ];
        let svc = service(FakeReader::default(), plays);

        let history = svc.recent_history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].song_id, "s1");
    }
}
