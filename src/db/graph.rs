use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use neo4rs::{query, ConfigBuilder, Graph};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{
    Album, Artist, CandidateSong, EmergingCandidate, Follow, Genre, Like, ListenUpsert,
    PreferenceProfile, Song, SongRef, SongStats, User,
};

/// Write side of the graph store, as driven by the sync pipeline
#[async_trait]
pub trait GraphWriter: Send + Sync {
    async fn upsert_genre(&self, genre: &Genre, run: DateTime<Utc>) -> AppResult<()>;
    async fn upsert_artist(&self, artist: &Artist, run: DateTime<Utc>) -> AppResult<()>;
    async fn upsert_album(&self, album: &Album, run: DateTime<Utc>) -> AppResult<()>;
    async fn upsert_song(&self, song: &Song, run: DateTime<Utc>) -> AppResult<()>;
    async fn upsert_user(&self, user: &User, run: DateTime<Utc>) -> AppResult<()>;

    /// PERFORMED_BY / BELONGS_TO / RELEASED_ON edges for one song; endpoint
    /// nodes must already exist
    async fn upsert_song_edges(&self, song: &Song) -> AppResult<()>;

    /// One aggregated LISTENED edge. `absolute` replaces the weight (full
    /// resync); otherwise the count is added to the existing weight.
    async fn upsert_listen(&self, listen: &ListenUpsert, absolute: bool) -> AppResult<()>;

    async fn upsert_follow(&self, follow: &Follow) -> AppResult<()>;
    async fn upsert_like(&self, like: &Like) -> AppResult<()>;

    /// Removes nodes not stamped by the current run. Full resync only.
    async fn delete_stale(&self, run: DateTime<Utc>) -> AppResult<u64>;

    /// Replaces the user's Profile node wholesale in one statement
    async fn replace_profile(&self, user_id: &str, profile: &PreferenceProfile)
        -> AppResult<()>;
}

/// Read side of the graph store, as consumed by the query engine and the
/// preference aggregator
#[async_trait]
pub trait GraphReader: Send + Sync {
    async fn global_song_stats(&self, limit: i64) -> AppResult<Vec<SongStats>>;
    async fn country_song_stats(&self, code: &str, limit: i64) -> AppResult<Vec<SongStats>>;

    /// Unlistened songs matching the user's favored genres or artists
    async fn candidates_for_user(
        &self,
        user_id: &str,
        genres: &[String],
        artist_ids: &[String],
        limit: i64,
    ) -> AppResult<Vec<CandidateSong>>;

    /// The user's already-listened songs ranked by global plays (backfill)
    async fn listened_ranked(&self, user_id: &str, limit: i64) -> AppResult<Vec<SongStats>>;

    /// Songs by artists under `max_listeners` distinct listeners, optionally
    /// restricted to the given genres
    async fn emerging_candidates(
        &self,
        genres: &[String],
        max_listeners: i64,
        limit: i64,
    ) -> AppResult<Vec<EmergingCandidate>>;

    async fn song_refs(&self, song_ids: &[String]) -> AppResult<Vec<SongRef>>;
    async fn load_profile(&self, user_id: &str) -> AppResult<Option<PreferenceProfile>>;
}

/// Pooled Neo4j adapter
pub struct GraphStore {
    graph: Arc<Graph>,
}

fn date_param(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.filter(|s| !s.is_empty()).and_then(|s| s.parse().ok())
}

fn stats_from_row(row: &neo4rs::Row) -> AppResult<SongStats> {
    Ok(SongStats {
        id: row.get("id")?,
        title: row.get("title")?,
        artist_id: row.get::<String>("artist_id").ok(),
        artist_name: row.get::<String>("artist_name").ok(),
        genre: row.get::<String>("genre").ok(),
        release_date: parse_date(row.get::<String>("release_date").ok()),
        play_count: row.get("play_count")?,
    })
}

impl GraphStore {
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        pool_size: usize,
    ) -> anyhow::Result<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .max_connections(pool_size)
            .build()?;
        let graph = Graph::connect(config).await?;

        let store = Self {
            graph: Arc::new(graph),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Uniqueness constraints back the upsert-by-id invariant
    async fn init_schema(&self) -> anyhow::Result<()> {
        let constraints = [
            "CREATE CONSTRAINT genre_id IF NOT EXISTS FOR (g:Genre) REQUIRE g.id IS UNIQUE",
            "CREATE CONSTRAINT artist_id IF NOT EXISTS FOR (a:Artist) REQUIRE a.id IS UNIQUE",
            "CREATE CONSTRAINT album_id IF NOT EXISTS FOR (al:Album) REQUIRE al.id IS UNIQUE",
            "CREATE CONSTRAINT song_id IF NOT EXISTS FOR (s:Song) REQUIRE s.id IS UNIQUE",
            "CREATE CONSTRAINT user_id IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
            "CREATE CONSTRAINT profile_user IF NOT EXISTS FOR (p:Profile) REQUIRE p.user_id IS UNIQUE",
        ];
        for constraint in constraints {
            self.graph.run(query(constraint)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl GraphWriter for GraphStore {
    async fn upsert_genre(&self, genre: &Genre, run: DateTime<Utc>) -> AppResult<()> {
        let q = query(
            r#"
            MERGE (g:Genre {id: $id})
            SET g.name = $name, g.last_synced = $run
            "#,
        )
        .param("id", genre.id.clone())
        .param("name", genre.name.clone())
        .param("run", run.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_artist(&self, artist: &Artist, run: DateTime<Utc>) -> AppResult<()> {
        let q = query(
            r#"
            MERGE (a:Artist {id: $id})
            SET a.name = $name, a.country = $country, a.last_synced = $run
            "#,
        )
        .param("id", artist.id.clone())
        .param("name", artist.name.clone())
        .param("country", artist.country.clone().unwrap_or_default())
        .param("run", run.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_album(&self, album: &Album, run: DateTime<Utc>) -> AppResult<()> {
        let q = query(
            r#"
            MERGE (al:Album {id: $id})
            SET al.title = $title, al.release_date = $release_date, al.last_synced = $run
            "#,
        )
        .param("id", album.id.clone())
        .param("title", album.title.clone())
        .param("release_date", date_param(album.release_date))
        .param("run", run.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_song(&self, song: &Song, run: DateTime<Utc>) -> AppResult<()> {
        let q = query(
            r#"
            MERGE (s:Song {id: $id})
            SET s.title = $title,
                s.duration_ms = $duration_ms,
                s.release_date = $release_date,
                s.last_synced = $run
            "#,
        )
        .param("id", song.id.clone())
        .param("title", song.title.clone())
        .param("duration_ms", song.duration_ms.unwrap_or(0))
        .param("release_date", date_param(song.release_date))
        .param("run", run.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User, run: DateTime<Utc>) -> AppResult<()> {
        let q = query(
            r#"
            MERGE (u:User {id: $id})
            SET u.username = $username, u.country = $country, u.last_synced = $run
            "#,
        )
        .param("id", user.id.clone())
        .param("username", user.username.clone().unwrap_or_default())
        .param("country", user.country.clone().unwrap_or_default())
        .param("run", run.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_song_edges(&self, song: &Song) -> AppResult<()> {
        if let Some(artist_id) = &song.artist_id {
            let q = query(
                r#"
                MATCH (s:Song {id: $song_id})
                MATCH (a:Artist {id: $artist_id})
                MERGE (s)-[:PERFORMED_BY]->(a)
                "#,
            )
            .param("song_id", song.id.clone())
            .param("artist_id", artist_id.clone());
            self.graph.run(q).await?;
        }

        if let Some(genre) = &song.genre {
            // The source field may carry a genre id or a plain name
            let q = query(
                r#"
                MATCH (s:Song {id: $song_id})
                MATCH (g:Genre) WHERE g.id = $genre OR g.name = $genre
                MERGE (s)-[:BELONGS_TO]->(g)
                "#,
            )
            .param("song_id", song.id.clone())
            .param("genre", genre.clone());
            self.graph.run(q).await?;
        }

        if let Some(album_id) = &song.album_id {
            let q = query(
                r#"
                MATCH (s:Song {id: $song_id})
                MATCH (al:Album {id: $album_id})
                MERGE (s)-[:RELEASED_ON]->(al)
                "#,
            )
            .param("song_id", song.id.clone())
            .param("album_id", album_id.clone());
            self.graph.run(q).await?;
        }

        Ok(())
    }

    async fn upsert_listen(&self, listen: &ListenUpsert, absolute: bool) -> AppResult<()> {
        // RFC 3339 UTC strings compare correctly as strings
        let cypher = if absolute {
            r#"
            MATCH (u:User {id: $user_id})
            MATCH (s:Song {id: $song_id})
            MERGE (u)-[l:LISTENED]->(s)
            SET l.weight = $count, l.last_played = $last_played
            "#
        } else {
            r#"
            MATCH (u:User {id: $user_id})
            MATCH (s:Song {id: $song_id})
            MERGE (u)-[l:LISTENED]->(s)
            ON CREATE SET l.weight = $count, l.last_played = $last_played
            ON MATCH SET l.weight = l.weight + $count,
                         l.last_played = CASE
                             WHEN l.last_played < $last_played THEN $last_played
                             ELSE l.last_played
                         END
            "#
        };

        let q = query(cypher)
            .param("user_id", listen.user_id.clone())
            .param("song_id", listen.song_id.clone())
            .param("count", listen.count)
            .param("last_played", listen.last_played.to_rfc3339());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_follow(&self, follow: &Follow) -> AppResult<()> {
        let q = query(
            r#"
            MATCH (u:User {id: $user_id})
            MATCH (a:Artist {id: $artist_id})
            MERGE (u)-[:FOLLOWS]->(a)
            "#,
        )
        .param("user_id", follow.user_id.clone())
        .param("artist_id", follow.artist_id.clone());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn upsert_like(&self, like: &Like) -> AppResult<()> {
        let q = query(
            r#"
            MATCH (u:User {id: $user_id})
            MATCH (s:Song {id: $song_id})
            MERGE (u)-[:LIKES]->(s)
            "#,
        )
        .param("user_id", like.user_id.clone())
        .param("song_id", like.song_id.clone());

        self.graph.run(q).await?;
        Ok(())
    }

    async fn delete_stale(&self, run: DateTime<Utc>) -> AppResult<u64> {
        let q = query(
            r#"
            MATCH (n)
            WHERE (n:Genre OR n:Artist OR n:Album OR n:Song OR n:User)
              AND (n.last_synced IS NULL OR n.last_synced < $run)
            DETACH DELETE n
            RETURN count(n) AS removed
            "#,
        )
        .param("run", run.to_rfc3339());

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            Ok(row.get::<i64>("removed")? as u64)
        } else {
            Ok(0)
        }
    }

    async fn replace_profile(
        &self,
        user_id: &str,
        profile: &PreferenceProfile,
    ) -> AppResult<()> {
        let genre_affinity = serde_json::to_string(&profile.genre_affinity)
            .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
        let favored_artists = serde_json::to_string(&profile.favored_artists)
            .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;

        // Delete-then-create in one statement so readers see old or new,
        // never a blend
        let q = query(
            r#"
            MATCH (u:User {id: $user_id})
            OPTIONAL MATCH (u)-[:HAS_PROFILE]->(old:Profile)
            DETACH DELETE old
            MERGE (u)-[:HAS_PROFILE]->(p:Profile {user_id: $user_id})
            SET p.genre_affinity = $genre_affinity,
                p.favored_artists = $favored_artists,
                p.computed_at = $computed_at
            "#,
        )
        .param("user_id", user_id)
        .param("genre_affinity", genre_affinity)
        .param("favored_artists", favored_artists)
        .param(
            "computed_at",
            profile
                .computed_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        );

        self.graph.run(q).await?;
        Ok(())
    }
}

#[async_trait]
impl GraphReader for GraphStore {
    async fn global_song_stats(&self, limit: i64) -> AppResult<Vec<SongStats>> {
        let q = query(
            r#"
            MATCH (s:Song)
            OPTIONAL MATCH (s)-[:PERFORMED_BY]->(a:Artist)
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            OPTIONAL MATCH (:User)-[l:LISTENED]->(s)
            WITH s, a, g, coalesce(sum(l.weight), 0) AS plays
            RETURN s.id AS id, s.title AS title, g.name AS genre,
                   s.release_date AS release_date,
                   a.id AS artist_id, a.name AS artist_name,
                   plays AS play_count
            ORDER BY plays DESC, s.release_date DESC, s.id ASC
            LIMIT $limit
            "#,
        )
        .param("limit", limit);

        let mut result = self.graph.execute(q).await?;
        let mut stats = Vec::new();
        while let Some(row) = result.next().await? {
            stats.push(stats_from_row(&row)?);
        }
        Ok(stats)
    }

    async fn country_song_stats(&self, code: &str, limit: i64) -> AppResult<Vec<SongStats>> {
        let q = query(
            r#"
            MATCH (u:User)-[l:LISTENED]->(s:Song)
            WHERE u.country = $code
            OPTIONAL MATCH (s)-[:PERFORMED_BY]->(a:Artist)
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            WITH s, a, g, sum(l.weight) AS plays
            RETURN s.id AS id, s.title AS title, g.name AS genre,
                   s.release_date AS release_date,
                   a.id AS artist_id, a.name AS artist_name,
                   plays AS play_count
            ORDER BY plays DESC, s.release_date DESC, s.id ASC
            LIMIT $limit
            "#,
        )
        .param("code", code.to_uppercase())
        .param("limit", limit);

        let mut result = self.graph.execute(q).await?;
        let mut stats = Vec::new();
        while let Some(row) = result.next().await? {
            stats.push(stats_from_row(&row)?);
        }
        Ok(stats)
    }

    async fn candidates_for_user(
        &self,
        user_id: &str,
        genres: &[String],
        artist_ids: &[String],
        limit: i64,
    ) -> AppResult<Vec<CandidateSong>> {
        let q = query(
            r#"
            MATCH (u:User {id: $user_id})
            MATCH (s:Song)-[:PERFORMED_BY]->(a:Artist)
            WHERE NOT exists((u)-[:LISTENED]->(s))
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            WITH u, s, a, g,
                 (g IS NOT NULL AND g.name IN $genres) AS genre_hit,
                 a.id IN $artists AS artist_hit,
                 exists((u)-[:FOLLOWS]->(a)) AS followed
            WHERE genre_hit OR artist_hit OR followed
            OPTIONAL MATCH (:User)-[l:LISTENED]->(s)
            WITH s, a, g, followed, coalesce(sum(l.weight), 0) AS plays
            RETURN s.id AS id, s.title AS title, g.name AS genre,
                   s.release_date AS release_date,
                   a.id AS artist_id, a.name AS artist_name,
                   plays AS play_count, followed AS followed
            ORDER BY plays DESC, s.id ASC
            LIMIT $limit
            "#,
        )
        .param("user_id", user_id)
        .param("genres", genres.to_vec())
        .param("artists", artist_ids.to_vec())
        .param("limit", limit);

        let mut result = self.graph.execute(q).await?;
        let mut candidates = Vec::new();
        while let Some(row) = result.next().await? {
            candidates.push(CandidateSong {
                stats: stats_from_row(&row)?,
                followed_artist: row.get("followed")?,
            });
        }
        Ok(candidates)
    }

    async fn listened_ranked(&self, user_id: &str, limit: i64) -> AppResult<Vec<SongStats>> {
        let q = query(
            r#"
            MATCH (u:User {id: $user_id})-[:LISTENED]->(s:Song)
            OPTIONAL MATCH (s)-[:PERFORMED_BY]->(a:Artist)
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            OPTIONAL MATCH (:User)-[l:LISTENED]->(s)
            WITH s, a, g, coalesce(sum(l.weight), 0) AS plays
            RETURN s.id AS id, s.title AS title, g.name AS genre,
                   s.release_date AS release_date,
                   a.id AS artist_id, a.name AS artist_name,
                   plays AS play_count
            ORDER BY plays DESC, s.id ASC
            LIMIT $limit
            "#,
        )
        .param("user_id", user_id)
        .param("limit", limit);

        let mut result = self.graph.execute(q).await?;
        let mut stats = Vec::new();
        while let Some(row) = result.next().await? {
            stats.push(stats_from_row(&row)?);
        }
        Ok(stats)
    }

    async fn emerging_candidates(
        &self,
        genres: &[String],
        max_listeners: i64,
        limit: i64,
    ) -> AppResult<Vec<EmergingCandidate>> {
        let q = query(
            r#"
            MATCH (s:Song)-[:PERFORMED_BY]->(a:Artist)
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            WITH s, a, g
            OPTIONAL MATCH (listener:User)-[:LISTENED]->(:Song)-[:PERFORMED_BY]->(a)
            WITH s, a, g, count(DISTINCT listener) AS listeners
            WHERE listeners < $max_listeners
              AND (size($genres) = 0 OR (g IS NOT NULL AND g.name IN $genres))
            OPTIONAL MATCH (:User)-[l:LISTENED]->(s)
            WITH s, a, g, listeners, coalesce(sum(l.weight), 0) AS plays
            RETURN s.id AS id, s.title AS title, g.name AS genre,
                   s.release_date AS release_date,
                   a.id AS artist_id, a.name AS artist_name,
                   plays AS play_count, listeners AS artist_listeners
            ORDER BY plays DESC, s.id ASC
            LIMIT $limit
            "#,
        )
        .param("genres", genres.to_vec())
        .param("max_listeners", max_listeners)
        .param("limit", limit);

        let mut result = self.graph.execute(q).await?;
        let mut candidates = Vec::new();
        while let Some(row) = result.next().await? {
            candidates.push(EmergingCandidate {
                stats: stats_from_row(&row)?,
                artist_listeners: row.get("artist_listeners")?,
            });
        }
        Ok(candidates)
    }

    async fn song_refs(&self, song_ids: &[String]) -> AppResult<Vec<SongRef>> {
        let q = query(
            r#"
            MATCH (s:Song) WHERE s.id IN $ids
            OPTIONAL MATCH (s)-[:BELONGS_TO]->(g:Genre)
            OPTIONAL MATCH (s)-[:PERFORMED_BY]->(a:Artist)
            RETURN s.id AS id, g.name AS genre,
                   a.id AS artist_id, a.name AS artist_name,
                   s.duration_ms AS duration_ms
            "#,
        )
        .param("ids", song_ids.to_vec());

        let mut result = self.graph.execute(q).await?;
        let mut refs = Vec::new();
        while let Some(row) = result.next().await? {
            let duration = row.get::<i64>("duration_ms").unwrap_or(0);
            refs.push(SongRef {
                id: row.get("id")?,
                genre: row.get::<String>("genre").ok(),
                artist_id: row.get::<String>("artist_id").ok(),
                artist_name: row.get::<String>("artist_name").ok(),
                duration_ms: (duration > 0).then_some(duration),
            });
        }
        Ok(refs)
    }

    async fn load_profile(&self, user_id: &str) -> AppResult<Option<PreferenceProfile>> {
        let q = query(
            r#"
            MATCH (:User {id: $user_id})-[:HAS_PROFILE]->(p:Profile)
            RETURN p.genre_affinity AS genre_affinity,
                   p.favored_artists AS favored_artists,
                   p.computed_at AS computed_at
            "#,
        )
        .param("user_id", user_id);

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let genre_affinity = serde_json::from_str(&row.get::<String>("genre_affinity")?)
                .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
            let favored_artists = serde_json::from_str(&row.get::<String>("favored_artists")?)
                .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
            let computed_at = row
                .get::<String>("computed_at")
                .ok()
                .and_then(|s| s.parse::<DateTime<Utc>>().ok());

            Ok(Some(PreferenceProfile {
                genre_affinity,
                favored_artists,
                computed_at,
            }))
        } else {
            Ok(None)
        }
    }
}
