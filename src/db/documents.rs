use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::error::AppResult;

/// Source collections of the document store, in a fixed table-name mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Genres,
    Artists,
    Albums,
    Songs,
    Users,
    Plays,
    Likes,
    Follows,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Genres => "genres",
            Collection::Artists => "artists",
            Collection::Albums => "albums",
            Collection::Songs => "songs",
            Collection::Users => "users",
            Collection::Plays => "plays",
            Collection::Likes => "likes",
            Collection::Follows => "follows",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table())
    }
}

/// One raw document with the row key the store assigned
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub id: String,
    pub doc: Value,
}

/// One cursor page of a collection scan
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentBatch {
    pub rows: Vec<DocumentRow>,
    /// Pass back to fetch the next page; `None` when the scan is done
    pub next_cursor: Option<String>,
}

/// Read side of the document store, as consumed by the sync pipeline and the
/// recent-history pass-through
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// One id-ordered page of a collection. `since` restricts to records
    /// updated after the watermark (incremental sync).
    async fn fetch_batch(
        &self,
        collection: Collection,
        cursor: Option<String>,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<DocumentBatch>;

    /// Raw play documents for one user, most recent first
    async fn recent_plays(&self, user_id: String, limit: i64) -> AppResult<Vec<DocumentRow>>;
}

/// Pooled reader over the document store's JSONB collection tables
#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentSource for DocumentStore {
    async fn fetch_batch(
        &self,
        collection: Collection,
        cursor: Option<String>,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<DocumentBatch> {
        let sql = format!(
            "SELECT id, doc FROM {} \
             WHERE ($1::text IS NULL OR id > $1) \
               AND ($2::timestamptz IS NULL OR updated_at > $2) \
             ORDER BY id \
             LIMIT $3",
            collection.table()
        );

        let rows = sqlx::query(&sql)
            .bind(cursor)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DocumentRow {
                id: row.try_get("id")?,
                doc: row.try_get("doc")?,
            });
        }

        // A short page means the scan is exhausted
        let next_cursor = if (out.len() as i64) < limit {
            None
        } else {
            out.last().map(|r| r.id.clone())
        };

        Ok(DocumentBatch {
            rows: out,
            next_cursor,
        })
    }

    async fn recent_plays(&self, user_id: String, limit: i64) -> AppResult<Vec<DocumentRow>> {
        // Match the user reference across schema revisions; order by whichever
        // timestamp field the record carries (ISO strings sort correctly).
        let rows = sqlx::query(
            "SELECT id, doc FROM plays \
             WHERE COALESCE(doc->>'userId', doc->>'user_id', doc->>'user') = $1 \
             ORDER BY COALESCE(doc->>'playedAt', doc->>'played_at', doc->>'timestamp') DESC NULLS LAST, id DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DocumentRow {
                id: row.try_get("id")?,
                doc: row.try_get("doc")?,
            });
        }
        Ok(out)
    }
}
