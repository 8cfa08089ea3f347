//! Sync Orchestrator
//!
//! Projects the document store into the graph. Entity types run strictly in
//! dependency order (nodes before the edges that reference them); batches
//! within a type run on a bounded worker pool. Failures are contained: a
//! malformed record is skipped, a failed batch is retried then dropped, an
//! unreachable collection is abandoned while later types still run.

use chrono::{DateTime, Utc};
use futures::stream::{self, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::db::documents::{Collection, DocumentBatch, DocumentSource};
use crate::db::graph::GraphWriter;
use crate::error::{AppError, AppResult};
use crate::mapping::MappingConfig;
use crate::models::{Album, Artist, Follow, Genre, Like, ListenUpsert, PlayEvent, Song, User};

pub mod report;
pub mod retry;

pub use report::{EntityOutcome, SyncMode, SyncReport, SyncStatus};
pub use retry::RetryPolicy;

/// One scan-and-upsert pass of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Nodes(Collection),
    SongEdges,
    Likes,
    Follows,
}

impl Phase {
    fn collection(&self) -> Collection {
        match self {
            Phase::Nodes(collection) => *collection,
            Phase::SongEdges => Collection::Songs,
            Phase::Likes => Collection::Likes,
            Phase::Follows => Collection::Follows,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Phase::Nodes(collection) => collection.table(),
            Phase::SongEdges => "song_edges",
            Phase::Likes => "likes",
            Phase::Follows => "follows",
        }
    }
}

/// A decoded record ready to upsert
enum WorkItem {
    Genre(Genre),
    Artist(Artist),
    Album(Album),
    Song(Song),
    User(User),
    SongEdges(Song),
    Like(Like),
    Follow(Follow),
}

/// Collapses raw play events into one weighted (user, song) upsert each:
/// play count plus most-recent timestamp. Output order is deterministic.
pub fn aggregate_plays(plays: &[PlayEvent]) -> Vec<ListenUpsert> {
    let mut merged: HashMap<(String, String), (i64, DateTime<Utc>)> = HashMap::new();
    for play in plays {
        let entry = merged
            .entry((play.user_id.clone(), play.song_id.clone()))
            .or_insert((0, play.played_at));
        entry.0 += 1;
        if play.played_at > entry.1 {
            entry.1 = play.played_at;
        }
    }

    let mut listens: Vec<ListenUpsert> = merged
        .into_iter()
        .map(|((user_id, song_id), (count, last_played))| ListenUpsert {
            user_id,
            song_id,
            count,
            last_played,
        })
        .collect();
    listens.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.song_id.cmp(&b.song_id))
    });
    listens
}

pub struct SyncOrchestrator {
    documents: Arc<dyn DocumentSource>,
    graph: Arc<dyn GraphWriter>,
    mapping: Arc<MappingConfig>,
    batch_size: i64,
    workers: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    single_flight: Arc<Semaphore>,
    /// Start time of the last clean run; incremental reads filter past it
    watermark: Mutex<Option<DateTime<Utc>>>,
}

impl SyncOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentSource>,
        graph: Arc<dyn GraphWriter>,
        mapping: Arc<MappingConfig>,
        batch_size: i64,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            documents,
            graph,
            mapping,
            batch_size,
            workers: workers.max(1),
            retry,
            cancel: CancellationToken::new(),
            single_flight: Arc::new(Semaphore::new(1)),
            watermark: Mutex::new(None),
        }
    }

    /// Claims the single-flight slot for a run; fails with `SyncConflict`
    /// while another run holds it
    pub fn try_begin(&self) -> AppResult<OwnedSemaphorePermit> {
        self.single_flight
            .clone()
            .try_acquire_owned()
            .map_err(|_| AppError::SyncConflict)
    }

    /// Requests cooperative cancellation; honored between batches
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn synchronize(&self, mode: SyncMode) -> SyncReport {
        let started = Utc::now();
        let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => *self.watermark.lock().await,
        };
        let mut report = SyncReport::new(mode, started);
        tracing::info!(mode = %mode, since = ?since, "Sync run started");

        // Nodes strictly before edges: edge upserts MATCH their endpoints
        let phases = [
            Phase::Nodes(Collection::Genres),
            Phase::Nodes(Collection::Artists),
            Phase::Nodes(Collection::Albums),
            Phase::Nodes(Collection::Songs),
            Phase::Nodes(Collection::Users),
            Phase::SongEdges,
            Phase::Likes,
            Phase::Follows,
        ];
        for phase in phases {
            if self.check_cancelled(&mut report) {
                break;
            }
            self.sync_phase(phase, since, started, &mut report).await;
        }
        if !self.check_cancelled(&mut report) {
            self.sync_listens(mode, since, &mut report).await;
        }

        // Stale nodes go only on a clean full resync; deleting after a partial
        // run would drop records whose batches merely failed
        if mode == SyncMode::Full && report.is_clean() {
            match self.graph.delete_stale(started).await {
                Ok(removed) => {
                    report.stale_deleted = removed;
                    if removed > 0 {
                        tracing::info!(removed, "Stale nodes deleted");
                    }
                }
                Err(e) => report.record_failed_batch("cleanup", &e.to_string()),
            }
        }

        if report.is_clean() {
            *self.watermark.lock().await = Some(started);
        }

        report.finish(Utc::now());
        tracing::info!(
            status = ?report.status,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Sync run finished"
        );
        report
    }

    fn check_cancelled(&self, report: &mut SyncReport) -> bool {
        if self.cancel.is_cancelled() {
            if !report.cancelled {
                tracing::warn!("Sync cancelled, stopping between batches");
                report.mark_cancelled();
            }
            true
        } else {
            false
        }
    }

    /// One page of a collection, with the batch retry policy applied to the
    /// read itself
    async fn fetch_page(
        &self,
        collection: Collection,
        cursor: &Option<String>,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<DocumentBatch> {
        self.retry
            .run(|| {
                let cursor = cursor.clone();
                async move {
                    self.documents
                        .fetch_batch(collection, cursor, self.batch_size, since)
                        .await
                }
            })
            .await
    }

    async fn sync_phase(
        &self,
        phase: Phase,
        since: Option<DateTime<Utc>>,
        run: DateTime<Utc>,
        report: &mut SyncReport,
    ) {
        let kind = phase.kind();
        let mut cursor: Option<String> = None;

        loop {
            if self.check_cancelled(report) {
                return;
            }

            let batch = match self.fetch_page(phase.collection(), &cursor, since).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(kind, error = %e, "Collection unreachable, abandoning type");
                    report.record_abandoned(kind, &e.to_string());
                    return;
                }
            };
            if batch.rows.is_empty() {
                break;
            }

            let mut items = Vec::with_capacity(batch.rows.len());
            for row in &batch.rows {
                match self.decode_item(phase, row) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        tracing::warn!(kind, id = %row.id, error = %e, "Skipping malformed record");
                        report.record_skipped(kind, 1);
                    }
                }
            }

            match self.retry.run(|| self.upsert_items(&items, run)).await {
                Ok(()) => report.record_synced(kind, items.len() as u64),
                Err(e) => {
                    tracing::error!(kind, error = %e, "Batch dropped after retries");
                    report.record_failed_batch(kind, &e.to_string());
                }
            }

            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }

    /// LISTENED edges. Incremental runs add per-batch deltas; a full run
    /// aggregates the whole history first and writes absolute weights.
    async fn sync_listens(
        &self,
        mode: SyncMode,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) {
        let kind = "listens";
        let absolute = mode == SyncMode::Full;
        let mut cursor: Option<String> = None;
        let mut history: Vec<PlayEvent> = Vec::new();

        loop {
            if self.check_cancelled(report) {
                return;
            }

            let batch = match self.fetch_page(Collection::Plays, &cursor, since).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(kind, error = %e, "Collection unreachable, abandoning type");
                    report.record_abandoned(kind, &e.to_string());
                    return;
                }
            };
            if batch.rows.is_empty() {
                break;
            }

            let mut plays = Vec::with_capacity(batch.rows.len());
            for row in &batch.rows {
                match self.mapping.play(row) {
                    Ok(play) => plays.push(play),
                    Err(e) => {
                        tracing::warn!(kind, id = %row.id, error = %e, "Skipping malformed record");
                        report.record_skipped(kind, 1);
                    }
                }
            }

            if absolute {
                history.extend(plays);
            } else {
                let listens = aggregate_plays(&plays);
                match self
                    .retry
                    .run(|| self.upsert_listen_batch(&listens, false))
                    .await
                {
                    Ok(()) => report.record_synced(kind, listens.len() as u64),
                    Err(e) => {
                        tracing::error!(kind, error = %e, "Batch dropped after retries");
                        report.record_failed_batch(kind, &e.to_string());
                    }
                }
            }

            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if absolute {
            let listens = aggregate_plays(&history);
            for chunk in listens.chunks(self.batch_size.max(1) as usize) {
                if self.check_cancelled(report) {
                    return;
                }
                match self
                    .retry
                    .run(|| self.upsert_listen_batch(chunk, true))
                    .await
                {
                    Ok(()) => report.record_synced(kind, chunk.len() as u64),
                    Err(e) => {
                        tracing::error!(kind, error = %e, "Batch dropped after retries");
                        report.record_failed_batch(kind, &e.to_string());
                    }
                }
            }
        }
    }

    fn decode_item(&self, phase: Phase, row: &crate::db::documents::DocumentRow) -> AppResult<WorkItem> {
        match phase {
            Phase::Nodes(Collection::Genres) => self.mapping.genre(row).map(WorkItem::Genre),
            Phase::Nodes(Collection::Artists) => self.mapping.artist(row).map(WorkItem::Artist),
            Phase::Nodes(Collection::Albums) => self.mapping.album(row).map(WorkItem::Album),
            Phase::Nodes(Collection::Songs) => self.mapping.song(row).map(WorkItem::Song),
            Phase::Nodes(Collection::Users) => self.mapping.user(row).map(WorkItem::User),
            Phase::SongEdges => self.mapping.song(row).map(WorkItem::SongEdges),
            Phase::Likes => self.mapping.like(row).map(WorkItem::Like),
            Phase::Follows => self.mapping.follow(row).map(WorkItem::Follow),
            Phase::Nodes(other) => Err(AppError::Internal(format!(
                "{} is not a node collection",
                other
            ))),
        }
    }

    /// Upserts one decoded batch on the bounded worker pool
    async fn upsert_items(&self, items: &[WorkItem], run: DateTime<Utc>) -> AppResult<()> {
        stream::iter(items.iter().map(Ok::<_, AppError>))
            .try_for_each_concurrent(self.workers, |item| self.upsert_item(item, run))
            .await
    }

    async fn upsert_item(&self, item: &WorkItem, run: DateTime<Utc>) -> AppResult<()> {
        match item {
            WorkItem::Genre(genre) => self.graph.upsert_genre(genre, run).await,
            WorkItem::Artist(artist) => self.graph.upsert_artist(artist, run).await,
            WorkItem::Album(album) => self.graph.upsert_album(album, run).await,
            WorkItem::Song(song) => self.graph.upsert_song(song, run).await,
            WorkItem::User(user) => self.graph.upsert_user(user, run).await,
            WorkItem::SongEdges(song) => self.graph.upsert_song_edges(song).await,
            WorkItem::Like(like) => self.graph.upsert_like(like).await,
            WorkItem::Follow(follow) => self.graph.upsert_follow(follow).await,
        }
    }

    async fn upsert_listen_batch(
        &self,
        listens: &[ListenUpsert],
        absolute: bool,
    ) -> AppResult<()> {
        stream::iter(listens.iter().map(Ok::<_, AppError>))
            .try_for_each_concurrent(self.workers, |listen| {
                self.graph.upsert_listen(listen, absolute)
            })
            .await
    }
}
