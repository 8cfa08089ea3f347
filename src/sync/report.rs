use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Partial,
    Failed,
}

/// Per-entity-type outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    /// Records upserted
    pub synced: u64,
    /// Malformed records skipped
    pub skipped: u64,
    /// Batches dropped after retry exhaustion
    pub failed_batches: u64,
    /// Reads for this type became unreachable and its remaining batches were
    /// abandoned
    pub abandoned: bool,
}

/// Outcome of one sync run, kept in the job registry and returned by the
/// status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: Uuid,
    pub mode: SyncMode,
    pub status: SyncStatus,
    pub counts: BTreeMap<String, EntityOutcome>,
    pub errors: Vec<String>,
    pub stale_deleted: u64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            mode,
            status: SyncStatus::Completed,
            counts: BTreeMap::new(),
            errors: Vec::new(),
            stale_deleted: 0,
            cancelled: false,
            started_at,
            duration_ms: 0,
        }
    }

    fn outcome(&mut self, kind: &str) -> &mut EntityOutcome {
        self.counts.entry(kind.to_string()).or_default()
    }

    pub fn record_synced(&mut self, kind: &str, count: u64) {
        self.outcome(kind).synced += count;
    }

    pub fn record_skipped(&mut self, kind: &str, count: u64) {
        self.outcome(kind).skipped += count;
    }

    pub fn record_failed_batch(&mut self, kind: &str, error: &str) {
        self.outcome(kind).failed_batches += 1;
        self.errors.push(format!("{}: {}", kind, error));
    }

    pub fn record_abandoned(&mut self, kind: &str, error: &str) {
        self.outcome(kind).abandoned = true;
        self.errors.push(format!("{}: abandoned: {}", kind, error));
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// True when no batch has failed or been abandoned so far
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    /// Seals the report: derives the final status and stamps the duration
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        let total_synced: u64 = self.counts.values().map(|o| o.synced).sum();
        self.status = if self.is_clean() {
            SyncStatus::Completed
        } else if total_synced == 0 && !self.errors.is_empty() {
            SyncStatus::Failed
        } else {
            SyncStatus::Partial
        };
        self.duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_run_completes() {
        let mut report = SyncReport::new(SyncMode::Incremental, Utc::now());
        report.record_synced("songs", 40);
        report.finish(Utc::now());
        assert_eq!(report.status, SyncStatus::Completed);
    }

    #[test]
    fn test_errors_with_progress_are_partial() {
        let mut report = SyncReport::new(SyncMode::Full, Utc::now());
        report.record_synced("genres", 5);
        report.record_abandoned("songs", "connection refused");
        report.finish(Utc::now());
        assert_eq!(report.status, SyncStatus::Partial);
        assert!(report.counts["songs"].abandoned);
    }

    #[test]
    fn test_no_progress_with_errors_is_failed() {
        let mut report = SyncReport::new(SyncMode::Full, Utc::now());
        report.record_abandoned("genres", "connection refused");
        report.record_abandoned("artists", "connection refused");
        report.finish(Utc::now());
        assert_eq!(report.status, SyncStatus::Failed);
    }

    #[test]
    fn test_cancelled_run_is_partial() {
        let mut report = SyncReport::new(SyncMode::Full, Utc::now());
        report.record_synced("genres", 5);
        report.mark_cancelled();
        report.finish(Utc::now());
        assert_eq!(report.status, SyncStatus::Partial);
        assert!(report.cancelled);
    }

    #[test]
    fn test_report_serializes_with_lowercase_enums() {
        let mut report = SyncReport::new(SyncMode::Full, Utc::now());
        report.record_failed_batch("plays", "timeout");
        report.finish(Utc::now());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "full");
        assert_eq!(json["status"], "partial");
        assert_eq!(json["counts"]["plays"]["failed_batches"], 1);
    }
}
