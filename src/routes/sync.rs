use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::request_id::RequestId;
use crate::routes::{ApiResponse, AppState, JobState};
use crate::sync::SyncMode;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub mode: Option<SyncMode>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: Uuid,
    pub mode: SyncMode,
}

fn authorize(headers: &HeaderMap, operator_token: &str) -> AppResult<()> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == operator_token => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// Operator-only: starts a sync run in the background and returns its job id
pub async fn trigger(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Option<Json<TriggerRequest>>,
) -> AppResult<Json<ApiResponse<TriggerResponse>>> {
    authorize(&headers, &state.operator_token)?;

    let mode = body
        .and_then(|Json(request)| request.mode)
        .unwrap_or(SyncMode::Incremental);

    // Claim the single-flight slot before spawning so a concurrent trigger
    // gets its 409 immediately
    let permit = state.sync.try_begin()?;

    let job_id = Uuid::new_v4();
    state.jobs.write().await.insert(
        job_id,
        JobState::Running {
            mode,
            started_at: Utc::now(),
        },
    );

    tracing::info!(request_id = %request_id, job_id = %job_id, mode = %mode, "Sync triggered");

    let orchestrator = state.sync.clone();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let mut report = orchestrator.synchronize(mode).await;
        report.job_id = job_id;
        jobs.write().await.insert(job_id, JobState::Finished { report });
    });

    Ok(Json(ApiResponse::ok(TriggerResponse { job_id, mode })))
}

/// Returns the job's report, or its running marker while the run is in
/// flight
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<JobState>>> {
    let jobs = state.jobs.read().await;
    let job = jobs
        .get(&job_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("unknown sync job {}", job_id)))?;
    Ok(Json(ApiResponse::ok(job)))
}
