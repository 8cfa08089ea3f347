use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{EmergingSong, PersonalizedSong, PlayEvent, RankedSong};
use crate::routes::{ApiResponse, AppState};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

fn parse_limit(params: &LimitQuery) -> AppResult<usize> {
    match params.limit {
        None => Ok(DEFAULT_LIMIT),
        Some(0) => Err(AppError::InvalidInput(
            "limit must be positive".to_string(),
        )),
        Some(n) if n > MAX_LIMIT => Err(AppError::InvalidInput(format!(
            "limit must be at most {}",
            MAX_LIMIT
        ))),
        Some(n) => Ok(n),
    }
}

fn parse_country(code: &str) -> AppResult<String> {
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_uppercase())
    } else {
        Err(AppError::InvalidInput(format!(
            "'{}' is not a two-letter country code",
            code
        )))
    }
}

pub async fn top_global(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<RankedSong>>>> {
    let limit = parse_limit(&params)?;
    let data = state.recommendations.top_global(limit).await?;
    Ok(Json(ApiResponse::ok(data)))
}

pub async fn top_country(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<RankedSong>>>> {
    let limit = parse_limit(&params)?;
    let code = parse_country(&code)?;
    let data = state.recommendations.top_country(&code, limit).await?;
    Ok(Json(ApiResponse::ok(data)))
}

pub async fn for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<PersonalizedSong>>>> {
    let limit = parse_limit(&params)?;
    let data = state.recommendations.for_user(&user_id, limit).await?;
    Ok(Json(ApiResponse::ok(data)))
}

pub async fn discover_emerging(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<EmergingSong>>>> {
    let limit = parse_limit(&params)?;
    let data = state
        .recommendations
        .discover_emerging(&user_id, limit)
        .await?;
    Ok(Json(ApiResponse::ok(data)))
}

pub async fn recent_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<PlayEvent>>>> {
    let limit = parse_limit(&params)?;
    let data = state.recommendations.recent_history(&user_id, limit).await?;
    Ok(Json(ApiResponse::ok(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults() {
        assert_eq!(parse_limit(&LimitQuery { limit: None }).unwrap(), 20);
        assert_eq!(parse_limit(&LimitQuery { limit: Some(7) }).unwrap(), 7);
    }

    #[test]
    fn test_limit_bounds() {
        assert!(parse_limit(&LimitQuery { limit: Some(0) }).is_err());
        assert!(parse_limit(&LimitQuery { limit: Some(101) }).is_err());
        assert_eq!(parse_limit(&LimitQuery { limit: Some(100) }).unwrap(), 100);
    }

    #[test]
    fn test_country_code_validation() {
        assert_eq!(parse_country("ar").unwrap(), "AR");
        assert_eq!(parse_country("US").unwrap(), "US");
        assert!(parse_country("usa").is_err());
        assert!(parse_country("1x").is_err());
        assert!(parse_country("").is_err());
    }
}
