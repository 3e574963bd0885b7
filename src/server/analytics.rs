//! Traffic analysis, ledger, metrics and recommendation endpoints.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::extract::{ApiQuery, CurrentUser};
use super::{run_blocking, AppState};
use crate::analytics::metrics::{validate_limit, DEFAULT_LIMIT};
use crate::analytics::{get_metrics, get_metrics_by_location, recommendations, truncate_to_hour, MAX_HOURS_AGO};
use crate::analytics::{MetricsQuery, TimeAggregation, RECOMMENDATION_PROMPT};
use crate::db::{format_timestamp, AnalyzedSampleFilter};
use crate::llm::AnalysisJob;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/traffic-analysis",
            post(trigger_traffic_analysis).get(list_traffic_analysis),
        )
        .route("/traffic-sources", get(traffic_sources))
        .route("/llm-analysis", post(trigger_llm_analysis))
        .route("/llm-analytics", get(llm_analytics))
        .route("/metrics", get(metrics))
        .route("/metrics/by-location", get(metrics_by_location))
        .route("/recommendations", get(list_recommendations))
}

fn default_trigger_hours() -> i64 {
    1
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_analysis_limit() -> u32 {
    10
}

fn default_metrics_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_recommendation_limit() -> u32 {
    5
}

fn check_hours(hours_ago: i64) -> Result<i64, ApiError> {
    if (0..=MAX_HOURS_AGO).contains(&hours_ago) {
        Ok(hours_ago)
    } else {
        Err(ApiError::validation(format!(
            "hours_ago must be between 0 and {}",
            MAX_HOURS_AGO
        )))
    }
}

fn check_limit(limit: u32) -> Result<u32, ApiError> {
    validate_limit(limit).map_err(ApiError::validation)
}

#[derive(Debug, Deserialize)]
struct TriggerParams {
    #[serde(default = "default_trigger_hours")]
    hours_ago: i64,
    custom_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    message: String,
    target_hour: String,
    custom_prompt: bool,
}

async fn trigger_traffic_analysis(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<TriggerParams>,
) -> Result<impl IntoResponse, ApiError> {
    let hours_ago = check_hours(params.hours_ago)?;
    let hour_start = truncate_to_hour(Utc::now()) - Duration::hours(hours_ago);
    let prompt = params.custom_prompt.filter(|p| !p.trim().is_empty());
    let custom_prompt = prompt.is_some();

    state
        .queue
        .submit(AnalysisJob::HourlyBatch { hour_start, prompt })
        .map_err(ApiError::internal)?;
    tracing::info!(hour = %hour_start, custom_prompt, "Traffic analysis queued");

    let target_hour = format_timestamp(hour_start);
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            message: format!("Traffic analysis started for hour {}", target_hour),
            target_hour,
            custom_prompt,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct AnalysisListParams {
    source_id: Option<String>,
    #[serde(default = "default_lookback_hours")]
    hours_ago: i64,
    #[serde(default = "default_analysis_limit")]
    limit: u32,
}

async fn list_traffic_analysis(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<AnalysisListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let hours_ago = check_hours(params.hours_ago)?;
    let limit = check_limit(params.limit)?;
    let until = Utc::now();
    let filter = AnalyzedSampleFilter {
        source_id: params.source_id.filter(|s| !s.is_empty()),
        since: until - Duration::hours(hours_ago),
        until,
        limit,
    };

    let db = state.db.clone();
    let samples = run_blocking(move || db.analyzed_samples(&filter)).await?;
    Ok(Json(samples))
}

#[derive(Debug, Serialize)]
struct SourcesResponse {
    sources: Vec<String>,
}

async fn traffic_sources(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let sources = run_blocking(move || db.traffic_sources()).await?;
    Ok(Json(SourcesResponse { sources }))
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Debug, Deserialize)]
struct LatestImageParams {
    location_id: Option<String>,
}

async fn trigger_llm_analysis(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<LatestImageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let source_id = params.location_id.filter(|id| !id.is_empty());
    tracing::info!(source_id = ?source_id, "Latest-image analysis queued");
    state
        .queue
        .submit(AnalysisJob::LatestImage { source_id })
        .map_err(ApiError::internal)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "LLM analysis started for the most recent image",
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    #[serde(default = "default_analysis_limit")]
    limit: u32,
}

async fn llm_analytics(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = check_limit(params.limit)?;
    let db = state.db.clone();
    let entries = run_blocking(move || db.recent_ledger_entries(limit)).await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct MetricsParams {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_metrics_limit")]
    limit: u32,
    address_filter: Option<String>,
    location_id: Option<String>,
    #[serde(default)]
    time_aggregation: TimeAggregation,
}

async fn metrics(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<MetricsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = MetricsQuery {
        skip: params.skip,
        limit: check_limit(params.limit)?,
        address_filter: params.address_filter,
        location_id: params.location_id,
        time_aggregation: params.time_aggregation,
    };

    let db = state.db.clone();
    let report = run_blocking(move || get_metrics(&db, &query)).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct LocationMetricsParams {
    location_id: Option<String>,
    address_filter: Option<String>,
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_metrics_limit")]
    limit: u32,
}

async fn metrics_by_location(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<LocationMetricsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = check_limit(params.limit)?;
    let db = state.db.clone();
    let report = run_blocking(move || {
        get_metrics_by_location(
            &db,
            params.location_id.as_deref(),
            params.address_filter.as_deref(),
            params.skip,
            limit,
        )
    })
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct RecommendationParams {
    location_id: Option<String>,
    #[serde(default = "default_recommendation_limit")]
    limit: u32,
}

async fn list_recommendations(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RecommendationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = check_limit(params.limit)?;
    let location_id = params.location_id.filter(|id| !id.is_empty());
    let db = state.db.clone();
    let entries = run_blocking(move || {
        db.ledger_entries_for_prompt(RECOMMENDATION_PROMPT, location_id.as_deref(), limit)
    })
    .await?;

    let recommendations: Vec<_> = entries
        .iter()
        .zip(1u32..)
        .map(|(entry, ranking)| recommendations::from_ledger_entry(entry, ranking))
        .collect();
    Ok(Json(recommendations))
}
