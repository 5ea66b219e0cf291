mod items;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use validator::Validate;

use pipeboard_domain::boards::{Board, PaymentTypeConfig, Pipeline, Stage};
use pipeboard_domain::identity::ActorIdentity;
use pipeboard_domain::util::uuid_v7_without_dashes;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::validate_payload;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/boards", post(upsert_board))
        .route("/v1/pipelines", post(upsert_pipeline))
        .route("/v1/stages", post(upsert_stage))
        .merge(items::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    match &state.metrics {
        Some(handle) => Ok(handle.render()),
        None => Err(ApiError::NotFound("metrics recorder".to_string())),
    }
}

/// Acting user comes from the gateway that already resolved the session;
/// this layer only needs an id and a display name.
pub(crate) fn actor_identity(headers: &HeaderMap) -> Result<ActorIdentity, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    let username = headers
        .get("x-username")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| user_id.clone());
    Ok(ActorIdentity { user_id, username })
}

/// Board UIs tag their own mutation requests so they can recognize echoed
/// events; untagged callers get a fresh id.
pub(crate) fn process_id(headers: &HeaderMap) -> String {
    headers
        .get("x-process-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(uuid_v7_without_dashes)
}

#[derive(Debug, Deserialize, Validate)]
struct UpsertBoardRequest {
    #[validate(length(min = 1))]
    board_id: String,
    #[validate(length(min = 1))]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PaymentTypeRequest {
    payment_type: String,
    title: String,
    score_campaign_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpsertPipelineRequest {
    #[validate(length(min = 1))]
    pipeline_id: String,
    #[validate(length(min = 1))]
    board_id: String,
    #[validate(length(min = 1))]
    name: String,
    #[serde(default)]
    payment_types: Vec<PaymentTypeRequest>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpsertStageRequest {
    #[validate(length(min = 1))]
    stage_id: String,
    #[validate(length(min = 1))]
    pipeline_id: String,
    #[validate(length(min = 1))]
    name: String,
    #[serde(default)]
    can_edit_member_ids: Vec<String>,
    #[serde(default)]
    can_move_member_ids: Vec<String>,
}

async fn upsert_board(
    State(state): State<AppState>,
    Json(payload): Json<UpsertBoardRequest>,
) -> Result<Json<Board>, ApiError> {
    validate_payload(&payload)?;
    let board = Board {
        board_id: payload.board_id,
        name: payload.name,
    };
    state.hierarchy.upsert_board(board.clone());
    Ok(Json(board))
}

async fn upsert_pipeline(
    State(state): State<AppState>,
    Json(payload): Json<UpsertPipelineRequest>,
) -> Result<Json<Pipeline>, ApiError> {
    validate_payload(&payload)?;
    let pipeline = Pipeline {
        pipeline_id: payload.pipeline_id,
        board_id: payload.board_id,
        name: payload.name,
        payment_types: payload
            .payment_types
            .into_iter()
            .map(|config| PaymentTypeConfig {
                payment_type: config.payment_type,
                title: config.title,
                score_campaign_id: config.score_campaign_id,
            })
            .collect(),
    };
    state.hierarchy.upsert_pipeline(pipeline.clone());
    Ok(Json(pipeline))
}

async fn upsert_stage(
    State(state): State<AppState>,
    Json(payload): Json<UpsertStageRequest>,
) -> Result<Json<Stage>, ApiError> {
    validate_payload(&payload)?;
    let stage = Stage {
        stage_id: payload.stage_id,
        pipeline_id: payload.pipeline_id,
        name: payload.name,
        can_edit_member_ids: payload.can_edit_member_ids,
        can_move_member_ids: payload.can_move_member_ids,
    };
    state.hierarchy.upsert_stage(stage.clone());
    Ok(Json(stage))
}
