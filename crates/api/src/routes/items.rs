use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use pipeboard_domain::activity::ActivityEvent;
use pipeboard_domain::items::{
    BoardItem, ItemCreate, ItemDragInput, ItemKind, ItemPatch, ItemStatus, PaymentEntry,
    ProductLine,
};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::validate_payload;

use super::{actor_identity, process_id};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/items/:kind", post(create_item))
        .route(
            "/v1/items/:kind/:item_id",
            get(get_item).patch(edit_item).delete(remove_item),
        )
        .route("/v1/items/:kind/:item_id/change", post(change_item))
        .route("/v1/items/:kind/:item_id/copy", post(copy_item))
        .route("/v1/items/:kind/:item_id/activity", get(item_activity))
        .route("/v1/stages/:stage_id/items", get(list_stage_items))
        .route("/v1/stages/:stage_id/archive", post(archive_stage))
}

fn parse_kind(raw: &str) -> Result<ItemKind, ApiError> {
    ItemKind::parse(raw).ok_or_else(|| ApiError::Validation(format!("unknown item kind: {raw}")))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateItemRequest {
    #[validate(length(min = 1))]
    name: String,
    #[validate(length(min = 1))]
    stage_id: String,
    above_item_id: Option<String>,
    #[serde(default)]
    assigned_user_ids: Vec<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    tag_ids: Vec<String>,
    #[serde(default)]
    branch_ids: Vec<String>,
    #[serde(default)]
    department_ids: Vec<String>,
    custom_fields_data: Option<serde_json::Value>,
    #[serde(default)]
    products_data: Vec<ProductLine>,
    #[serde(default)]
    payments_data: BTreeMap<String, PaymentEntry>,
    #[serde(default)]
    customer_ids: Vec<String>,
    #[serde(default)]
    company_ids: Vec<String>,
    start_date_ms: Option<i64>,
    close_date_ms: Option<i64>,
}

async fn create_item(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CreateItemRequest>,
) -> Result<Json<BoardItem>, ApiError> {
    validate_payload(&payload)?;
    let kind = parse_kind(&kind)?;
    let actor = actor_identity(&headers)?;
    let process_id = process_id(&headers);

    let input = ItemCreate {
        name: payload.name,
        stage_id: payload.stage_id,
        above_item_id: payload.above_item_id,
        assigned_user_ids: payload.assigned_user_ids,
        label_ids: payload.label_ids,
        tag_ids: payload.tag_ids,
        branch_ids: payload.branch_ids,
        department_ids: payload.department_ids,
        custom_fields_data: payload.custom_fields_data,
        products_data: payload.products_data,
        payments_data: payload.payments_data,
        customer_ids: payload.customer_ids,
        company_ids: payload.company_ids,
        start_date_ms: payload.start_date_ms,
        close_date_ms: payload.close_date_ms,
    };
    let item = state.engine.add(&actor, kind, input, &process_id).await?;
    Ok(Json(item))
}

async fn get_item(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
) -> Result<Json<BoardItem>, ApiError> {
    let kind = parse_kind(&kind)?;
    let item = state.engine.get_item(kind, &item_id).await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
struct EditItemRequest {
    name: Option<String>,
    stage_id: Option<String>,
    status: Option<ItemStatus>,
    assigned_user_ids: Option<Vec<String>>,
    label_ids: Option<Vec<String>>,
    tag_ids: Option<Vec<String>>,
    custom_fields_data: Option<serde_json::Value>,
    products_data: Option<Vec<ProductLine>>,
    payments_data: Option<BTreeMap<String, PaymentEntry>>,
    start_date_ms: Option<i64>,
    close_date_ms: Option<i64>,
}

async fn edit_item(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<EditItemRequest>,
) -> Result<Json<BoardItem>, ApiError> {
    let kind = parse_kind(&kind)?;
    let actor = actor_identity(&headers)?;
    let process_id = process_id(&headers);

    let patch = ItemPatch {
        name: payload.name,
        stage_id: payload.stage_id,
        status: payload.status,
        assigned_user_ids: payload.assigned_user_ids,
        label_ids: payload.label_ids,
        tag_ids: payload.tag_ids,
        custom_fields_data: payload.custom_fields_data,
        products_data: payload.products_data,
        payments_data: payload.payments_data,
        start_date_ms: payload.start_date_ms,
        close_date_ms: payload.close_date_ms,
        ..ItemPatch::default()
    };
    let item = state
        .engine
        .edit(&actor, kind, &item_id, patch, &process_id)
        .await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize, Validate)]
struct ChangeItemRequest {
    #[validate(length(min = 1))]
    source_stage_id: String,
    #[validate(length(min = 1))]
    destination_stage_id: String,
    above_item_id: Option<String>,
}

async fn change_item(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<ChangeItemRequest>,
) -> Result<Json<BoardItem>, ApiError> {
    validate_payload(&payload)?;
    let kind = parse_kind(&kind)?;
    let actor = actor_identity(&headers)?;
    let process_id = process_id(&headers);

    let item = state
        .engine
        .change(
            &actor,
            kind,
            ItemDragInput {
                item_id,
                source_stage_id: payload.source_stage_id,
                destination_stage_id: payload.destination_stage_id,
                above_item_id: payload.above_item_id,
                process_id,
            },
        )
        .await?;
    Ok(Json(item))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<BoardItem>, ApiError> {
    let kind = parse_kind(&kind)?;
    let actor = actor_identity(&headers)?;
    let item = state.engine.remove(&actor, kind, &item_id).await?;
    Ok(Json(item))
}

async fn copy_item(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<BoardItem>, ApiError> {
    let kind = parse_kind(&kind)?;
    let actor = actor_identity(&headers)?;
    let process_id = process_id(&headers);
    let clone = state
        .engine
        .copy(&actor, kind, &item_id, &process_id)
        .await?;
    Ok(Json(clone))
}

async fn item_activity(
    State(state): State<AppState>,
    Path((kind, item_id)): Path<(String, String)>,
) -> Result<Json<Vec<ActivityEvent>>, ApiError> {
    parse_kind(&kind)?;
    let entries = state.engine.list_item_activity(&item_id).await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct StageItemsQuery {
    kind: String,
}

async fn list_stage_items(
    State(state): State<AppState>,
    Path(stage_id): Path<String>,
    Query(query): Query<StageItemsQuery>,
) -> Result<Json<Vec<BoardItem>>, ApiError> {
    let kind = parse_kind(&query.kind)?;
    let items = state.engine.list_stage_items(kind, &stage_id).await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct ArchiveStageRequest {
    kind: String,
}

async fn archive_stage(
    State(state): State<AppState>,
    Path(stage_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ArchiveStageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = parse_kind(&payload.kind)?;
    let actor = actor_identity(&headers)?;
    let process_id = process_id(&headers);
    let archived = state
        .engine
        .archive_stage(&actor, kind, &stage_id, &process_id)
        .await?;
    Ok(Json(serde_json::json!({ "archived": archived })))
}
