use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use pipeboard_infra::config::AppConfig;

use crate::routes;
use crate::state::AppState;

fn test_app() -> Router {
    let config = AppConfig::load().expect("config defaults");
    let state = AppState::with_metrics(config, None).expect("state");
    seed_hierarchy(&state);
    routes::router(state)
}

fn seed_hierarchy(state: &AppState) {
    use pipeboard_domain::boards::{Board, Pipeline, Stage};

    state.hierarchy.upsert_board(Board {
        board_id: "board-1".to_string(),
        name: "Sales".to_string(),
    });
    state.hierarchy.upsert_pipeline(Pipeline {
        pipeline_id: "pipe-1".to_string(),
        board_id: "board-1".to_string(),
        name: "Default".to_string(),
        payment_types: vec![],
    });
    state.hierarchy.upsert_stage(Stage {
        stage_id: "s1".to_string(),
        pipeline_id: "pipe-1".to_string(),
        name: "New".to_string(),
        can_edit_member_ids: vec![],
        can_move_member_ids: vec![],
    });
    state.hierarchy.upsert_stage(Stage {
        stage_id: "s2".to_string(),
        pipeline_id: "pipe-1".to_string(),
        name: "Won".to_string(),
        can_edit_member_ids: vec![],
        can_move_member_ids: vec![],
    });
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "user-1")
        .header("x-username", "tester")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn item_lifecycle_over_http() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/items/deal",
            json!({ "name": "First deal", "stage_id": "s1" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let item_id = created["item_id"].as_str().expect("item id").to_string();
    assert_eq!(created["status"], json!("active"));
    assert_eq!(created["initial_stage_id"], json!("s1"));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/items/deal/{item_id}/change"),
            json!({ "source_stage_id": "s1", "destination_stage_id": "s2" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let moved = body_json(response).await;
    assert_eq!(moved["stage_id"], json!("s2"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/stages/s2/items?kind=deal")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn missing_actor_header_is_unauthorized() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/items/deal")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "name": "No actor", "stage_id": "s1" }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_kind_is_a_validation_error() {
    let app = test_app();
    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/items/invoice",
            json!({ "name": "Nope", "stage_id": "s1" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
