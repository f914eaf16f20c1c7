use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use iwa_model::{router, FixedPolicy};

async fn post_act(body: Value) -> (StatusCode, Value) {
    let app = router(FixedPolicy::new("http://web:8001/books/book-original-002"));
    let req = Request::builder()
        .method("POST")
        .uri("/act")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn accepts_full_environment_request() {
    let (status, body) = post_act(json!({
        "task_id": "autobooks-demo-task-1",
        "prompt": "Open the detail page",
        "url": "http://web:8001/",
        "current_url": "http://web:8001/",
        "snapshot_html": "<html></html>",
        "step_index": 0,
        "web_project_id": "autobooks",
        "relevant_data": {}
    }))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["actions"][0],
        json!({"type": "NavigateAction", "url": "http://web:8001/books/book-original-002"})
    );
}

#[tokio::test]
async fn second_step_returns_no_actions() {
    let (status, body) = post_act(json!({"task_id": "t", "step_index": 1})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"actions": [], "done": true}));
}

#[tokio::test]
async fn health_is_ok() {
    let app = router(FixedPolicy::default());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
