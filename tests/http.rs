mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use common::*;
use simple_site_deploy::AppState;
use simple_site_deploy::handlers::router;
use simple_site_deploy::storage::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

fn app(builder: Arc<FakeBuilder>, store: Arc<MemoryStore>) -> axum::Router {
    let tmp = std::env::temp_dir().join("simple_site_deploy_http_tests");
    let pipeline = pipeline(
        config(&tmp, "http://127.0.0.1:9/site.zip".to_string()),
        builder,
        store,
    );
    router(Arc::new(AppState::new(pipeline)))
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn non_post_is_answered_400_without_authentication() {
    let builder = Arc::new(FakeBuilder::default());
    let store = Arc::new(MemoryStore::new(BUCKET));
    let app = app(Arc::clone(&builder), Arc::clone(&store));

    for method in ["GET", "PUT", "DELETE"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Not expecting this type of request");
    }
    assert_eq!(builder.calls(), 0);
    assert!(store.ops().is_empty());
}

#[tokio::test]
async fn ignored_event_is_completed() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(Arc::clone(&builder), Arc::new(MemoryStore::new(BUCKET)));
    let body = r#"{"action":"opened"}"#;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("X-GitHub-Event", "issues")
                .header("X-Hub-Signature-256", sign(body.as_bytes()))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Completed");
    assert_eq!(builder.calls(), 0);
}

#[tokio::test]
async fn bad_signature_is_still_completed_but_does_not_deploy() {
    let builder = Arc::new(FakeBuilder::default());
    let store = Arc::new(MemoryStore::new(BUCKET));
    let app = app(Arc::clone(&builder), Arc::clone(&store));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", "sha256=deadbeef")
                .body(Body::from(PUSH_BODY))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    tokio::task::yield_now().await;
    assert_eq!(builder.calls(), 0);
    assert!(store.ops().is_empty());
}

#[tokio::test]
async fn status_reports_target_and_history() {
    let app = app(
        Arc::new(FakeBuilder::default()),
        Arc::new(MemoryStore::new(BUCKET)),
    );
    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["target"]["bucket"], BUCKET);
    assert_eq!(json["target"]["repository"], "santrancisco/ebfe_site");
    assert_eq!(json["deployments"]["recent"], serde_json::json!([]));
}

#[tokio::test]
async fn signed_push_larger_than_two_mib_is_accepted() {
    let app = app(
        Arc::new(FakeBuilder::default()),
        Arc::new(MemoryStore::new(BUCKET)),
    );
    let body = format!(
        r#"{{"ref":"refs/heads/master","repository":{{"name":"ebfe_site"}},"padding":"{}"}}"#,
        "x".repeat(3 * 1024 * 1024)
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", sign(body.as_bytes()))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Completed");
}
