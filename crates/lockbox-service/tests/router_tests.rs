use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lockbox_core::{FileStore, StoreOptions};
use lockbox_service::{build_router, AppState};
use std::path::Path;
use tempfile::tempdir;
use tower::ServiceExt;

async fn app(root: &Path, options: StoreOptions, allow_list_backups: bool) -> Router {
    let store = FileStore::open(root, options).await.unwrap();
    build_router(AppState::new(store, allow_list_backups), 1024)
}

async fn send(app: &Router, method: &str, uri: &str, body: impl Into<Body>) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send_raw(app: &Router, method: &str, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn post_json(app: &Router, json: serde_json::Value) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/storage")
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn put_get_delete() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), StoreOptions::default(), false).await;

    assert_eq!(send(&app, "GET", "/storage?name=abc", Body::empty()).await.0, StatusCode::NOT_FOUND);
    assert_eq!(send(&app, "PUT", "/storage?name=abc", "blob-1").await.0, StatusCode::OK);
    assert_eq!(
        send(&app, "GET", "/storage?name=abc", Body::empty()).await,
        (StatusCode::OK, "blob-1".to_string())
    );
    assert_eq!(send(&app, "PUT", "/storage?name=abc", "blob-2").await.0, StatusCode::OK);
    assert_eq!(send(&app, "GET", "/storage?name=abc", Body::empty()).await.1, "blob-2");
    assert_eq!(send(&app, "DELETE", "/storage?name=abc", Body::empty()).await.0, StatusCode::OK);
    assert_eq!(
        send(&app, "DELETE", "/storage?name=abc", Body::empty()).await.0,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn binary_bodies_are_stored_verbatim() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), StoreOptions::default(), false).await;
    let payload = vec![0xff, 0x00, 0xfe, b'\n', 0x80];

    let (status, _) = send_raw(&app, "PUT", "/storage?name=bin", payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(std::fs::read(dir.path().join("bin")).unwrap(), payload);
    assert_eq!(
        send_raw(&app, "GET", "/storage?name=bin", Vec::new()).await,
        (StatusCode::OK, payload)
    );
}

#[tokio::test]
async fn escaping_names_are_rejected() {
    let dir = tempdir().unwrap();
    let app = app(&dir.path().join("root"), StoreOptions::default(), false).await;
    for uri in [
        "/storage?name=..%2Fsecret",
        "/storage?name=%2Fetc%2Fpasswd",
        "/storage?name=",
    ] {
        assert_eq!(send(&app, "PUT", uri, "x").await.0, StatusCode::BAD_REQUEST, "{uri}");
    }
    assert!(!dir.path().join("secret").exists());
    assert_eq!(
        send(&app, "GET", "/storage", Body::empty()).await.0,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn blocked_creation_needs_a_predecessor() {
    let dir = tempdir().unwrap();
    let options = StoreOptions {
        backup_files: true,
        block_new: true,
    };
    let app = app(dir.path(), options, true).await;
    std::fs::write(dir.path().join("old"), "old-blob").unwrap();

    assert_eq!(send(&app, "PUT", "/storage?name=new", "x").await.0, StatusCode::FORBIDDEN);
    assert_eq!(
        send(&app, "PUT", "/storage?name=new&previousName=missing", "x").await.0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(&app, "PUT", "/storage?name=new&previousName=old", "new-blob").await.0,
        StatusCode::OK
    );
    assert_eq!(send(&app, "GET", "/storage?name=new", Body::empty()).await.1, "new-blob");
    assert_eq!(send(&app, "GET", "/storage?name=old", Body::empty()).await.0, StatusCode::NOT_FOUND);

    // Existing objects stay writable.
    assert_eq!(send(&app, "PUT", "/storage?name=new", "newer").await.0, StatusCode::OK);
}

#[tokio::test]
async fn backups_are_listed_only_when_allowed() {
    let dir = tempdir().unwrap();
    let allowed = app(&dir.path().join("a"), StoreOptions::default(), true).await;
    let denied = app(&dir.path().join("b"), StoreOptions::default(), false).await;

    for app in [&allowed, &denied] {
        send(app, "PUT", "/storage?name=one", "1").await;
        send(app, "PUT", "/storage?name=one", "2").await;
        send(app, "PUT", "/storage?name=two", "3").await;
        assert_eq!(
            send(app, "GET", "/storage/list", Body::empty()).await,
            (StatusCode::OK, "one\ntwo".to_string())
        );
    }

    let (_, listing) = send(&allowed, "GET", "/storage/list?backups=true", Body::empty()).await;
    let names: Vec<&str> = listing.lines().collect();
    assert_eq!(names.len(), 3);
    assert!(names.iter().any(|n| n.starts_with("one.")));

    let (_, listing) = send(&denied, "GET", "/storage/list?backups=true", Body::empty()).await;
    assert_eq!(listing, "one\ntwo");
}

#[tokio::test]
async fn post_overrides_the_verb() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), StoreOptions::default(), false).await;

    let put = serde_json::json!({"method": "PUT", "name": "n", "content": "blob"});
    assert_eq!(post_json(&app, put).await.0, StatusCode::OK);
    let get = serde_json::json!({"method": "get", "name": "n"});
    assert_eq!(post_json(&app, get).await, (StatusCode::OK, "blob".to_string()));

    let rename = serde_json::json!({
        "method": "PUT", "name": "m", "previousName": "n", "content": "moved"
    });
    assert_eq!(post_json(&app, rename).await.0, StatusCode::OK);
    assert_eq!(send(&app, "GET", "/storage?name=n", Body::empty()).await.0, StatusCode::NOT_FOUND);

    let delete = serde_json::json!({"method": "DELETE", "name": "m"});
    assert_eq!(post_json(&app, delete).await.0, StatusCode::OK);

    let empty_put = serde_json::json!({"method": "PUT", "name": "n"});
    assert_eq!(post_json(&app, empty_put).await.0, StatusCode::BAD_REQUEST);
    let patch = serde_json::json!({"method": "PATCH", "name": "n"});
    assert_eq!(post_json(&app, patch).await.0, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn oversized_payload_is_refused() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), StoreOptions::default(), false).await;
    let body = "x".repeat(4096);
    assert_eq!(
        send(&app, "PUT", "/storage?name=big", body).await.0,
        StatusCode::PAYLOAD_TOO_LARGE
    );
    assert_eq!(send(&app, "GET", "/storage?name=big", Body::empty()).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_answers_ok() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), StoreOptions::default(), false).await;
    assert_eq!(
        send(&app, "GET", "/health", Body::empty()).await,
        (StatusCode::OK, "ok".to_string())
    );
}
