//! HTTP API tests, driven in-process through the router

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use catalog_node::api::create_router;
use catalog_node::config::SyncConfig;
use catalog_node::execution::CapabilityRegistry;
use catalog_node::node::TEST_CONTENT_HASH;
use catalog_node::{Config, Node, NodeHandle};

const UNKNOWN_CREATOR: &str = "abababababababababababababababababababababababababababababababab";

async fn start_node(dir: &TempDir) -> NodeHandle {
    let mut config = Config::with_data_dir(dir.path());
    config.api.enabled = false;
    config.sync = SyncConfig {
        reconcile_initial_delay_secs: 3600,
        reconcile_interval_secs: 3600,
        crawl_initial_delay_secs: 3600,
        crawl_interval_secs: 3600,
    };

    let node = Node::open(config, CapabilityRegistry::default()).unwrap();
    let handle = node.handle();
    tokio::spawn(node.run());
    handle
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let app = create_router(start_node(&dir).await);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_unknown_package_is_404() {
    let dir = TempDir::new().unwrap();
    let app = create_router(start_node(&dir).await);
    let path = format!("{}/deadbeef", UNKNOWN_CREATOR);

    for (method, prefix) in [
        (Method::GET, "catalog"),
        (Method::GET, "cache"),
        (Method::GET, "library"),
        (Method::POST, "downloads"),
        (Method::POST, "run"),
        (Method::POST, "votes"),
    ] {
        let uri = format!("/{}/{}", prefix, path);
        let (status, body) = send_json(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert!(body["error"].as_str().unwrap().contains("not found"), "{}", uri);
    }
}

#[tokio::test]
async fn test_bad_creator_is_400() {
    let dir = TempDir::new().unwrap();
    let app = create_router(start_node(&dir).await);

    let (status, body) = send_json(&app, Method::GET, "/catalog/not-hex/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_create_test_package_then_list() {
    let dir = TempDir::new().unwrap();
    let node = start_node(&dir).await;
    let app = create_router(node.clone());

    let (status, body) = send_json(&app, Method::POST, "/catalog/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "created");
    assert_eq!(body["detail"]["votes"], 1);

    let (status, body) = send_json(&app, Method::POST, "/catalog/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_exists");

    let (status, body) = send_json(&app, Method::GET, "/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    let packages = body.as_array().unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0]["name"], "test");
    assert_eq!(packages[0]["id"]["content_hash"], TEST_CONTENT_HASH);

    let uri = format!("/catalog/{}/{}", node.public_key(), TEST_CONTENT_HASH);
    let (status, body) = send_json(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"]["creator"], node.public_key().to_hex());

    let uri = format!("/votes/{}/{}", node.public_key(), TEST_CONTENT_HASH);
    let (status, body) = send_json(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "already_voted"}));

    node.shutdown();
}

#[tokio::test]
async fn test_create_missing_directory_is_404() {
    let dir = TempDir::new().unwrap();
    let app = create_router(start_node(&dir).await);

    let (status, body) =
        send_json(&app, Method::POST, "/catalog", Some(json!({"name": "nope"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_create_path_name_is_400() {
    let dir = TempDir::new().unwrap();
    let app = create_router(start_node(&dir).await);

    let (status, body) =
        send_json(&app, Method::POST, "/catalog", Some(json!({"name": "../ledger"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("path component"));

    let (_, body) = send_json(&app, Method::GET, "/catalog", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_status() {
    let dir = TempDir::new().unwrap();
    let node = start_node(&dir).await;
    let app = create_router(node.clone());

    let (status, body) = send_json(&app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public_key"], node.public_key().to_hex());
    assert_eq!(body["store"]["catalog"], 0);
    assert_eq!(body["peers"], 0);
}
