//! HTTP API over a node handle
//!
//! Package identifiers appear in paths as `/<creator-hex>/<content_hash>`.
//! Unknown identifiers answer 404 with a JSON `error`; other failures answer
//! 500 with the error `kind` attached.

pub mod routes;

use std::net::SocketAddr;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::NodeError;
use crate::node::NodeHandle;

/// Create the API router
pub fn create_router(node: NodeHandle) -> Router {
    Router::new()
        .route("/catalog", get(routes::list_catalog).post(routes::create_package))
        .route("/catalog/test", post(routes::create_test_package))
        .route("/catalog/:creator/:content_hash", get(routes::get_package))
        .route("/cache", get(routes::list_cache))
        .route("/cache/:creator/:content_hash", get(routes::get_cache))
        .route("/library", get(routes::list_library))
        .route("/library/:creator/:content_hash", get(routes::get_library))
        .route("/downloads/:creator/:content_hash", post(routes::download))
        .route("/run/:creator/:content_hash", post(routes::run))
        .route("/votes/:creator/:content_hash", post(routes::vote))
        .route("/api/status", get(routes::api_status))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serve the API until the node shuts down.
pub async fn serve(node: NodeHandle, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, create_router(node)).await?;
    Ok(())
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Node(NodeError),
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        ApiError::Node(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Node(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string(), "kind": e.kind() })),
            )
                .into_response(),
        }
    }
}
