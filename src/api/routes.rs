//! API route handlers

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::ApiError;
use crate::node::{
    CreateOutcome, DownloadOutcome, NodeHandle, NodeStatus, RunResult,
};
use crate::package::{Identifier, Package};
use crate::sync::VoteOutcome;

fn identifier((creator, content_hash): (String, String)) -> Result<Identifier, ApiError> {
    Identifier::parse(&creator, &content_hash)
        .map_err(|e| ApiError::BadRequest(format!("creator must be hex: {}", e)))
}

fn found<T>(value: Option<T>, what: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::NotFound(format!("package not found in {}", what)))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// GET /api/status
pub async fn api_status(State(node): State<NodeHandle>) -> Result<Json<NodeStatus>, ApiError> {
    Ok(Json(node.status()?))
}

/// GET /catalog
pub async fn list_catalog(State(node): State<NodeHandle>) -> Result<Json<Vec<Package>>, ApiError> {
    Ok(Json(node.list()?))
}

/// GET /catalog/:creator/:content_hash
pub async fn get_package(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<Package>, ApiError> {
    let id = identifier(path)?;
    Ok(Json(found(node.get(&id)?, "catalog")?))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
}

/// POST /catalog
pub async fn create_package(
    State(node): State<NodeHandle>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<CreateOutcome>, ApiError> {
    match node.create(&req.name).await? {
        CreateOutcome::PackageMissing(name) => Err(ApiError::NotFound(format!(
            "package directory {:?} not found",
            name
        ))),
        CreateOutcome::InvalidName(name) => Err(ApiError::BadRequest(format!(
            "package name {:?} must be a single path component",
            name
        ))),
        outcome => Ok(Json(outcome)),
    }
}

/// POST /catalog/test
pub async fn create_test_package(
    State(node): State<NodeHandle>,
) -> Result<Json<CreateOutcome>, ApiError> {
    Ok(Json(node.create_test().await?))
}

/// GET /cache
pub async fn list_cache(State(node): State<NodeHandle>) -> Result<Json<Vec<Identifier>>, ApiError> {
    Ok(Json(node.list_cache()?))
}

/// GET /cache/:creator/:content_hash
pub async fn get_cache(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<Identifier>, ApiError> {
    let id = identifier(path)?;
    Ok(Json(found(node.get_cache(&id)?, "cache")?))
}

/// GET /library
pub async fn list_library(
    State(node): State<NodeHandle>,
) -> Result<Json<Vec<Identifier>>, ApiError> {
    Ok(Json(node.list_library()?))
}

/// GET /library/:creator/:content_hash
pub async fn get_library(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<Identifier>, ApiError> {
    let id = identifier(path)?;
    Ok(Json(found(node.get_library(&id)?, "library")?))
}

/// POST /downloads/:creator/:content_hash
pub async fn download(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let id = identifier(path)?;
    match node.download(id).await? {
        DownloadOutcome::NotInCatalog => found(None, "catalog"),
        DownloadOutcome::Rejected => Err(ApiError::BadRequest(
            "cataloged name cannot be installed".to_string(),
        )),
        outcome => Ok(Json(json!({ "status": outcome }))),
    }
}

/// POST /run/:creator/:content_hash
pub async fn run(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<RunResult>, ApiError> {
    let id = identifier(path)?;
    match node.run_package(id).await? {
        RunResult::NotInLibrary | RunResult::NotCached => found(None, "library"),
        result => Ok(Json(result)),
    }
}

/// POST /votes/:creator/:content_hash
pub async fn vote(
    State(node): State<NodeHandle>,
    Path(path): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let id = identifier(path)?;
    match node.vote(id).await? {
        VoteOutcome::NotInCatalog => found(None, "catalog"),
        outcome => Ok(Json(json!({ "status": outcome }))),
    }
}
