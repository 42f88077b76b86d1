//! Data-source registry endpoints.
//!
//! The registry holds descriptors in process memory; durable storage
//! and credential encryption at rest belong to an external
//! collaborator, which hands descriptors here already decrypted.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use crate::datasource::{DataSourceDescriptor, create_connector};
use crate::error::{ConnectionTest, QueryError};

/// Source routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/sources", post(register_source))
        .route("/api/v1/sources/{id}", delete(remove_source))
        .route("/api/v1/sources/{id}/test", post(test_source))
        .route("/api/v1/sources/{id}/index", post(index_source))
}

/// In-process registry of data-source descriptors.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: parking_lot::RwLock<HashMap<String, DataSourceDescriptor>>,
}

impl SourceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning its generated id.
    pub fn register(&self, descriptor: DataSourceDescriptor) -> String {
        let id = Uuid::new_v4().to_string();
        self.sources.write().insert(id.clone(), descriptor);
        id
    }

    /// Fetch a descriptor by id.
    pub fn get(&self, id: &str) -> Result<DataSourceDescriptor, QueryError> {
        self.sources
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("data source {id}")))
    }

    /// Remove a descriptor. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.sources.write().remove(id).is_some()
    }
}

/// Registration response.
#[derive(Debug, Serialize)]
struct RegisterResponse {
    id: String,
}

async fn register_source(
    State(state): State<AppState>,
    Json(descriptor): Json<DataSourceDescriptor>,
) -> (StatusCode, Json<RegisterResponse>) {
    let id = state.sources.register(descriptor);
    tracing::info!(source_id = %id, "Data source registered");
    (StatusCode::CREATED, Json(RegisterResponse { id }))
}

async fn remove_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, QueryError> {
    if !state.sources.remove(&id) {
        return Err(QueryError::NotFound(format!("data source {id}")));
    }
    if let Some(ref relevance) = state.relevance {
        relevance.remove(&id);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Probe connectivity for a registered source.
async fn test_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionTest>, QueryError> {
    let descriptor = state.sources.get(&id)?;
    let connector = match create_connector(&descriptor, &state.config.query).await {
        Ok(connector) => connector,
        // Constructor failures are still a probe result, not a request failure
        Err(e) => return Ok(Json(ConnectionTest::failed(e.to_string()))),
    };
    let outcome = connector.test_connection().await;
    connector.close().await;
    Ok(Json(outcome))
}

/// Index response.
#[derive(Debug, Serialize)]
struct IndexResponse {
    indexed_tables: usize,
}

/// Build the relevance-filter embeddings for a source's schema.
async fn index_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexResponse>, QueryError> {
    let Some(ref relevance) = state.relevance else {
        return Err(QueryError::InvalidRequest(
            "no embedding provider configured".to_string(),
        ));
    };

    let descriptor = state.sources.get(&id)?;
    let connector = create_connector(&descriptor, &state.config.query).await?;
    let schema = connector.schema().await;
    connector.close().await;

    let indexed_tables = relevance.index_schema(&id, &schema?).await?;
    Ok(Json(IndexResponse { indexed_tables }))
}
