//! querylens - natural-language analytics query service.
//!
//! Converts a natural-language question into a validated, executed
//! query against one of several heterogeneous analytical backends, then
//! recommends a visualization:
//!
//! - **Connectors**: one uniform execution contract over PostgreSQL,
//!   MySQL, SQLite, MongoDB, Snowflake, and BigQuery
//! - **Schema analysis**: catalog introspection with semantic-type
//!   hints and declared-relationship edges
//! - **Relevance filter**: embedding-based narrowing of large schemas
//! - **Provider abstraction**: interchangeable OpenAI / Anthropic /
//!   Ollama backends behind one contract
//! - **Safety gate**: static read-only validation ahead of execution
//! - **Self-healing**: one bounded retry that repairs a failing query
//!   from the backend error
//! - **Result cache + background jobs**: shared key/value store with
//!   graceful degradation
//!
//! # Architecture
//!
//! - [`config`]: configuration loading and injection
//! - [`datasource`]: connector trait and per-backend implementations
//! - [`schema`]: schema model, analyzer, and relevance filter
//! - [`llm`]: provider trait and implementations
//! - [`pipeline`]: the orchestrated state machine (safety gate,
//!   self-healer, chart recommender)
//! - [`cache`] / [`jobs`]: shared store, result cache, job runner
//! - [`api`]: thin HTTP shell over the pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use querylens::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cache;
pub mod config;
pub mod datasource;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod schema;
pub mod server;

use std::sync::Arc;

use api::query::ConversationStore;
use api::sources::SourceRegistry;
use config::AppConfig;
use jobs::JobRunner;
use pipeline::QueryPipeline;
use schema::relevance::SchemaRelevance;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The orchestrated query pipeline.
    pub pipeline: Arc<QueryPipeline>,
    /// Background job runner.
    pub jobs: JobRunner,
    /// Registered data sources.
    pub sources: Arc<SourceRegistry>,
    /// Schema relevance filter, present when embeddings are configured.
    pub relevance: Option<Arc<SchemaRelevance>>,
    /// In-process conversation windows for multi-turn refinement.
    pub conversations: Arc<ConversationStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("pipeline", &self.pipeline)
            .field("relevance", &self.relevance.is_some())
            .finish()
    }
}
