//! Data-source connectors.
//!
//! One [`Connector`] implementation per backend family, all behind a
//! single execution contract: probe connectivity, list entities,
//! describe schema, execute with a bounded timeout, release resources.
//!
//! Timeouts are enforced at the engine level by each implementation
//! (session settings, server-side `maxTimeMS`, API timeout fields) -
//! a client-side deadline alone would leave the backend burning
//! resources after the caller gave up.

pub mod bigquery;
pub mod mongo;
pub mod snowflake;
pub mod sql;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::error::{ConnectionTest, QueryError};
use crate::schema::SchemaDescription;

/// A single result row: column name to scalar value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of one query execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Ordered result rows.
    pub rows: Vec<Row>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: f64,
}

impl ExecutionResult {
    /// Wrap rows, deriving the count.
    #[must_use]
    pub fn new(rows: Vec<Row>, execution_time_ms: f64) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            row_count,
            execution_time_ms,
        }
    }
}

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    MySql,
    /// Local file-backed SQLite.
    Sqlite,
    /// MongoDB document store.
    MongoDb,
    /// Snowflake cloud warehouse.
    Snowflake,
    /// Google BigQuery cloud warehouse.
    BigQuery,
}

impl DataSourceKind {
    /// Whether queries for this backend are SQL text (as opposed to the
    /// document-store's structured JSON payload).
    #[must_use]
    pub fn is_sql_dialect(self) -> bool {
        !matches!(self, Self::MongoDb)
    }

    /// Dialect name used in prompts and logs.
    #[must_use]
    pub fn dialect_name(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::MongoDb => "mongodb",
            Self::Snowflake => "snowflake",
            Self::BigQuery => "bigquery",
        }
    }
}

/// Structured auth/config for the cloud-warehouse backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Snowflake account identifier (e.g. `org-account`).
    pub account: Option<String>,
    /// Warehouse to run on (Snowflake).
    pub warehouse: Option<String>,
    /// Database name (Snowflake).
    pub database: Option<String>,
    /// Schema name (Snowflake), defaults to PUBLIC.
    pub schema: Option<String>,
    /// Role to assume (Snowflake).
    pub role: Option<String>,
    /// GCP project id (BigQuery); falls back to the service account's.
    pub project_id: Option<String>,
}

/// Description of one configured data source.
///
/// Credentials arrive already decrypted from the owning collaborator and
/// are immutable for the lifetime of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Backend kind.
    pub kind: DataSourceKind,
    /// Opaque credentials: connection string, URI, bearer token, or
    /// service-account JSON depending on the kind.
    pub credentials: String,
    /// Local file path for file-backed backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Structured config for cloud-warehouse auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<WarehouseConfig>,
}

/// Uniform execution contract over one physical backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Probe connectivity. Failures are reported in the result, never
    /// raised past this boundary.
    async fn test_connection(&self) -> ConnectionTest;

    /// Best-effort list of table/collection names. Empty on failure.
    async fn table_names(&self) -> Vec<String>;

    /// Structured schema description from the backend catalog.
    async fn schema(&self) -> Result<SchemaDescription, QueryError>;

    /// Formatted schema text for LLM consumption.
    async fn schema_text(&self) -> String {
        match self.schema().await {
            Ok(schema) => crate::schema::analyzer::format_for_llm(&schema),
            Err(e) => format!("Error getting schema: {e}"),
        }
    }

    /// Execute a query with a hard timeout.
    ///
    /// Implementations reject anything that is not a single read-only
    /// operation before dispatch, and bind the timeout at the engine
    /// level in addition to the client-side deadline.
    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, QueryError>;

    /// Release pooled connections and handles. Idempotent.
    async fn close(&self);

    /// Backend kind of this connector.
    fn kind(&self) -> DataSourceKind;
}

/// Build a connector for the given descriptor.
///
/// The factory is the only place that knows which implementation backs
/// which kind; everything downstream sees `dyn Connector`.
pub async fn create_connector(
    descriptor: &DataSourceDescriptor,
    config: &QueryConfig,
) -> Result<Arc<dyn Connector>, QueryError> {
    match descriptor.kind {
        DataSourceKind::Postgres | DataSourceKind::MySql | DataSourceKind::Sqlite => {
            let connector = sql::SqlConnector::connect(descriptor, config).await?;
            Ok(Arc::new(connector))
        }
        DataSourceKind::MongoDb => {
            let connector = mongo::MongoConnector::connect(descriptor).await?;
            Ok(Arc::new(connector))
        }
        DataSourceKind::Snowflake => {
            let connector = snowflake::SnowflakeConnector::new(descriptor)?;
            Ok(Arc::new(connector))
        }
        DataSourceKind::BigQuery => {
            let connector = bigquery::BigQueryConnector::new(descriptor)?;
            Ok(Arc::new(connector))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_flags() {
        assert!(DataSourceKind::Postgres.is_sql_dialect());
        assert!(DataSourceKind::Snowflake.is_sql_dialect());
        assert!(!DataSourceKind::MongoDb.is_sql_dialect());
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DataSourceKind::BigQuery).unwrap(),
            "\"bigquery\""
        );
        let kind: DataSourceKind = serde_json::from_str("\"mongodb\"").unwrap();
        assert_eq!(kind, DataSourceKind::MongoDb);
    }

    #[test]
    fn execution_result_derives_count() {
        let mut row = Row::new();
        row.insert("n".into(), serde_json::json!(1));
        let result = ExecutionResult::new(vec![row], 12.5);
        assert_eq!(result.row_count, 1);
    }
}
