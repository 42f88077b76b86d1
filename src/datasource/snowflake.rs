//! Snowflake connector over the SQL API v2.
//!
//! Statements are submitted to `/api/v2/statements` with a bearer token;
//! the API's `timeout` field cancels the statement server-side, which is
//! what bounds the warehouse, not the HTTP deadline here.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConnectionTest, QueryError};
use crate::pipeline::safety;
use crate::schema::{ColumnDescription, SchemaDescription, TableDescription};

use super::{Connector, DataSourceDescriptor, DataSourceKind, ExecutionResult, Row};

/// Connector for the Snowflake data warehouse.
#[derive(Clone)]
pub struct SnowflakeConnector {
    client: Client,
    base_url: String,
    token: String,
    database: String,
    schema: String,
    warehouse: Option<String>,
    role: Option<String>,
}

impl std::fmt::Debug for SnowflakeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConnector")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    nullable: bool,
}

impl SnowflakeConnector {
    /// Build a connector from the descriptor's warehouse config and
    /// bearer token credentials.
    pub fn new(descriptor: &DataSourceDescriptor) -> Result<Self, QueryError> {
        let warehouse = descriptor.warehouse.clone().ok_or_else(|| {
            QueryError::Connectivity("Snowflake requires warehouse configuration".to_string())
        })?;
        let account = warehouse.account.clone().ok_or_else(|| {
            QueryError::Connectivity("Snowflake account identifier is required".to_string())
        })?;
        let database = warehouse.database.clone().ok_or_else(|| {
            QueryError::Connectivity("Snowflake database is required".to_string())
        })?;

        let client = Client::builder()
            .build()
            .map_err(|e| QueryError::Connectivity(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("https://{account}.snowflakecomputing.com"),
            token: descriptor.credentials.clone(),
            database,
            schema: warehouse.schema.clone().unwrap_or_else(|| "PUBLIC".to_string()),
            warehouse: warehouse.warehouse.clone(),
            role: warehouse.role.clone(),
        })
    }

    /// Submit one statement and return (metadata, string-encoded rows).
    async fn submit(
        &self,
        statement: &str,
        timeout_secs: u64,
    ) -> Result<(Vec<RowType>, Vec<Vec<Option<String>>>), QueryError> {
        let mut body = serde_json::json!({
            "statement": statement,
            "timeout": timeout_secs,
            "database": self.database,
            "schema": self.schema,
        });
        if let Some(ref warehouse) = self.warehouse {
            body["warehouse"] = Value::String(warehouse.clone());
        }
        if let Some(ref role) = self.role {
            body["role"] = Value::String(role.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/v2/statements", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Connectivity(format!("Snowflake unreachable: {e}")))?;

        let status = response.status();
        let parsed: StatementResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Execution(format!("Snowflake response unparsable: {e}")))?;

        if !status.is_success() {
            let message = parsed.message.unwrap_or_else(|| status.to_string());
            // 604 = statement canceled (timeout), per SQL API error codes
            if parsed.code.as_deref() == Some("604") {
                return Err(QueryError::Timeout {
                    seconds: timeout_secs,
                });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(QueryError::Connectivity(message));
            }
            return Err(QueryError::Execution(message));
        }

        let meta = parsed
            .result_set_meta_data
            .map(|m| m.row_type)
            .unwrap_or_default();
        Ok((meta, parsed.data.unwrap_or_default()))
    }
}

#[async_trait::async_trait]
impl Connector for SnowflakeConnector {
    async fn test_connection(&self) -> ConnectionTest {
        match self.submit("SELECT 1", 30).await {
            Ok(_) => {
                let tables = self.table_names().await;
                ConnectionTest::ok("Successfully connected to Snowflake", tables)
            }
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn table_names(&self) -> Vec<String> {
        let statement = format!(
            "SELECT table_name FROM {}.INFORMATION_SCHEMA.TABLES \
             WHERE table_schema = '{}' ORDER BY table_name",
            self.database,
            self.schema.to_uppercase()
        );
        match self.submit(&statement, 30).await {
            Ok((_, rows)) => rows
                .into_iter()
                .filter_map(|mut r| r.drain(..).next().flatten())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list Snowflake tables");
                Vec::new()
            }
        }
    }

    async fn schema(&self) -> Result<SchemaDescription, QueryError> {
        let statement = format!(
            "SELECT table_name, column_name, data_type, is_nullable \
             FROM {}.INFORMATION_SCHEMA.COLUMNS \
             WHERE table_schema = '{}' \
             ORDER BY table_name, ordinal_position",
            self.database,
            self.schema.to_uppercase()
        );
        let (_, rows) = self.submit(&statement, 30).await?;

        let mut tables: Vec<TableDescription> = Vec::new();
        for row in rows {
            let [table, column, data_type, nullable] = [
                row.first().cloned().flatten().unwrap_or_default(),
                row.get(1).cloned().flatten().unwrap_or_default(),
                row.get(2).cloned().flatten().unwrap_or_default(),
                row.get(3).cloned().flatten().unwrap_or_default(),
            ];
            let desc =
                ColumnDescription::new(column, data_type, nullable.eq_ignore_ascii_case("yes"));
            match tables.iter_mut().find(|t| t.name == table) {
                Some(existing) => existing.columns.push(desc),
                None => tables.push(TableDescription {
                    name: table,
                    columns: vec![desc],
                    relationships: Vec::new(),
                }),
            }
        }
        Ok(SchemaDescription { tables })
    }

    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, QueryError> {
        safety::validate_sql_text(query)?;

        let timeout_secs = timeout.as_secs().max(1);
        let started = Instant::now();

        let (meta, data) = tokio::time::timeout(
            // The server cancels at `timeout`; leave headroom for the round trip.
            timeout + Duration::from_secs(5),
            self.submit(query, timeout_secs),
        )
        .await
        .map_err(|_| QueryError::Timeout {
            seconds: timeout_secs,
        })??;

        let rows = data
            .iter()
            .map(|raw| {
                let mut row = Row::new();
                for (i, column) in meta.iter().enumerate() {
                    let cell = raw.get(i).cloned().flatten();
                    row.insert(column.name.clone(), decode_cell(cell, &column.column_type));
                }
                row
            })
            .collect();

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ExecutionResult::new(rows, elapsed_ms))
    }

    async fn close(&self) {
        // Stateless HTTP API; nothing pooled to release.
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Snowflake
    }
}

/// Decode the SQL API's string-encoded cell by its declared type.
fn decode_cell(cell: Option<String>, column_type: &str) -> Value {
    let Some(text) = cell else {
        return Value::Null;
    };
    match column_type.to_lowercase().as_str() {
        "fixed" | "real" => text
            .parse::<f64>()
            .map(|v| serde_json::json!(v))
            .unwrap_or(Value::String(text)),
        "boolean" => match text.as_str() {
            "true" | "TRUE" | "1" => Value::Bool(true),
            "false" | "FALSE" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_cell_by_type() {
        assert_eq!(decode_cell(Some("42".into()), "FIXED"), serde_json::json!(42.0));
        assert_eq!(decode_cell(Some("3.14".into()), "real"), serde_json::json!(3.14));
        assert_eq!(decode_cell(Some("true".into()), "BOOLEAN"), Value::Bool(true));
        assert_eq!(
            decode_cell(Some("hello".into()), "TEXT"),
            Value::String("hello".into())
        );
        assert_eq!(decode_cell(None, "TEXT"), Value::Null);
    }

    #[test]
    fn new_requires_warehouse_config() {
        let descriptor = DataSourceDescriptor {
            kind: DataSourceKind::Snowflake,
            credentials: "token".into(),
            file_path: None,
            warehouse: None,
        };
        assert!(matches!(
            SnowflakeConnector::new(&descriptor),
            Err(QueryError::Connectivity(_))
        ));
    }

    #[test]
    fn statement_response_parses() {
        let raw = r#"{
            "resultSetMetaData": {"rowType": [
                {"name": "MONTH", "type": "text", "nullable": true},
                {"name": "REVENUE", "type": "fixed", "nullable": true}
            ]},
            "data": [["Jan", "100"], ["Feb", "150"]]
        }"#;
        let parsed: StatementResponse = serde_json::from_str(raw).unwrap();
        let meta = parsed.result_set_meta_data.unwrap().row_type;
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].name, "MONTH");
        assert!(meta[0].nullable);
        assert_eq!(parsed.data.unwrap().len(), 2);
    }
}
