//! Relational connector for PostgreSQL, MySQL, and local SQLite files.
//!
//! Each instance owns a bounded sqlx pool sized from configuration.
//! Timeouts are bound engine-side per dialect (`statement_timeout`,
//! `max_execution_time`); SQLite runs in-process, where the task
//! deadline is the engine bound.

use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo};

use crate::config::QueryConfig;
use crate::error::{ConnectionTest, QueryError};
use crate::pipeline::safety;
use crate::schema::{ColumnDescription, RelationshipEdge, SchemaDescription, TableDescription};

use super::{Connector, DataSourceDescriptor, DataSourceKind, ExecutionResult, Row};

enum SqlPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for SqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Postgres(_) => "Postgres",
            Self::MySql(_) => "MySql",
            Self::Sqlite(_) => "Sqlite",
        };
        f.write_str(name)
    }
}

/// Connector for SQL-dialect backends.
#[derive(Debug)]
pub struct SqlConnector {
    pool: SqlPool,
    kind: DataSourceKind,
}

impl SqlConnector {
    /// Open a bounded pool for the descriptor's backend.
    pub async fn connect(
        descriptor: &DataSourceDescriptor,
        config: &QueryConfig,
    ) -> Result<Self, QueryError> {
        let max_connections = config.pool_size + config.pool_max_overflow;
        let acquire_timeout = Duration::from_secs(config.pool_acquire_timeout_secs);

        let pool = match descriptor.kind {
            DataSourceKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&descriptor.credentials)
                    .await
                    .map_err(|e| QueryError::Connectivity(e.to_string()))?;
                SqlPool::Postgres(pool)
            }
            DataSourceKind::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&descriptor.credentials)
                    .await
                    .map_err(|e| QueryError::Connectivity(e.to_string()))?;
                SqlPool::MySql(pool)
            }
            DataSourceKind::Sqlite => {
                let path = descriptor
                    .file_path
                    .as_deref()
                    .unwrap_or(descriptor.credentials.as_str());
                let options = if path.starts_with("sqlite:") {
                    SqliteConnectOptions::from_str(path)
                        .map_err(|e| QueryError::Connectivity(e.to_string()))?
                } else {
                    SqliteConnectOptions::new().filename(path)
                }
                .read_only(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections.min(4))
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| QueryError::Connectivity(e.to_string()))?;
                SqlPool::Sqlite(pool)
            }
            other => {
                return Err(QueryError::InvalidRequest(format!(
                    "{} is not a SQL backend",
                    other.dialect_name()
                )));
            }
        };

        Ok(Self {
            pool,
            kind: descriptor.kind,
        })
    }

    async fn list_tables(&self) -> Result<Vec<String>, QueryError> {
        let map_err = |e: sqlx::Error| QueryError::Execution(e.to_string());
        match &self.pool {
            SqlPool::Postgres(pool) => {
                let rows = sqlx::query(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .fetch_all(pool)
                .await
                .map_err(map_err)?;
                Ok(rows.iter().filter_map(|r| r.try_get(0).ok()).collect())
            }
            SqlPool::MySql(pool) => {
                let rows = sqlx::query(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .fetch_all(pool)
                .await
                .map_err(map_err)?;
                Ok(rows.iter().filter_map(|r| r.try_get(0).ok()).collect())
            }
            SqlPool::Sqlite(pool) => {
                let rows = sqlx::query(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                     ORDER BY name",
                )
                .fetch_all(pool)
                .await
                .map_err(map_err)?;
                Ok(rows.iter().filter_map(|r| r.try_get(0).ok()).collect())
            }
        }
    }

    async fn introspect(&self) -> Result<SchemaDescription, QueryError> {
        match &self.pool {
            SqlPool::Postgres(pool) => introspect_postgres(pool).await,
            SqlPool::MySql(pool) => introspect_mysql(pool).await,
            SqlPool::Sqlite(pool) => introspect_sqlite(pool).await,
        }
    }
}

#[async_trait::async_trait]
impl Connector for SqlConnector {
    async fn test_connection(&self) -> ConnectionTest {
        let probe = match &self.pool {
            SqlPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SqlPool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SqlPool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        };

        match probe {
            Ok(()) => {
                let tables = self.table_names().await;
                ConnectionTest::ok("Connection successful", tables)
            }
            Err(e) => ConnectionTest::failed(format!("Connection failed: {e}")),
        }
    }

    async fn table_names(&self) -> Vec<String> {
        self.list_tables().await.unwrap_or_default()
    }

    async fn schema(&self) -> Result<SchemaDescription, QueryError> {
        self.introspect().await
    }

    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, QueryError> {
        // Second line of defense: the safety gate already ran, but the
        // connector never trusts its callers with write statements.
        safety::validate_sql_text(query)?;

        let timeout_secs = timeout.as_secs().max(1);
        let started = Instant::now();

        let rows = tokio::time::timeout(timeout, self.fetch_rows(query, timeout_secs))
            .await
            .map_err(|_| QueryError::Timeout {
                seconds: timeout_secs,
            })??;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ExecutionResult::new(rows, elapsed_ms))
    }

    async fn close(&self) {
        match &self.pool {
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Sqlite(pool) => pool.close().await,
        }
    }

    fn kind(&self) -> DataSourceKind {
        self.kind
    }
}

impl SqlConnector {
    async fn fetch_rows(&self, query: &str, timeout_secs: u64) -> Result<Vec<Row>, QueryError> {
        match &self.pool {
            SqlPool::Postgres(pool) => {
                let mut conn = pool
                    .acquire()
                    .await
                    .map_err(|e| QueryError::Connectivity(e.to_string()))?;
                // Engine-level bound: the server cancels the statement itself.
                sqlx::query(&format!("SET statement_timeout = {}", timeout_secs * 1000))
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| QueryError::Execution(e.to_string()))?;
                let rows = sqlx::query(query)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_pg_error(&e, timeout_secs))?;
                Ok(rows.iter().map(pg_row_to_json).collect())
            }
            SqlPool::MySql(pool) => {
                let mut conn = pool
                    .acquire()
                    .await
                    .map_err(|e| QueryError::Connectivity(e.to_string()))?;
                sqlx::query(&format!(
                    "SET SESSION max_execution_time = {}",
                    timeout_secs * 1000
                ))
                .execute(&mut *conn)
                .await
                .map_err(|e| QueryError::Execution(e.to_string()))?;
                let rows = sqlx::query(query)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| map_mysql_error(&e, timeout_secs))?;
                Ok(rows.iter().map(mysql_row_to_json).collect())
            }
            SqlPool::Sqlite(pool) => {
                let rows = sqlx::query(query)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| QueryError::Execution(e.to_string()))?;
                Ok(rows.iter().map(sqlite_row_to_json).collect())
            }
        }
    }
}

fn map_pg_error(e: &sqlx::Error, timeout_secs: u64) -> QueryError {
    if let sqlx::Error::Database(db) = e {
        // 57014 = query_canceled, raised by statement_timeout
        if db.code().as_deref() == Some("57014") {
            return QueryError::Timeout {
                seconds: timeout_secs,
            };
        }
    }
    QueryError::Execution(e.to_string())
}

fn map_mysql_error(e: &sqlx::Error, timeout_secs: u64) -> QueryError {
    if let sqlx::Error::Database(db) = e {
        // 3024 = ER_QUERY_TIMEOUT from max_execution_time
        if db.code().as_deref() == Some("3024") {
            return QueryError::Timeout {
                seconds: timeout_secs,
            };
        }
    }
    QueryError::Execution(e.to_string())
}

fn pg_row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = match col.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "INT8" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "NUMERIC" => row
                .try_get::<Option<sqlx::types::Decimal>, _>(i)
                .ok()
                .flatten()
                .and_then(|d| d.to_string().parse::<f64>().ok())
                .map(|v| serde_json::json!(v)),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339())),
            "UUID" => row
                .try_get::<Option<sqlx::types::Uuid>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string())),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(i)
                .ok()
                .flatten(),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
        };
        map.insert(col.name().to_string(), value.unwrap_or(serde_json::Value::Null));
    }
    map
}

fn mysql_row_to_json(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let type_name = col.type_info().name();
        let value = match type_name {
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "FLOAT" => row
                .try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "DOUBLE" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "DECIMAL" => row
                .try_get::<Option<sqlx::types::Decimal>, _>(i)
                .ok()
                .flatten()
                .and_then(|d| d.to_string().parse::<f64>().ok())
                .map(|v| serde_json::json!(v)),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string())),
            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string())),
            "JSON" => row
                .try_get::<Option<serde_json::Value>, _>(i)
                .ok()
                .flatten(),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
        };
        map.insert(col.name().to_string(), value.unwrap_or(serde_json::Value::Null));
    }
    map
}

fn sqlite_row_to_json(row: &SqliteRow) -> Row {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        // SQLite affinity names; expression columns fall back to the
        // runtime value type.
        let value = match col.type_info().name() {
            "INTEGER" | "BOOLEAN" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "REAL" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(|v| serde_json::json!(v)),
            "NULL" => None,
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
        };
        map.insert(col.name().to_string(), value.unwrap_or(serde_json::Value::Null));
    }
    map
}

async fn introspect_postgres(pool: &PgPool) -> Result<SchemaDescription, QueryError> {
    let map_err = |e: sqlx::Error| QueryError::Execution(e.to_string());

    let column_rows = sqlx::query(
        "SELECT table_name, column_name, data_type, is_nullable \
         FROM information_schema.columns \
         WHERE table_schema = 'public' \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;

    let pk_rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         WHERE tc.table_schema = 'public' AND tc.constraint_type = 'PRIMARY KEY'",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;

    let fk_rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name, \
                ccu.table_name AS foreign_table, ccu.column_name AS foreign_column \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         JOIN information_schema.constraint_column_usage ccu \
           ON tc.constraint_name = ccu.constraint_name \
          AND tc.table_schema = ccu.table_schema \
         WHERE tc.table_schema = 'public' AND tc.constraint_type = 'FOREIGN KEY'",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;

    let primary_keys: Vec<(String, String)> = pk_rows
        .iter()
        .filter_map(|r| Some((r.try_get(0).ok()?, r.try_get(1).ok()?)))
        .collect();
    let edges: Vec<RelationshipEdge> = fk_rows
        .iter()
        .filter_map(|r| {
            Some(RelationshipEdge {
                from_table: r.try_get(0).ok()?,
                from_column: r.try_get(1).ok()?,
                to_table: r.try_get(2).ok()?,
                to_column: r.try_get(3).ok()?,
            })
        })
        .collect();

    let columns: Vec<(String, String, String, bool)> = column_rows
        .iter()
        .filter_map(|r| {
            let nullable: String = r.try_get(3).ok()?;
            Some((
                r.try_get(0).ok()?,
                r.try_get(1).ok()?,
                r.try_get(2).ok()?,
                nullable.eq_ignore_ascii_case("yes"),
            ))
        })
        .collect();

    Ok(assemble_schema(columns, &primary_keys, edges))
}

async fn introspect_mysql(pool: &MySqlPool) -> Result<SchemaDescription, QueryError> {
    let map_err = |e: sqlx::Error| QueryError::Execution(e.to_string());

    let column_rows = sqlx::query(
        "SELECT table_name, column_name, data_type, is_nullable, column_key \
         FROM information_schema.columns \
         WHERE table_schema = DATABASE() \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;

    let fk_rows = sqlx::query(
        "SELECT table_name, column_name, referenced_table_name, referenced_column_name \
         FROM information_schema.key_column_usage \
         WHERE table_schema = DATABASE() AND referenced_table_name IS NOT NULL",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;

    let mut primary_keys = Vec::new();
    let columns: Vec<(String, String, String, bool)> = column_rows
        .iter()
        .filter_map(|r| {
            let table: String = r.try_get(0).ok()?;
            let column: String = r.try_get(1).ok()?;
            let nullable: String = r.try_get(3).ok()?;
            let key: String = r.try_get(4).unwrap_or_default();
            if key == "PRI" {
                primary_keys.push((table.clone(), column.clone()));
            }
            Some((
                table,
                column,
                r.try_get(2).ok()?,
                nullable.eq_ignore_ascii_case("yes"),
            ))
        })
        .collect();

    let edges: Vec<RelationshipEdge> = fk_rows
        .iter()
        .filter_map(|r| {
            Some(RelationshipEdge {
                from_table: r.try_get(0).ok()?,
                from_column: r.try_get(1).ok()?,
                to_table: r.try_get(2).ok()?,
                to_column: r.try_get(3).ok()?,
            })
        })
        .collect();

    Ok(assemble_schema(columns, &primary_keys, edges))
}

async fn introspect_sqlite(pool: &SqlitePool) -> Result<SchemaDescription, QueryError> {
    let map_err = |e: sqlx::Error| QueryError::Execution(e.to_string());

    let table_rows = sqlx::query(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(map_err)?;
    let table_names: Vec<String> = table_rows.iter().filter_map(|r| r.try_get(0).ok()).collect();

    let mut columns = Vec::new();
    let mut primary_keys = Vec::new();
    let mut edges = Vec::new();

    for table in &table_names {
        // Identifier comes from sqlite_master, not user input; quotes
        // guard against exotic table names.
        let info_rows = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
            .fetch_all(pool)
            .await
            .map_err(map_err)?;
        for r in &info_rows {
            let name: String = r.try_get("name").unwrap_or_default();
            let data_type: String = r.try_get("type").unwrap_or_default();
            let notnull: i64 = r.try_get("notnull").unwrap_or(0);
            let pk: i64 = r.try_get("pk").unwrap_or(0);
            if pk > 0 {
                primary_keys.push((table.clone(), name.clone()));
            }
            columns.push((table.clone(), name, data_type, notnull == 0));
        }

        let fk_rows = sqlx::query(&format!("PRAGMA foreign_key_list(\"{table}\")"))
            .fetch_all(pool)
            .await
            .map_err(map_err)?;
        for r in &fk_rows {
            let to_table: String = r.try_get("table").unwrap_or_default();
            let from_column: String = r.try_get("from").unwrap_or_default();
            let to_column: String = r.try_get("to").unwrap_or_default();
            edges.push(RelationshipEdge {
                from_table: table.clone(),
                from_column,
                to_table,
                to_column,
            });
        }
    }

    Ok(assemble_schema(columns, &primary_keys, edges))
}

/// Build the ordered schema description from flat catalog rows.
fn assemble_schema(
    columns: Vec<(String, String, String, bool)>,
    primary_keys: &[(String, String)],
    edges: Vec<RelationshipEdge>,
) -> SchemaDescription {
    let mut tables: Vec<TableDescription> = Vec::new();

    for (table, column, data_type, nullable) in columns {
        let mut desc = ColumnDescription::new(column.clone(), data_type, nullable);
        desc.is_primary_key = primary_keys.iter().any(|(t, c)| *t == table && *c == column);
        desc.is_foreign_key = edges
            .iter()
            .any(|e| e.from_table == table && e.from_column == column);

        match tables.iter_mut().find(|t| t.name == table) {
            Some(existing) => existing.columns.push(desc),
            None => tables.push(TableDescription {
                name: table,
                columns: vec![desc],
                relationships: Vec::new(),
            }),
        }
    }

    for edge in edges {
        if let Some(table) = tables.iter_mut().find(|t| t.name == edge.from_table) {
            table.relationships.push(edge);
        }
    }

    SchemaDescription { tables }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_groups_columns_and_edges() {
        let columns = vec![
            ("orders".to_string(), "id".to_string(), "INTEGER".to_string(), false),
            ("orders".to_string(), "user_id".to_string(), "INTEGER".to_string(), false),
            ("users".to_string(), "id".to_string(), "INTEGER".to_string(), false),
        ];
        let pks = vec![
            ("orders".to_string(), "id".to_string()),
            ("users".to_string(), "id".to_string()),
        ];
        let edges = vec![RelationshipEdge {
            from_table: "orders".into(),
            from_column: "user_id".into(),
            to_table: "users".into(),
            to_column: "id".into(),
        }];

        let schema = assemble_schema(columns, &pks, edges);
        assert_eq!(schema.tables.len(), 2);

        let orders = &schema.tables[0];
        assert_eq!(orders.name, "orders");
        assert!(orders.columns[0].is_primary_key);
        assert!(orders.columns[1].is_foreign_key);
        assert_eq!(orders.relationships.len(), 1);

        let users = &schema.tables[1];
        assert!(users.relationships.is_empty());
    }

    #[tokio::test]
    async fn sqlite_end_to_end_introspection_and_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.db");

        // Seed a small database
        let seed = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true),
        )
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE sales (id INTEGER PRIMARY KEY, month TEXT NOT NULL, revenue REAL)",
        )
        .execute(&seed)
        .await
        .unwrap();
        sqlx::query("INSERT INTO sales (month, revenue) VALUES ('Jan', 100.0), ('Feb', 150.0)")
            .execute(&seed)
            .await
            .unwrap();
        seed.close().await;

        let descriptor = DataSourceDescriptor {
            kind: DataSourceKind::Sqlite,
            credentials: String::new(),
            file_path: Some(path.to_string_lossy().into_owned()),
            warehouse: None,
        };
        let connector = SqlConnector::connect(&descriptor, &QueryConfig::default())
            .await
            .unwrap();

        let probe = connector.test_connection().await;
        assert!(probe.ok);
        assert_eq!(probe.tables, vec!["sales".to_string()]);

        let schema = connector.schema().await.unwrap();
        assert_eq!(schema.tables.len(), 1);
        assert!(schema.tables[0].columns.iter().any(|c| c.is_primary_key));

        let text = connector.schema_text().await;
        assert!(text.contains("Table: sales"));
        assert!(text.contains("revenue"));

        let result = connector
            .execute(
                "SELECT month, revenue FROM sales ORDER BY id",
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["month"], serde_json::json!("Jan"));
        assert_eq!(result.rows[0]["revenue"], serde_json::json!(100.0));

        let denied = connector
            .execute("DELETE FROM sales", Duration::from_secs(5))
            .await;
        assert!(matches!(denied, Err(QueryError::SafetyViolation(_))));

        connector.close().await;
    }
}
