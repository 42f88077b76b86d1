//! Document-store connector for MongoDB.
//!
//! There is no free-form statement here: queries arrive as a structured
//! JSON payload naming a collection, an optional
//! filter/projection/sort, and a row limit. Schema is inferred by
//! sampling documents, and the timeout rides server-side as `maxTimeMS`.

use std::time::{Duration, Instant};

use futures::TryStreamExt;
use mongodb::bson::{Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Database};
use serde::Deserialize;

use crate::error::{ConnectionTest, QueryError};
use crate::pipeline::safety;
use crate::schema::{ColumnDescription, SchemaDescription, TableDescription};

use super::{Connector, DataSourceDescriptor, DataSourceKind, ExecutionResult, Row};

/// Documents sampled per collection when inferring the schema.
const SAMPLE_SIZE: i64 = 5;

/// Default row limit when the payload omits one.
const DEFAULT_LIMIT: i64 = 100;

/// The structured query payload shape.
#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    /// Target collection.
    pub collection: String,
    /// Match filter, defaults to everything.
    #[serde(default)]
    pub filter: serde_json::Value,
    /// Field projection.
    #[serde(default)]
    pub projection: Option<serde_json::Value>,
    /// Sort specification (field -> 1/-1).
    #[serde(default)]
    pub sort: Option<serde_json::Value>,
    /// Row limit, defaults to 100.
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Connector for MongoDB databases.
#[derive(Clone)]
pub struct MongoConnector {
    client: Client,
    db: Database,
}

impl std::fmt::Debug for MongoConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnector")
            .field("database", &self.db.name())
            .finish()
    }
}

impl MongoConnector {
    /// Connect using a `mongodb://` URI; the database name comes from
    /// the URI path.
    pub async fn connect(descriptor: &DataSourceDescriptor) -> Result<Self, QueryError> {
        let mut options = ClientOptions::parse(&descriptor.credentials)
            .await
            .map_err(|e| QueryError::Connectivity(format!("invalid MongoDB URI: {e}")))?;
        options.server_selection_timeout = Some(Duration::from_secs(5));

        let default_db = options.default_database.clone().ok_or_else(|| {
            QueryError::Connectivity("MongoDB URI must include a database name".to_string())
        })?;

        let client = Client::with_options(options)
            .map_err(|e| QueryError::Connectivity(format!("failed to connect to MongoDB: {e}")))?;
        let db = client.database(&default_db);

        Ok(Self { client, db })
    }

    async fn sample_collection(&self, name: &str) -> Result<TableDescription, QueryError> {
        let collection = self.db.collection::<Document>(name);
        let mut cursor = collection
            .find(Document::new())
            .limit(SAMPLE_SIZE)
            .await
            .map_err(|e| QueryError::Execution(e.to_string()))?;

        let mut columns: Vec<ColumnDescription> = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| QueryError::Execution(e.to_string()))?
        {
            for (key, value) in &doc {
                if !columns.iter().any(|c| c.name == *key) {
                    columns.push(ColumnDescription::new(key.clone(), bson_type_name(value), true));
                }
            }
        }

        Ok(TableDescription {
            name: name.to_string(),
            columns,
            relationships: Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl Connector for MongoConnector {
    async fn test_connection(&self) -> ConnectionTest {
        let ping = self
            .client
            .database("admin")
            .run_command(mongodb::bson::doc! {"ping": 1})
            .await;

        match ping {
            Ok(_) => match self.db.list_collection_names().await {
                Ok(collections) => ConnectionTest::ok("Connection successful", collections),
                Err(e) => ConnectionTest::failed(format!("Connection failed: {e}")),
            },
            Err(e) => ConnectionTest::failed(format!("Connection failed: {e}")),
        }
    }

    async fn table_names(&self) -> Vec<String> {
        self.db.list_collection_names().await.unwrap_or_default()
    }

    async fn schema(&self) -> Result<SchemaDescription, QueryError> {
        let names = self
            .db
            .list_collection_names()
            .await
            .map_err(|e| QueryError::Connectivity(e.to_string()))?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            tables.push(self.sample_collection(&name).await?);
        }
        Ok(SchemaDescription { tables })
    }

    async fn schema_text(&self) -> String {
        // Empty collections still deserve a line in the summary, so the
        // generic formatter is wrapped rather than replaced.
        match self.schema().await {
            Ok(schema) => {
                let blocks: Vec<String> = schema
                    .tables
                    .iter()
                    .map(|t| {
                        if t.columns.is_empty() {
                            format!("Table: {}\nEmpty collection.", t.name)
                        } else {
                            let lines: Vec<String> = t
                                .columns
                                .iter()
                                .map(|c| format!("  - {}: {}", c.name, c.data_type))
                                .collect();
                            format!("Table: {}\nFields:\n{}", t.name, lines.join("\n"))
                        }
                    })
                    .collect();
                blocks.join("\n\n")
            }
            Err(e) => format!("Error getting schema: {e}"),
        }
    }

    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, QueryError> {
        safety::validate_document_payload(query)?;

        let payload: DocumentQuery = serde_json::from_str(query)
            .map_err(|e| QueryError::Execution(format!("invalid query payload: {e}")))?;

        let filter = json_to_document(&payload.filter)?;
        let projection = match payload.projection {
            Some(ref p) => Some(json_to_document(p)?),
            None => None,
        };
        let sort = match payload.sort {
            Some(ref s) => Some(json_to_document(s)?),
            None => None,
        };
        let started = Instant::now();

        // max_time is the server-side bound: the engine aborts the scan,
        // not just the client.
        let options = FindOptions::builder()
            .max_time(timeout)
            .limit(payload.limit.unwrap_or(DEFAULT_LIMIT))
            .projection(projection)
            .sort(sort)
            .build();

        let collection = self.db.collection::<Document>(&payload.collection);
        let fetch = async {
            let mut cursor = collection
                .find(filter)
                .with_options(options)
                .await
                .map_err(|e| QueryError::Execution(format!("MongoDB query error: {e}")))?;

            let mut rows: Vec<Row> = Vec::new();
            while let Some(doc) = cursor
                .try_next()
                .await
                .map_err(|e| map_mongo_error(&e, timeout.as_secs()))?
            {
                rows.push(document_to_row(&doc));
            }
            Ok::<_, QueryError>(rows)
        };

        let rows = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| QueryError::Timeout {
                seconds: timeout.as_secs(),
            })??;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ExecutionResult::new(rows, elapsed_ms))
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::MongoDb
    }
}

fn map_mongo_error(e: &mongodb::error::Error, timeout_secs: u64) -> QueryError {
    // MaxTimeMSExpired surfaces as server error code 50
    if let mongodb::error::ErrorKind::Command(ref cmd) = *e.kind {
        if cmd.code == 50 {
            return QueryError::Timeout {
                seconds: timeout_secs,
            };
        }
    }
    QueryError::Execution(format!("MongoDB query error: {e}"))
}

/// Convert a JSON object into a BSON document.
fn json_to_document(value: &serde_json::Value) -> Result<Document, QueryError> {
    if value.is_null() {
        return Ok(Document::new());
    }
    let bson: Bson = value
        .clone()
        .try_into()
        .map_err(|e| QueryError::Execution(format!("invalid BSON in payload: {e}")))?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        _ => Err(QueryError::Execution(
            "payload fields must be JSON objects".to_string(),
        )),
    }
}

/// Flatten a BSON document into a JSON result row.
///
/// ObjectIds become hex strings and datetimes RFC 3339, so result rows
/// stay plain scalars for the chart recommender and the cache.
fn document_to_row(doc: &Document) -> Row {
    let mut row = Row::new();
    for (key, value) in doc {
        row.insert(key.clone(), bson_to_json(value));
    }
    row
}

fn bson_to_json(value: &Bson) -> serde_json::Value {
    match value {
        Bson::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
        Bson::DateTime(dt) => serde_json::Value::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Double(f) => serde_json::json!(f),
        Bson::Int32(i) => serde_json::json!(i),
        Bson::Int64(i) => serde_json::json!(i),
        Bson::Boolean(b) => serde_json::Value::Bool(*b),
        Bson::String(s) => serde_json::Value::String(s.clone()),
        Bson::Null => serde_json::Value::Null,
        Bson::Array(items) => {
            serde_json::Value::Array(items.iter().map(bson_to_json).collect())
        }
        Bson::Document(doc) => {
            serde_json::Value::Object(document_to_row(doc))
        }
        other => serde_json::Value::String(other.to_string()),
    }
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::ObjectId(_) => "objectId",
        Bson::String(_) => "string",
        Bson::Int32(_) | Bson::Int64(_) => "int",
        Bson::Double(_) => "double",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Null => "null",
        _ => "mixed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn payload_parses_with_defaults() {
        let payload: DocumentQuery =
            serde_json::from_str(r#"{"collection": "users", "filter": {"age": {"$gt": 20}}}"#)
                .unwrap();
        assert_eq!(payload.collection, "users");
        assert!(payload.limit.is_none());
        assert!(payload.sort.is_none());
    }

    #[test]
    fn object_id_becomes_hex_string() {
        let oid = ObjectId::new();
        let document = doc! {"_id": oid, "name": "Ada"};
        let row = document_to_row(&document);
        assert_eq!(row["_id"], serde_json::json!(oid.to_hex()));
        assert_eq!(row["name"], serde_json::json!("Ada"));
    }

    #[test]
    fn nested_documents_convert_recursively() {
        let document = doc! {"meta": {"count": 3_i32, "tags": ["a", "b"]}};
        let row = document_to_row(&document);
        assert_eq!(
            row["meta"],
            serde_json::json!({"count": 3, "tags": ["a", "b"]})
        );
    }

    #[test]
    fn json_to_document_rejects_scalars() {
        assert!(json_to_document(&serde_json::json!({"a": 1})).is_ok());
        assert!(json_to_document(&serde_json::json!(null)).is_ok());
        assert!(json_to_document(&serde_json::json!(42)).is_err());
    }
}
