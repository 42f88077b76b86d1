//! BigQuery connector over the REST API.
//!
//! Auth is a service-account key: an RS256 assertion is minted and
//! exchanged for an OAuth access token, cached until shortly before
//! expiry. Queries go through `jobs.query` with `timeoutMs`; an
//! incomplete job at the deadline is a timeout, never a silent
//! truncation.

use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectionTest, QueryError};
use crate::pipeline::safety;
use crate::schema::{ColumnDescription, SchemaDescription, TableDescription};

use super::{Connector, DataSourceDescriptor, DataSourceKind, ExecutionResult, Row};

const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";

/// Service-account key fields used for the token exchange.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires")]
    expires_in: u64,
}

fn default_expires() -> u64 {
    3600
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Connector for Google BigQuery.
pub struct BigQueryConnector {
    client: Client,
    key: ServiceAccountKey,
    project_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for BigQueryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryConnector")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl BigQueryConnector {
    /// Build a connector from stringified service-account JSON.
    pub fn new(descriptor: &DataSourceDescriptor) -> Result<Self, QueryError> {
        let key: ServiceAccountKey = serde_json::from_str(&descriptor.credentials)
            .map_err(|e| QueryError::Connectivity(format!("invalid BigQuery credentials: {e}")))?;

        let project_id = descriptor
            .warehouse
            .as_ref()
            .and_then(|w| w.project_id.clone())
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| {
                QueryError::Connectivity("BigQuery project id is required".to_string())
            })?;

        Ok(Self {
            client: Client::new(),
            key,
            project_id,
            token: Mutex::new(None),
        })
    }

    /// Current access token, refreshed via the JWT-bearer grant when
    /// missing or within a minute of expiry.
    async fn access_token(&self) -> Result<String, QueryError> {
        if let Some(cached) = self.token.lock().as_ref() {
            if cached.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(cached.token.clone());
            }
        }

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| QueryError::Connectivity(format!("invalid service-account key: {e}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| QueryError::Connectivity(format!("failed to sign assertion: {e}")))?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| QueryError::Connectivity(format!("token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(QueryError::Connectivity(format!(
                "token exchange failed: {}",
                response.status()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Connectivity(format!("token response unparsable: {e}")))?;

        let token = parsed.access_token.clone();
        *self.token.lock() = Some(CachedToken {
            token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        });
        Ok(token)
    }

    async fn get_json(&self, url: &str) -> Result<Value, QueryError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| QueryError::Connectivity(format!("BigQuery unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(QueryError::Execution(format!(
                "BigQuery API returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| QueryError::Execution(format!("BigQuery response unparsable: {e}")))
    }

    async fn list_datasets(&self) -> Result<Vec<String>, QueryError> {
        let url = format!("{BIGQUERY_BASE}/projects/{}/datasets", self.project_id);
        let body = self.get_json(&url).await?;
        Ok(body["datasets"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|d| d["datasetReference"]["datasetId"].as_str())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Run a query through `jobs.query`, returning (fields, rows).
    async fn run_query(
        &self,
        statement: &str,
        timeout_secs: u64,
    ) -> Result<(Vec<(String, String)>, Vec<Row>), QueryError> {
        let token = self.access_token().await?;
        let url = format!("{BIGQUERY_BASE}/projects/{}/queries", self.project_id);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&serde_json::json!({
                "query": statement,
                "useLegacySql": false,
                "timeoutMs": timeout_secs * 1000,
            }))
            .send()
            .await
            .map_err(|e| QueryError::Connectivity(format!("BigQuery unreachable: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| QueryError::Execution(format!("BigQuery response unparsable: {e}")))?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("BigQuery request failed")
                .to_string();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(QueryError::Connectivity(message));
            }
            return Err(QueryError::Execution(message));
        }

        if body["jobComplete"].as_bool() == Some(false) {
            return Err(QueryError::Timeout {
                seconds: timeout_secs,
            });
        }

        let fields: Vec<(String, String)> = body["schema"]["fields"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|f| {
                        (
                            f["name"].as_str().unwrap_or_default().to_string(),
                            f["type"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows = body["rows"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|r| decode_bq_row(r, &fields))
                    .collect::<Vec<Row>>()
            })
            .unwrap_or_default();

        Ok((fields, rows))
    }
}

#[async_trait::async_trait]
impl Connector for BigQueryConnector {
    async fn test_connection(&self) -> ConnectionTest {
        match self.list_datasets().await {
            Ok(datasets) => ConnectionTest::ok(
                format!("Connected to project: {}", self.project_id),
                datasets,
            ),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn table_names(&self) -> Vec<String> {
        // Fully qualified as dataset.table across all datasets
        let Ok(datasets) = self.list_datasets().await else {
            return Vec::new();
        };

        let mut tables = Vec::new();
        for dataset in datasets {
            let url = format!(
                "{BIGQUERY_BASE}/projects/{}/datasets/{dataset}/tables",
                self.project_id
            );
            if let Ok(body) = self.get_json(&url).await {
                if let Some(items) = body["tables"].as_array() {
                    for t in items {
                        if let Some(id) = t["tableReference"]["tableId"].as_str() {
                            tables.push(format!("{dataset}.{id}"));
                        }
                    }
                }
            }
        }
        tables
    }

    async fn schema(&self) -> Result<SchemaDescription, QueryError> {
        let datasets = self.list_datasets().await?;
        let mut tables: Vec<TableDescription> = Vec::new();

        for dataset in datasets {
            let statement = format!(
                "SELECT table_name, column_name, data_type, is_nullable \
                 FROM `{}.{dataset}.INFORMATION_SCHEMA.COLUMNS` \
                 ORDER BY table_name, ordinal_position",
                self.project_id
            );
            let (_, rows) = self.run_query(&statement, 30).await?;

            for row in rows {
                let get = |k: &str| row.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
                let table = format!("{dataset}.{}", get("table_name"));
                let desc = ColumnDescription::new(
                    get("column_name"),
                    get("data_type"),
                    get("is_nullable").eq_ignore_ascii_case("yes"),
                );
                match tables.iter_mut().find(|t| t.name == table) {
                    Some(existing) => existing.columns.push(desc),
                    None => tables.push(TableDescription {
                        name: table,
                        columns: vec![desc],
                        relationships: Vec::new(),
                    }),
                }
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

        let (_, rows) = tokio::time::timeout(
            timeout + Duration::from_secs(5),
            self.run_query(query, timeout_secs),
        )
        .await
        .map_err(|_| QueryError::Timeout {
            seconds: timeout_secs,
        })??;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ExecutionResult::new(rows, elapsed_ms))
    }

    async fn close(&self) {
        // Stateless HTTP API; the cached token dies with the connector.
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::BigQuery
    }
}

/// Decode one `{"f": [{"v": ...}]}` row using the schema field list.
fn decode_bq_row(raw: &Value, fields: &[(String, String)]) -> Row {
    let mut row = Row::new();
    let cells = raw["f"].as_array().cloned().unwrap_or_default();

    for (i, (name, field_type)) in fields.iter().enumerate() {
        let cell = cells.get(i).map(|c| c["v"].clone()).unwrap_or(Value::Null);
        let value = match cell {
            Value::String(text) => match field_type.as_str() {
                "INTEGER" | "INT64" => text
                    .parse::<i64>()
                    .map(|v| serde_json::json!(v))
                    .unwrap_or(Value::String(text)),
                "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
                    .parse::<f64>()
                    .map(|v| serde_json::json!(v))
                    .unwrap_or(Value::String(text)),
                "BOOLEAN" | "BOOL" => Value::Bool(text == "true"),
                _ => Value::String(text),
            },
            other => other,
        };
        row.insert(name.clone(), value);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_typed_cells() {
        let fields = vec![
            ("month".to_string(), "STRING".to_string()),
            ("revenue".to_string(), "INTEGER".to_string()),
            ("share".to_string(), "FLOAT64".to_string()),
            ("active".to_string(), "BOOL".to_string()),
        ];
        let raw = serde_json::json!({
            "f": [{"v": "Jan"}, {"v": "100"}, {"v": "0.4"}, {"v": "true"}]
        });
        let row = decode_bq_row(&raw, &fields);
        assert_eq!(row["month"], serde_json::json!("Jan"));
        assert_eq!(row["revenue"], serde_json::json!(100));
        assert_eq!(row["share"], serde_json::json!(0.4));
        assert_eq!(row["active"], serde_json::json!(true));
    }

    #[test]
    fn null_cells_stay_null() {
        let fields = vec![("a".to_string(), "INTEGER".to_string())];
        let raw = serde_json::json!({"f": [{"v": null}]});
        let row = decode_bq_row(&raw, &fields);
        assert_eq!(row["a"], Value::Null);
    }

    #[test]
    fn rejects_malformed_credentials() {
        let descriptor = DataSourceDescriptor {
            kind: DataSourceKind::BigQuery,
            credentials: "{not json".into(),
            file_path: None,
            warehouse: None,
        };
        assert!(matches!(
            BigQueryConnector::new(&descriptor),
            Err(QueryError::Connectivity(_))
        ));
    }
}
