//! End-to-end pipeline tests over mock collaborators.
//!
//! The mock connector records every execution attempt so the tests can
//! assert what never ran; the mock provider replays scripted candidates.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use querylens::cache::{KvStore, MemoryStore, ResultCache};
use querylens::config::QueryConfig;
use querylens::datasource::{Connector, DataSourceKind, ExecutionResult, Row};
use querylens::error::{ConnectionTest, QueryError};
use querylens::llm::{CandidateQuery, GenerationRequest, InsightRequest, LlmProvider};
use querylens::pipeline::QueryPipeline;
use querylens::pipeline::chart::ChartKind;
use querylens::schema::{ColumnDescription, SchemaDescription, TableDescription};

/// Connector that replays scripted execution outcomes and counts calls.
struct MockConnector {
    outcomes: Mutex<VecDeque<Result<ExecutionResult, QueryError>>>,
    execute_calls: AtomicUsize,
}

impl MockConnector {
    fn new(outcomes: Vec<Result<ExecutionResult, QueryError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            execute_calls: AtomicUsize::new(0),
        }
    }

    fn succeeding(rows: Vec<Row>) -> Self {
        Self::new(vec![Ok(ExecutionResult::new(rows, 5.0))])
    }

    fn calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn test_connection(&self) -> ConnectionTest {
        ConnectionTest::ok("Connection successful", vec!["sales".to_string()])
    }

    async fn table_names(&self) -> Vec<String> {
        vec!["sales".to_string()]
    }

    async fn schema(&self) -> Result<SchemaDescription, QueryError> {
        Ok(SchemaDescription {
            tables: vec![TableDescription {
                name: "sales".to_string(),
                columns: vec![
                    ColumnDescription::new("month", "TEXT", false),
                    ColumnDescription::new("revenue", "NUMERIC", true),
                ],
                relationships: Vec::new(),
            }],
        })
    }

    async fn execute(
        &self,
        _query: &str,
        _timeout: Duration,
    ) -> Result<ExecutionResult, QueryError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().expect("scripted outcome")
        } else {
            outcomes.front().expect("scripted outcome").clone()
        }
    }

    async fn close(&self) {}

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Postgres
    }
}

/// Provider that replays scripted candidates and counts generations.
struct MockProvider {
    candidates: Mutex<VecDeque<CandidateQuery>>,
    generate_calls: AtomicUsize,
}

impl MockProvider {
    fn new(candidates: Vec<CandidateQuery>) -> Self {
        Self {
            candidates: Mutex::new(candidates.into()),
            generate_calls: AtomicUsize::new(0),
        }
    }

    fn single(query: &str, confidence: f64) -> Self {
        Self::new(vec![candidate(query, confidence)])
    }
}

fn candidate(query: &str, confidence: f64) -> CandidateQuery {
    CandidateQuery {
        query: query.to_string(),
        explanation: "test candidate".to_string(),
        confidence,
        tokens_used: None,
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate_query(&self, _req: &GenerationRequest) -> Result<CandidateQuery, QueryError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let mut candidates = self.candidates.lock();
        if candidates.len() > 1 {
            Ok(candidates.pop_front().expect("scripted candidate"))
        } else {
            Ok(candidates.front().expect("scripted candidate").clone())
        }
    }

    async fn generate_insight(&self, _req: &InsightRequest) -> Result<String, QueryError> {
        Ok("insight".to_string())
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Store wrapper that counts writes, for zero-cache-write assertions.
#[derive(Clone)]
struct TrackingStore {
    inner: MemoryStore,
    writes: Arc<AtomicUsize>,
}

impl TrackingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl KvStore for TrackingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_ex(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        self.inner.delete(key).await
    }
}

fn pipeline_with(provider: Arc<dyn LlmProvider>, store: Arc<dyn KvStore>) -> QueryPipeline {
    let config = QueryConfig::default();
    let cache = ResultCache::new(store, config.cache_ttl_secs);
    QueryPipeline::new(provider, cache, None, config, 10)
}

fn month_revenue_rows() -> Vec<Row> {
    [("Jan", 100), ("Feb", 150)]
        .iter()
        .map(|(month, revenue)| {
            let mut row = Row::new();
            row.insert("month".into(), serde_json::json!(month));
            row.insert("revenue".into(), serde_json::json!(revenue));
            row
        })
        .collect()
}

#[tokio::test]
async fn confidence_equal_to_threshold_passes() {
    let provider = Arc::new(MockProvider::single("SELECT month, revenue FROM sales", 0.7));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let response = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();

    assert!(!response.requires_confirmation);
    assert_eq!(response.row_count, 2);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn confidence_below_threshold_short_circuits() {
    let provider = Arc::new(MockProvider::single("SELECT month, revenue FROM sales", 0.69));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let store = TrackingStore::new();
    let writes = store.writes.clone();
    let pipeline = pipeline_with(provider, Arc::new(store));

    let response = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();

    assert!(response.requires_confirmation);
    assert_eq!(response.row_count, 0);
    assert!(response.results.is_empty());
    // The refinement suggestion names the shortfall
    assert!(response.explanation.contains("below the threshold"));
    assert_eq!(connector.calls(), 0);
    assert_eq!(writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn safety_violation_never_reaches_the_backend() {
    let provider = Arc::new(MockProvider::single("DROP TABLE users", 0.95));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let store = TrackingStore::new();
    let writes = store.writes.clone();
    let pipeline = pipeline_with(provider, Arc::new(store));

    let outcome = pipeline.run(&connector, "ds1", "drop the users table", &[]).await;

    let err = outcome.unwrap_err();
    assert_eq!(err.code(), "safety_violation");
    assert_ne!(err.code(), QueryError::Execution(String::new()).code());
    assert_eq!(connector.calls(), 0);
    assert_eq!(writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn warm_cache_yields_identical_results_and_flag() {
    let provider = Arc::new(MockProvider::single("SELECT month, revenue FROM sales", 0.9));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let first = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();
    assert!(!first.is_cached);

    let second = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();
    assert!(second.is_cached);
    assert_eq!(second.results, first.results);
    // Cache hit bypassed the runner entirely
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn healing_is_bounded_to_two_attempts() {
    let provider = Arc::new(MockProvider::new(vec![
        candidate("SELECT revnue FROM sales", 0.9),
        candidate("SELECT revenue FROM sales", 0.9),
    ]));
    let connector = MockConnector::new(vec![Err(QueryError::Execution(
        "column \"revnue\" does not exist".to_string(),
    ))]);
    let pipeline = pipeline_with(provider.clone(), Arc::new(MemoryStore::new()));

    let outcome = pipeline.run(&connector, "ds1", "revenue by month", &[]).await;

    assert!(outcome.is_err());
    // Original attempt + exactly one heal, never a third
    assert_eq!(connector.calls(), 2);
    assert_eq!(provider.generate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn successful_heal_marks_response() {
    let provider = Arc::new(MockProvider::new(vec![
        candidate("SELECT revnue FROM sales", 0.9),
        candidate("SELECT month, revenue FROM sales", 0.9),
    ]));
    let connector = MockConnector::new(vec![
        Err(QueryError::Execution("column \"revnue\" does not exist".to_string())),
        Ok(ExecutionResult::new(month_revenue_rows(), 7.0)),
    ]);
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let response = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();

    assert!(response.is_healed);
    assert_eq!(response.query_text, "SELECT month, revenue FROM sales");
    assert!(response.original_error.unwrap().contains("revnue"));
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn identical_healed_query_is_not_retried() {
    let provider = Arc::new(MockProvider::single("SELECT month FROM sales", 0.9));
    let connector = MockConnector::new(vec![Err(QueryError::Timeout { seconds: 30 })]);
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let outcome = pipeline.run(&connector, "ds1", "months", &[]).await;

    // An identical slow query would only time out again
    assert_eq!(outcome.unwrap_err().code(), "query_timeout");
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn timeout_retries_when_healed_query_differs() {
    let provider = Arc::new(MockProvider::new(vec![
        candidate("SELECT month FROM sales", 0.9),
        candidate("SELECT month FROM sales LIMIT 100", 0.9),
    ]));
    let connector = MockConnector::new(vec![
        Err(QueryError::Timeout { seconds: 30 }),
        Ok(ExecutionResult::new(month_revenue_rows(), 3.0)),
    ]);
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let response = pipeline.run(&connector, "ds1", "months", &[]).await.unwrap();

    assert!(response.is_healed);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn month_revenue_recommends_bar() {
    let provider = Arc::new(MockProvider::single("SELECT month, revenue FROM sales", 0.9));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let response = pipeline
        .run(&connector, "ds1", "revenue by month", &[])
        .await
        .unwrap();

    let chart = response.chart.unwrap();
    assert_eq!(chart.chart_type, ChartKind::Bar);
    assert_eq!(chart.x_column.as_deref(), Some("month"));
    assert_eq!(chart.y_column.as_deref(), Some("revenue"));
}

#[tokio::test]
async fn proportional_shares_recommend_donut() {
    let rows: Vec<Row> = [("A", 0.4), ("B", 0.6)]
        .iter()
        .map(|(category, share)| {
            let mut row = Row::new();
            row.insert("category".into(), serde_json::json!(category));
            row.insert("share".into(), serde_json::json!(share));
            row
        })
        .collect();

    let provider = Arc::new(MockProvider::single("SELECT category, share FROM mix", 0.9));
    let connector = MockConnector::succeeding(rows);
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let response = pipeline
        .run(&connector, "ds1", "share by category", &[])
        .await
        .unwrap();

    let chart = response.chart.unwrap();
    assert_eq!(chart.chart_type, ChartKind::Donut);
    assert_eq!(chart.category_column.as_deref(), Some("category"));
    assert_eq!(chart.value_column.as_deref(), Some("share"));
}

#[tokio::test]
async fn connectivity_errors_are_not_healed() {
    let provider = Arc::new(MockProvider::single("SELECT month FROM sales", 0.9));
    let connector = MockConnector::new(vec![Err(QueryError::Connectivity(
        "connection refused".to_string(),
    ))]);
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let outcome = pipeline.run(&connector, "ds1", "months", &[]).await;

    assert_eq!(outcome.unwrap_err().code(), "connectivity_error");
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn empty_question_is_rejected_before_any_work() {
    let provider = Arc::new(MockProvider::single("SELECT 1", 0.9));
    let connector = MockConnector::succeeding(month_revenue_rows());
    let pipeline = pipeline_with(provider, Arc::new(MemoryStore::new()));

    let outcome = pipeline.run(&connector, "ds1", "   ", &[]).await;

    assert_eq!(outcome.unwrap_err().code(), "invalid_request");
    assert_eq!(connector.calls(), 0);
}
