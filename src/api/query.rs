//! Natural-language query and background-job endpoints.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::QueryError;
use crate::jobs::JobStatus;
use crate::llm::{ConversationTurn, InsightRequest};
use crate::pipeline::{QueryResponse, ResponseStatus};

/// Query routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/query", post(execute_query))
        .route("/api/v1/jobs/{id}", get(get_job_status))
        .route("/api/v1/insight", post(generate_insight))
}

/// Inbound question.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// The natural-language question.
    pub question: String,
    /// Data source to query.
    pub data_source_id: String,
    /// Extra equality clauses appended to the question.
    #[serde(default)]
    pub filters: Option<HashMap<String, serde_json::Value>>,
    /// Conversation to continue, enabling multi-turn refinement.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Execute off the request path and poll for the result.
    #[serde(default)]
    pub run_async: bool,
}

/// Background polling response.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append filter clauses to the question text.
fn question_with_filters(
    question: &str,
    filters: Option<&HashMap<String, serde_json::Value>>,
) -> String {
    let Some(filters) = filters.filter(|f| !f.is_empty()) else {
        return question.to_string();
    };
    let mut clauses: Vec<String> = filters
        .iter()
        .map(|(column, value)| format!("{column} = {value}"))
        .collect();
    clauses.sort();
    format!("{question} (where {})", clauses.join(" and "))
}

/// Execute a natural-language query against a registered data source.
async fn execute_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, QueryError> {
    if request.question.trim().is_empty() {
        return Err(QueryError::InvalidRequest("question is empty".to_string()));
    }

    let descriptor = state.sources.get(&request.data_source_id)?;
    let question = question_with_filters(&request.question, request.filters.as_ref());

    let history = request
        .conversation_id
        .as_deref()
        .map(|id| state.conversations.history(id))
        .unwrap_or_default();

    let connector =
        crate::datasource::create_connector(&descriptor, &state.config.query).await?;

    if request.run_async {
        let job_id = state.jobs.create_job().await;

        let pipeline = state.pipeline.clone();
        let jobs_connector = connector.clone();
        let source_id = request.data_source_id.clone();
        let job_question = question.clone();
        state.jobs.spawn(job_id.clone(), async move {
            let outcome = pipeline
                .run(jobs_connector.as_ref(), &source_id, &job_question, &history)
                .await;
            jobs_connector.close().await;
            match outcome {
                Ok(response) => {
                    serde_json::to_value(&response).map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            }
        });

        return Ok(Json(QueryResponse {
            query_text: String::new(),
            explanation: String::new(),
            confidence: 0.0,
            results: Vec::new(),
            row_count: 0,
            chart: None,
            execution_time_ms: 0.0,
            requires_confirmation: false,
            is_cached: false,
            is_healed: false,
            original_error: None,
            job_id: Some(job_id),
            status: ResponseStatus::Processing,
        }));
    }

    let outcome = state
        .pipeline
        .run(connector.as_ref(), &request.data_source_id, &question, &history)
        .await;
    connector.close().await;
    let response = outcome?;

    if let Some(conversation_id) = request.conversation_id.as_deref() {
        state
            .conversations
            .append(conversation_id, &request.question, &response.query_text);
    }

    Ok(Json(response))
}

/// Poll a background job.
async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, QueryError> {
    let job = state
        .jobs
        .get_job(&job_id)
        .await
        .ok_or_else(|| QueryError::NotFound(format!("job {job_id}")))?;

    Ok(Json(JobStatusResponse {
        status: job.status,
        progress: job.progress,
        result: job.result,
        error: job.error,
    }))
}

/// Insight request body.
#[derive(Debug, Deserialize)]
pub struct InsightBody {
    /// The original question.
    pub question: String,
    /// Result sample to summarize.
    pub rows: Vec<crate::datasource::Row>,
    /// Chart type shown to the user.
    #[serde(default)]
    pub chart_type: Option<String>,
    /// Explanation of the executed query.
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Insight response.
#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub insight: String,
}

/// Generate a short narrative insight over a result sample.
async fn generate_insight(
    State(state): State<AppState>,
    Json(body): Json<InsightBody>,
) -> Result<Json<InsightResponse>, QueryError> {
    let request = InsightRequest {
        question: body.question,
        chart_type: body.chart_type.unwrap_or_else(|| "table".to_string()),
        sample: body.rows.into_iter().take(10).collect(),
        explanation: body.explanation,
    };
    let insight = state.pipeline.provider().generate_insight(&request).await?;
    Ok(Json(InsightResponse { insight }))
}

/// Bounded in-process conversation history, keyed by conversation id.
///
/// Persistence of threads is an external concern; this window only
/// feeds multi-turn refinement within a process lifetime.
#[derive(Debug, Default)]
pub struct ConversationStore {
    turns: parking_lot::RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

/// Turns kept per conversation (user + assistant pairs).
const MAX_TURNS: usize = 20;

impl ConversationStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// History for a conversation, oldest first.
    #[must_use]
    pub fn history(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        self.turns
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record one question/query exchange.
    pub fn append(&self, conversation_id: &str, question: &str, query: &str) {
        let mut turns = self.turns.write();
        let entry = turns.entry(conversation_id.to_string()).or_default();
        entry.push(ConversationTurn {
            role: "user".to_string(),
            content: question.to_string(),
        });
        entry.push(ConversationTurn {
            role: "assistant".to_string(),
            content: query.to_string(),
        });
        if entry.len() > MAX_TURNS {
            let excess = entry.len() - MAX_TURNS;
            entry.drain(..excess);
        }
    }
}
