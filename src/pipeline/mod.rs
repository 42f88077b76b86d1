//! The natural-language query execution pipeline.
//!
//! Control flow per request:
//! question -> (optional) relevance narrowing of schema -> provider
//! generates a candidate -> confidence gate -> safety gate -> cache
//! lookup -> (on miss) execution -> on failure, one self-heal retry ->
//! chart recommendation -> cache store -> response.
//!
//! Within a request the steps run strictly in this order; the only
//! concurrency is background execution, which lives in [`crate::jobs`].

pub mod chart;
pub mod healer;
pub mod safety;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::config::QueryConfig;
use crate::datasource::{Connector, ExecutionResult, Row};
use crate::error::QueryError;
use crate::llm::{CandidateQuery, ConversationTurn, GenerationRequest, LlmProvider};
use crate::logging::OpTimer;
use crate::schema::relevance::SchemaRelevance;

use chart::ChartRecommendation;

/// Per-request execution states, traced as the request advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Generated,
    Validated,
    CacheHit,
    Executing,
    Succeeded,
    Failed,
    Healing,
    RetryExecuting,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generated => "generated",
            Self::Validated => "validated",
            Self::CacheHit => "cache_hit",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Healing => "healing",
            Self::RetryExecuting => "retry_executing",
        };
        f.write_str(name)
    }
}

/// Terminal status of a pipeline response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Completed,
    Processing,
    Failed,
}

/// The synchronous pipeline response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// The executed (or withheld) query text.
    pub query_text: String,
    /// Natural-language explanation from the provider.
    pub explanation: String,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f64,
    /// Result rows; empty when withheld or still processing.
    pub results: Vec<Row>,
    /// Number of rows.
    pub row_count: usize,
    /// Recommended visualization, absent when nothing executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartRecommendation>,
    /// Execution wall-clock time in milliseconds.
    pub execution_time_ms: f64,
    /// Set when confidence fell below the threshold and nothing ran.
    pub requires_confirmation: bool,
    /// Set when the result came from the cache rather than execution.
    pub is_cached: bool,
    /// Set when the self-healer's corrected query produced the result.
    pub is_healed: bool,
    /// The first execution attempt's error, present when healed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    /// Background job id, present when `run_async` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Terminal status.
    pub status: ResponseStatus,
}

impl QueryResponse {
    fn withheld(candidate: &CandidateQuery, suggestion: String) -> Self {
        Self {
            query_text: candidate.query.clone(),
            explanation: suggestion,
            confidence: candidate.confidence,
            results: Vec::new(),
            row_count: 0,
            chart: None,
            execution_time_ms: 0.0,
            requires_confirmation: true,
            is_cached: false,
            is_healed: false,
            original_error: None,
            job_id: None,
            status: ResponseStatus::Completed,
        }
    }

    fn completed(
        candidate: &CandidateQuery,
        result: ExecutionResult,
        chart: ChartRecommendation,
        is_cached: bool,
        is_healed: bool,
        original_error: Option<String>,
    ) -> Self {
        Self {
            query_text: candidate.query.clone(),
            explanation: candidate.explanation.clone(),
            confidence: candidate.confidence,
            row_count: result.row_count,
            execution_time_ms: result.execution_time_ms,
            results: result.rows,
            chart: Some(chart),
            requires_confirmation: false,
            is_cached,
            is_healed,
            original_error,
            job_id: None,
            status: ResponseStatus::Completed,
        }
    }
}

/// The orchestrated pipeline, shared across requests.
pub struct QueryPipeline {
    provider: Arc<dyn LlmProvider>,
    cache: ResultCache,
    relevance: Option<Arc<SchemaRelevance>>,
    settings: QueryConfig,
    history_window: usize,
}

impl fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl QueryPipeline {
    /// Assemble the pipeline from its collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache: ResultCache,
        relevance: Option<Arc<SchemaRelevance>>,
        settings: QueryConfig,
        history_window: usize,
    ) -> Self {
        Self {
            provider,
            cache,
            relevance,
            settings,
            history_window,
        }
    }

    /// The configured provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run the full pipeline for one question against one connector.
    pub async fn run(
        &self,
        connector: &dyn Connector,
        source_id: &str,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidRequest("question is empty".to_string()));
        }

        let timer = OpTimer::new("pipeline", "run");

        // Schema context, possibly narrowed by the relevance filter.
        // A filter failure inside falls back to the full schema and the
        // filter is not consulted again for this request.
        let full_schema = connector.schema_text().await;
        let table_names = connector.table_names().await;
        if table_names.is_empty() {
            return Err(QueryError::InvalidRequest(
                "no tables found in the data source".to_string(),
            ));
        }

        let schema_text = match &self.relevance {
            Some(relevance) => relevance
                .filter_schema(question, source_id, &full_schema)
                .await
                .unwrap_or_else(|| full_schema.clone()),
            None => full_schema.clone(),
        };

        // Bounded history window: most recent N turns
        let window_start = history.len().saturating_sub(self.history_window);
        let bounded_history = history[window_start..].to_vec();

        let request = GenerationRequest {
            question: question.to_string(),
            schema_text: schema_text.clone(),
            table_names: table_names.clone(),
            history: bounded_history,
            dialect: connector.kind(),
        };

        let candidate = self.provider.generate_query(&request).await?;
        trace_state(PipelineState::Generated, &candidate.query);

        // Confidence gate: equal-to-threshold passes
        if candidate.confidence < self.settings.confidence_threshold {
            tracing::info!(
                confidence = candidate.confidence,
                threshold = self.settings.confidence_threshold,
                "Confidence below threshold, withholding execution"
            );
            let suggestion = format!(
                "{} Confidence {:.2} is below the threshold {:.2}; please rephrase the \
                 question or name the tables and columns you mean.",
                candidate.explanation, candidate.confidence, self.settings.confidence_threshold
            );
            timer.finish();
            return Ok(QueryResponse::withheld(&candidate, suggestion));
        }

        safety::validate(
            &candidate.query,
            connector.kind(),
            self.settings.enforce_read_only,
        )?;
        trace_state(PipelineState::Validated, &candidate.query);

        // Cache hit bypasses the runner and the healer entirely
        if let Some(entry) = self.cache.get(source_id, &candidate.query).await {
            trace_state(PipelineState::CacheHit, &candidate.query);
            let chart = chart::recommend(&entry.result);
            timer.finish();
            return Ok(QueryResponse::completed(
                &candidate,
                entry.result,
                chart,
                true,
                false,
                None,
            ));
        }

        let timeout = Duration::from_secs(self.settings.timeout_secs);

        trace_state(PipelineState::Executing, &candidate.query);
        let outcome = connector.execute(&candidate.query, timeout).await;

        let (final_candidate, result, is_healed, original_error) = match outcome {
            Ok(result) => {
                trace_state(PipelineState::Succeeded, &candidate.query);
                (candidate, result, false, None)
            }
            Err(first_error) if first_error.is_healable() => {
                trace_state(PipelineState::Failed, &candidate.query);
                let healed = self
                    .attempt_heal(
                        connector,
                        question,
                        &candidate,
                        &first_error,
                        &schema_text,
                        &table_names,
                        timeout,
                    )
                    .await?;
                (
                    healed.0,
                    healed.1,
                    true,
                    Some(first_error.to_string()),
                )
            }
            Err(e) => {
                trace_state(PipelineState::Failed, &candidate.query);
                timer.finish_with_result::<(), _>(Err(&e));
                return Err(e);
            }
        };

        let chart = chart::recommend(&result);
        self.cache
            .set(source_id, &final_candidate.query, &result)
            .await;

        timer.finish();
        Ok(QueryResponse::completed(
            &final_candidate,
            result,
            chart,
            false,
            is_healed,
            original_error,
        ))
    }

    /// One bounded heal attempt. Returns the healed candidate and its
    /// result, or the terminal error carrying both contexts.
    #[allow(clippy::too_many_arguments, reason = "internal step with per-request context")]
    async fn attempt_heal(
        &self,
        connector: &dyn Connector,
        question: &str,
        failing: &CandidateQuery,
        first_error: &QueryError,
        schema_text: &str,
        table_names: &[String],
        timeout: Duration,
    ) -> Result<(CandidateQuery, ExecutionResult), QueryError> {
        trace_state(PipelineState::Healing, &failing.query);

        let healed = match healer::heal(
            self.provider.as_ref(),
            question,
            &failing.query,
            &first_error.to_string(),
            schema_text,
            table_names,
            connector.kind(),
        )
        .await
        {
            Ok(healed) => healed,
            Err(e) => {
                tracing::warn!(error = %e, "Healing generation failed, surfacing original error");
                return Err(first_error.clone());
            }
        };

        // Retrying an identical query is pointless - especially an
        // identical slow one after a timeout.
        if healed.query.trim() == failing.query.trim() {
            tracing::info!("Healed query is unchanged, not retrying");
            return Err(first_error.clone());
        }

        safety::validate(
            &healed.query,
            connector.kind(),
            self.settings.enforce_read_only,
        )?;

        trace_state(PipelineState::RetryExecuting, &healed.query);
        match connector.execute(&healed.query, timeout).await {
            Ok(result) => {
                trace_state(PipelineState::Succeeded, &healed.query);
                Ok((healed, result))
            }
            Err(second_error) => {
                trace_state(PipelineState::Failed, &healed.query);
                // Terminal: both attempts' context travels to the caller
                Err(combine_errors(first_error, &second_error))
            }
        }
    }

}

/// Fold the first failure's context into the terminal error.
fn combine_errors(first: &QueryError, second: &QueryError) -> QueryError {
    match second {
        QueryError::Timeout { seconds } => QueryError::Timeout { seconds: *seconds },
        QueryError::Execution(message) => QueryError::Execution(format!(
            "{message} (healing retry; original error: {first})"
        )),
        other => other.clone(),
    }
}

fn trace_state(state: PipelineState, query: &str) {
    tracing::debug!(state = %state, query_len = query.len(), "Pipeline state");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_preserves_timeout_category() {
        let first = QueryError::Execution("boom".into());
        let second = QueryError::Timeout { seconds: 30 };
        assert_eq!(combine_errors(&first, &second).code(), "query_timeout");
    }

    #[test]
    fn combine_carries_both_messages() {
        let first = QueryError::Execution("column missing".into());
        let second = QueryError::Execution("still missing".into());
        let combined = combine_errors(&first, &second);
        let text = combined.to_string();
        assert!(text.contains("still missing"));
        assert!(text.contains("column missing"));
    }

    #[test]
    fn states_render_snake_case() {
        assert_eq!(PipelineState::RetryExecuting.to_string(), "retry_executing");
        assert_eq!(PipelineState::CacheHit.to_string(), "cache_hit");
    }
}
