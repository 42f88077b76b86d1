//! Language-model provider abstraction.
//!
//! One [`LlmProvider`] implementation per provider, all sharing a single
//! contract: generate a candidate query, generate a short narrative
//! insight from a data sample, and report configuration readiness.
//! Providers are interchangeable; dialect awareness changes only the
//! query-language framing in the prompt, never the contract.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::datasource::{DataSourceKind, Row};
use crate::error::QueryError;

/// Supported providers, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions API.
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local models via Ollama.
    Ollama,
}

/// A generated, not-yet-executed query.
///
/// Never mutated in place - healing produces a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Generated query text (SQL, or the document-store JSON payload).
    pub query: String,
    /// Natural-language explanation of what the query does.
    pub explanation: String,
    /// Match-quality confidence in `[0, 1]`.
    pub confidence: f64,
    /// Total tokens consumed generating this candidate, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// One conversation turn for multi-turn refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// "user" or "assistant".
    pub role: String,
    /// Turn content.
    pub content: String,
}

/// Input to query generation.
///
/// `history` is already bounded to the configured window by the caller.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The natural-language question.
    pub question: String,
    /// Formatted (possibly relevance-narrowed) schema text.
    pub schema_text: String,
    /// Available entity names.
    pub table_names: Vec<String>,
    /// Bounded conversation history, oldest first.
    pub history: Vec<ConversationTurn>,
    /// Backend dialect the query must target.
    pub dialect: DataSourceKind,
}

/// Input to insight generation.
#[derive(Debug, Clone)]
pub struct InsightRequest {
    /// The original question.
    pub question: String,
    /// Recommended chart type for the result.
    pub chart_type: String,
    /// Result sample, at most 10 rows.
    pub sample: Vec<Row>,
    /// Explanation of the executed query, when available.
    pub explanation: Option<String>,
}

/// Contract shared by all providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a candidate query for the request.
    async fn generate_query(&self, req: &GenerationRequest) -> Result<CandidateQuery, QueryError>;

    /// Generate a 2-3 sentence narrative insight from a data sample.
    async fn generate_insight(&self, req: &InsightRequest) -> Result<String, QueryError>;

    /// Whether the provider has usable credentials/configuration.
    fn is_configured(&self) -> bool;

    /// Provider name for logs and status endpoints.
    fn name(&self) -> &'static str;
}

/// System prompt for query generation, framed per dialect.
#[must_use]
pub fn system_prompt(dialect: DataSourceKind) -> String {
    let framing = if dialect.is_sql_dialect() {
        format!(
            "You are a SQL expert. Convert natural language questions into a single \
             read-only {} SELECT query.\n\n\
             IMPORTANT RULES:\n\
             1. ONLY generate SELECT statements - never INSERT, UPDATE, DELETE, DROP, or any DDL\n\
             2. Always use table and column names exactly as given in the schema\n\
             3. Use appropriate aggregations (COUNT, SUM, AVG) when needed\n\
             4. Include ORDER BY when results should be sorted\n\
             5. Limit results to 1000 rows maximum",
            dialect.dialect_name()
        )
    } else {
        "You are a MongoDB expert. Convert natural language questions into a single \
         read-only find operation expressed as JSON:\n\
         {\"collection\": \"<name>\", \"filter\": {...}, \"projection\": {...}, \
         \"sort\": {...}, \"limit\": <n>}\n\n\
         IMPORTANT RULES:\n\
         1. ONLY the keys collection, filter, projection, sort and limit are allowed\n\
         2. Never emit update, delete, or aggregation pipeline operators\n\
         3. Always include a limit of at most 1000"
            .to_string()
    };

    format!(
        "{framing}\n\n\
         Return your response as valid JSON with this structure:\n\
         {{\n\
             \"query\": \"...\",\n\
             \"explanation\": \"Brief explanation of what the query does\",\n\
             \"confidence\": 0.95\n\
         }}\n\n\
         The confidence score reflects match quality between question and schema:\n\
         - 1.0: perfect match\n\
         - 0.7-0.9: good match with some assumptions\n\
         - 0.5-0.7: partial match, query may need refinement\n\
         - below 0.5: unclear question or missing schema info"
    )
}

/// User prompt for query generation.
#[must_use]
pub fn user_prompt(req: &GenerationRequest) -> String {
    format!(
        "Database Schema:\n{}\n\nAvailable Tables: {}\n\nQuestion: {}\n\nGenerate the query:",
        req.schema_text,
        req.table_names.join(", "),
        req.question
    )
}

/// System prompt for insight generation.
#[must_use]
pub fn insight_system_prompt() -> &'static str {
    "You are a senior data analyst. Provide a concise (2-3 sentences max) executive \
     summary of the provided data results. Focus on the key takeaway that answers the \
     user's original question. Use clear, professional language. Do not mention the raw \
     data structure, just the insights."
}

/// User prompt for insight generation.
#[must_use]
pub fn insight_user_prompt(req: &InsightRequest) -> String {
    let sample: Vec<&Row> = req.sample.iter().take(10).collect();
    format!(
        "User Question: {}\nQuery Explanation: {}\nChart Type: {}\n\
         Data Sample (up to 10 rows):\n{}\n\nProvide a concise insight:",
        req.question,
        req.explanation.as_deref().unwrap_or("N/A"),
        req.chart_type,
        serde_json::to_string_pretty(&sample).unwrap_or_default()
    )
}

/// Parse a provider's reply into a [`CandidateQuery`].
///
/// Tolerates code fences around the JSON and clamps confidence to
/// `[0, 1]`. Unparsable output is a provider error, not a silent empty
/// candidate.
pub fn parse_candidate(content: &str, tokens_used: Option<u32>) -> Result<CandidateQuery, QueryError> {
    let stripped = strip_code_fences(content);

    let value: serde_json::Value = serde_json::from_str(stripped.trim())
        .map_err(|e| QueryError::Provider(format!("unparsable model output: {e}")))?;

    let query = value
        .get("query")
        .or_else(|| value.get("sql_query"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    if query.is_empty() {
        return Err(QueryError::Provider(
            "model output contained no query".to_string(),
        ));
    }

    let explanation = value
        .get("explanation")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    Ok(CandidateQuery {
        query,
        explanation,
        confidence,
        tokens_used,
    })
}

/// Strip a surrounding markdown code fence, if present.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split("```").next().unwrap_or(rest);
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dialect: DataSourceKind) -> GenerationRequest {
        GenerationRequest {
            question: "total revenue by month".into(),
            schema_text: "Table: sales\nColumns:\n  - month: TEXT".into(),
            table_names: vec!["sales".into()],
            history: Vec::new(),
            dialect,
        }
    }

    #[test]
    fn sql_prompt_names_the_dialect() {
        let prompt = system_prompt(DataSourceKind::Postgres);
        assert!(prompt.contains("postgresql"));
        assert!(prompt.contains("ONLY generate SELECT"));
    }

    #[test]
    fn document_prompt_uses_payload_framing() {
        let prompt = system_prompt(DataSourceKind::MongoDb);
        assert!(prompt.contains("\"collection\""));
        assert!(!prompt.contains("SELECT query"));
    }

    #[test]
    fn user_prompt_includes_schema_and_question() {
        let prompt = user_prompt(&request(DataSourceKind::Postgres));
        assert!(prompt.contains("Table: sales"));
        assert!(prompt.contains("total revenue by month"));
        assert!(prompt.contains("Available Tables: sales"));
    }

    #[test]
    fn parses_plain_json() {
        let candidate = parse_candidate(
            r#"{"query": "SELECT 1", "explanation": "one", "confidence": 0.9}"#,
            Some(42),
        )
        .unwrap();
        assert_eq!(candidate.query, "SELECT 1");
        assert!((candidate.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(candidate.tokens_used, Some(42));
    }

    #[test]
    fn parses_fenced_json_and_legacy_key() {
        let content = "```json\n{\"sql_query\": \"SELECT 2\", \"confidence\": 1.5}\n```";
        let candidate = parse_candidate(content, None).unwrap();
        assert_eq!(candidate.query, "SELECT 2");
        // Confidence clamped into range
        assert!((candidate.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(matches!(
            parse_candidate("here is your query: SELECT 1", None),
            Err(QueryError::Provider(_))
        ));
    }

    #[test]
    fn rejects_missing_query() {
        assert!(matches!(
            parse_candidate(r#"{"explanation": "no query"}"#, None),
            Err(QueryError::Provider(_))
        ));
    }
}
