//! Self-healing: one bounded automatic repair of a failed query.
//!
//! On the first execution-time failure the orchestrator is re-prompted
//! with the original question, the failing query text, and the raw
//! backend error, schema included. The caller retries at most once and
//! only when the healed candidate actually differs.

use crate::datasource::DataSourceKind;
use crate::error::QueryError;
use crate::llm::{CandidateQuery, ConversationTurn, GenerationRequest, LlmProvider};

/// Ask the provider for a corrected query of the same dialect.
pub async fn heal(
    provider: &dyn LlmProvider,
    original_question: &str,
    failing_query: &str,
    error_message: &str,
    schema_text: &str,
    table_names: &[String],
    dialect: DataSourceKind,
) -> Result<CandidateQuery, QueryError> {
    let question = format!(
        "The previous query failed and must be fixed.\n\
         Original question: {original_question}\n\
         Failing query:\n{failing_query}\n\
         Backend error:\n{error_message}\n\
         Generate a corrected query of the same dialect that answers the original question."
    );

    let request = GenerationRequest {
        question,
        schema_text: schema_text.to_string(),
        table_names: table_names.to_vec(),
        history: Vec::<ConversationTurn>::new(),
        dialect,
    };

    provider.generate_query(&request).await
}
