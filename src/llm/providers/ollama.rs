//! Local-model provider via Ollama.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::QueryError;
use crate::llm::{
    CandidateQuery, GenerationRequest, InsightRequest, LlmProvider, insight_system_prompt,
    insight_user_prompt, parse_candidate, system_prompt, user_prompt,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

/// Ollama implementation of the provider contract.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    /// Build from configuration.
    #[must_use]
    pub fn new(config: &ProviderConfig, llm: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: llm.temperature,
        }
    }

    async fn chat(
        &self,
        system: &str,
        history: &[crate::llm::ConversationTurn],
        user: &str,
        temperature: f32,
    ) -> Result<String, QueryError> {
        let mut messages = vec![serde_json::json!({"role": "system", "content": system})];
        for turn in history {
            messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {"temperature": temperature},
        });

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Provider(format!("Ollama unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(QueryError::Provider(format!(
                "Ollama API error: {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Provider(format!("Ollama response unparsable: {e}")))?;
        Ok(parsed.message.content)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate_query(&self, req: &GenerationRequest) -> Result<CandidateQuery, QueryError> {
        let content = self
            .chat(
                &system_prompt(req.dialect),
                &req.history,
                &user_prompt(req),
                self.temperature,
            )
            .await?;
        // Local models report no token accounting
        parse_candidate(&content, None)
    }

    async fn generate_insight(&self, req: &InsightRequest) -> Result<String, QueryError> {
        let content = self
            .chat(insight_system_prompt(), &[], &insight_user_prompt(req), 0.7)
            .await?;
        Ok(content.trim().to_string())
    }

    fn is_configured(&self) -> bool {
        // A local endpoint needs no credentials; readiness is a base URL
        !self.base_url.is_empty()
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_by_default() {
        let provider = OllamaProvider::new(&ProviderConfig::default(), &LlmConfig::default());
        assert!(provider.is_configured());
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn response_shape_parses() {
        let raw = r#"{"message": {"role": "assistant", "content": "{\"query\": \"SELECT 1\"}"}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content, "{\"query\": \"SELECT 1\"}");
    }
}
