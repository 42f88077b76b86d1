//! Anthropic messages-API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::QueryError;
use crate::llm::{
    CandidateQuery, GenerationRequest, InsightRequest, LlmProvider, insight_system_prompt,
    insight_user_prompt, parse_candidate, system_prompt, user_prompt,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

/// Anthropic implementation of the provider contract.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

impl AnthropicProvider {
    /// Build from configuration.
    #[must_use]
    pub fn new(config: &ProviderConfig, llm: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    async fn message(
        &self,
        system: &str,
        history: &[crate::llm::ConversationTurn],
        user: &str,
        temperature: f32,
    ) -> Result<(String, Option<u32>), QueryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| QueryError::Provider("Anthropic API key not configured".to_string()))?;

        let mut messages = Vec::with_capacity(history.len() + 1);
        for turn in history {
            messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user}));

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": messages,
        });

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Provider(format!("Anthropic unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(QueryError::Provider(format!(
                "Anthropic API error ({status}): {text}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Provider(format!("Anthropic response unparsable: {e}")))?;

        let content = parsed
            .content
            .first()
            .and_then(|b| b.text.clone())
            .ok_or_else(|| QueryError::Provider("Anthropic returned no content".to_string()))?;
        let tokens = parsed
            .usage
            .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0));

        Ok((content, tokens))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate_query(&self, req: &GenerationRequest) -> Result<CandidateQuery, QueryError> {
        let (content, tokens) = self
            .message(
                &system_prompt(req.dialect),
                &req.history,
                &user_prompt(req),
                self.temperature,
            )
            .await?;
        parse_candidate(&content, tokens)
    }

    async fn generate_insight(&self, req: &InsightRequest) -> Result<String, QueryError> {
        let (content, _) = self
            .message(insight_system_prompt(), &[], &insight_user_prompt(req), 0.7)
            .await?;
        Ok(content.trim().to_string())
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| k.len() > 10)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_without_key() {
        let provider = AnthropicProvider::new(&ProviderConfig::default(), &LlmConfig::default());
        assert!(!provider.is_configured());
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn response_shape_parses() {
        let raw = r#"{
            "content": [{"type": "text", "text": "{\"query\": \"SELECT 1\"}"}],
            "usage": {"input_tokens": 100, "output_tokens": 20}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.content[0].text.as_deref(),
            Some("{\"query\": \"SELECT 1\"}")
        );
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.input_tokens.unwrap() + usage.output_tokens.unwrap(), 120);
    }
}
