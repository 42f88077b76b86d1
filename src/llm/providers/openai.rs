//! OpenAI chat-completions provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::QueryError;
use crate::llm::{
    CandidateQuery, GenerationRequest, InsightRequest, LlmProvider, insight_system_prompt,
    insight_user_prompt, parse_candidate, system_prompt, user_prompt,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI implementation of the provider contract.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl OpenAiProvider {
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

    async fn chat(
        &self,
        system: &str,
        history: &[crate::llm::ConversationTurn],
        user: &str,
        temperature: f32,
    ) -> Result<(String, Option<u32>), QueryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| QueryError::Provider("OpenAI API key not configured".to_string()))?;

        let mut messages = vec![serde_json::json!({"role": "system", "content": system})];
        for turn in history {
            messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": self.max_tokens,
        });

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Provider(format!("OpenAI unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(QueryError::Provider(format!(
                "OpenAI API error ({status}): {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Provider(format!("OpenAI response unparsable: {e}")))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| QueryError::Provider("OpenAI returned no content".to_string()))?;
        let tokens = parsed.usage.and_then(|u| u.total_tokens);

        Ok((content, tokens))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate_query(&self, req: &GenerationRequest) -> Result<CandidateQuery, QueryError> {
        let (content, tokens) = self
            .chat(
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
            .chat(insight_system_prompt(), &[], &insight_user_prompt(req), 0.7)
            .await?;
        Ok(content.trim().to_string())
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| k.len() > 10)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_without_key() {
        let provider = OpenAiProvider::new(&ProviderConfig::default(), &LlmConfig::default());
        assert!(!provider.is_configured());
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn short_keys_do_not_count_as_configured() {
        let config = ProviderConfig {
            api_key: Some("short".to_string()),
            ..ProviderConfig::default()
        };
        let provider = OpenAiProvider::new(&config, &LlmConfig::default());
        assert!(!provider.is_configured());
    }

    #[test]
    fn response_shape_parses() {
        let raw = r#"{
            "choices": [{"message": {"content": "{\"query\": \"SELECT 1\"}"}}],
            "usage": {"total_tokens": 120}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"query\": \"SELECT 1\"}")
        );
        assert_eq!(parsed.usage.unwrap().total_tokens, Some(120));
    }
}
