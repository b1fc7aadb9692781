use crate::config::LlmConfig;
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anything that turns a prompt into generated text.
///
/// Used twice per request: once (or once per retry) for SQL generation and once
/// for answer synthesis.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Client for an OpenAI-compatible chat completions endpoint (OpenAI, Ollama's `/v1`).
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            // Fixed at zero for reproducible generations.
            temperature: 0.0,
            max_tokens: 1000,
        }
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueryError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("no error message");
            return Err(QueryError::Llm(format!(
                "LLM API returned {}: {}",
                status, message
            )));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| QueryError::Llm("No content in LLM response".to_string()))?;

        debug!("LLM returned {} chars", content.len());
        Ok(content.to_string())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.call_llm(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_pins_temperature() {
        let client = LlmClient::new(&LlmConfig {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3".to_string(),
            api_key: None,
        });
        let json = serde_json::to_value(client.request_body("total fatalities in 2023")).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "total fatalities in 2023");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = LlmClient::new(&LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            model: "llama3".to_string(),
            api_key: None,
        });
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        assert_eq!(client.model(), "llama3");
    }
}
