use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::{provider_http_client, ChatCompleter};
use crate::config::ProviderConfig;

/// Chat completer speaking the OpenAI-compatible deployments API with
/// JSON-object response format.
pub struct OpenAiCompatChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(serde::Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiCompatChat {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: provider_http_client(config),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            deployment: config.chat_deployment.clone(),
            api_version: config.api_version.clone(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ChatCompleter for OpenAiCompatChat {
    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat API returned {}: {}", status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse chat response")?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .ok_or_else(|| anyhow!("no choices in chat response"))?;

        serde_json::from_str(content).context("chat response was not valid JSON")
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn url_includes_deployment_and_version() {
        let chat = OpenAiCompatChat::new(&ProviderConfig {
            endpoint: Some("https://inference.example".to_string()),
            api_key: Some("key".to_string()),
            embedding_deployment: "e".to_string(),
            chat_deployment: "gpt-4o-mini".to_string(),
            api_version: "2024-02-01".to_string(),
            timeout: Duration::from_secs(120),
        });
        assert_eq!(
            chat.url(),
            "https://inference.example/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-02-01"
        );
    }
}
