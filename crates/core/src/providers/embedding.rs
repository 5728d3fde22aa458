use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{provider_http_client, Embedding, TextEmbedder};
use crate::config::ProviderConfig;

/// Embedder speaking the OpenAI-compatible deployments API
/// (`/openai/deployments/{name}/embeddings`).
pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(serde::Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiCompatEmbedder {
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
            deployment: config.embedding_deployment.clone(),
            api_version: config.api_version.clone(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl TextEmbedder for OpenAiCompatEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(anyhow!("no text content available for embedding"));
        }

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding API returned {}: {}", status, body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        let data = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding API returned an empty response"))?;

        let dimensions = data.embedding.len();
        Ok(Embedding {
            vector: data.embedding,
            model: parsed.model.unwrap_or_else(|| self.deployment.clone()),
            dimensions,
            generated_at: Utc::now(),
        })
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            endpoint: Some("https://inference.example/".to_string()),
            api_key: Some("key".to_string()),
            embedding_deployment: "text-embedding-3-small".to_string(),
            chat_deployment: "gpt-4o-mini".to_string(),
            api_version: "2024-02-01".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn url_strips_trailing_slash() {
        let embedder = OpenAiCompatEmbedder::new(&test_config());
        assert_eq!(
            embedder.url(),
            "https://inference.example/openai/deployments/text-embedding-3-small/embeddings?api-version=2024-02-01"
        );
    }

    #[tokio::test]
    async fn rejects_empty_text() {
        let embedder = OpenAiCompatEmbedder::new(&test_config());
        assert!(embedder.embed("   ").await.is_err());
    }
}
