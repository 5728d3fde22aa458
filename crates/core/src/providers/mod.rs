//! Enrichment provider capability interfaces.
//!
//! The embedding and chat providers are abstract capabilities configured
//! once at startup and shared as process-wide singletons. Concrete
//! implementations speak the OpenAI-compatible deployment API.

pub mod chat;
pub mod embedding;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::ProviderConfig;

/// One pooled HTTP client shared by both provider implementations.
pub(crate) fn provider_http_client(config: &ProviderConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .unwrap_or_default()
}

/// A generated embedding with its provenance.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    pub generated_at: DateTime<Utc>,
}

/// Text embedding capability.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
    fn model_name(&self) -> &str;
}

/// JSON-mode chat completion capability.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Run a chat completion constrained to a JSON object response.
    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value>;
    fn model_name(&self) -> &str;
}

/// Provider singletons owned by the supervisor process.
///
/// Either capability may be absent when the provider is not configured;
/// the enrichment worker degrades to idle in that case.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Option<Arc<dyn TextEmbedder>>,
    pub chat: Option<Arc<dyn ChatCompleter>>,
}

impl Providers {
    pub fn from_config(config: &ProviderConfig) -> Self {
        if !config.is_configured() {
            warn!("inference provider not configured, enrichment disabled");
            return Self {
                embedder: None,
                chat: None,
            };
        }

        let embedder: Arc<dyn TextEmbedder> =
            Arc::new(embedding::OpenAiCompatEmbedder::new(config));
        let chat: Arc<dyn ChatCompleter> = Arc::new(chat::OpenAiCompatChat::new(config));

        Self {
            embedder: Some(embedder),
            chat: Some(chat),
        }
    }

    pub fn enabled(&self) -> bool {
        self.embedder.is_some()
    }
}
