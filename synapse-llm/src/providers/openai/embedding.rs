//! OpenAI embedding provider implementation

use super::types::{EmbeddingRequest, EmbeddingResponse};
use crate::providers::{invalid_response, request_failed};
use crate::EmbeddingProvider;
use async_trait::async_trait;
use reqwest::Client;
use synapse_core::{EmbeddingVector, SynapseResult};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI embedding provider using text-embedding-3-small or a custom model.
pub struct OpenAiEmbeddingProvider {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: i32,
}

impl OpenAiEmbeddingProvider {
    /// Create a new OpenAI embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - API key
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `dimensions` - Embedding dimensions (1536 for 3-small by default)
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }

    /// Create provider with the default text-embedding-3-small model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "text-embedding-3-small", 1536)
    }

    /// Point the provider at an API-compatible server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn request(&self, request: &EmbeddingRequest) -> SynapseResult<EmbeddingResponse> {
        let url = format!("{}/embeddings", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| request_failed("openai", 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(request_failed(
                "openai",
                status.as_u16() as i32,
                error_text,
            ));
        }

        response.json().await.map_err(|e| {
            invalid_response("openai", format!("Failed to parse response: {}", e))
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
            dimensions: Some(self.dimensions),
        };

        let response = self.request(&request).await?;

        let embedding_data = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("openai", "No embedding data in response"))?;

        Ok(EmbeddingVector::new(
            embedding_data.embedding,
            self.model.clone(),
        ))
    }

    async fn embed_batch(&self, texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
            dimensions: Some(self.dimensions),
        };

        let response = self.request(&request).await?;

        // The API may return entries out of order; restore input order
        let mut data = response.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(invalid_response(
                "openai",
                format!("Expected {} embeddings but got {}", texts.len(), data.len()),
            ));
        }

        Ok(data
            .into_iter()
            .map(|d| EmbeddingVector::new(d.embedding, self.model.clone()))
            .collect())
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
