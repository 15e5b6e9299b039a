//! Embedding provider implementations
//!
//! Concrete implementations of the EmbeddingProvider trait for embedding
//! services reachable over HTTP.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;

use synapse_core::{EmbeddingError, SynapseError};

/// Build a RequestFailed error for a provider call.
pub fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> SynapseError {
    SynapseError::Embedding(EmbeddingError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    })
}

/// Build an InvalidResponse error for a provider call.
pub fn invalid_response(provider: &str, reason: impl Into<String>) -> SynapseError {
    SynapseError::Embedding(EmbeddingError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}
