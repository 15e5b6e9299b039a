//! OpenAI-compatible provider implementation
//!
//! Works against the OpenAI embeddings endpoint and any API-compatible server.

pub mod embedding;
pub mod types;

pub use embedding::OpenAiEmbeddingProvider;
