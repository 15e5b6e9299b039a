//! SYNAPSE Test Utilities
//!
//! Centralized test infrastructure for the SYNAPSE workspace:
//! - Entity fixtures for common scenarios
//! - Mock embedding providers beyond the deterministic default
//! - Config builders with test-friendly timeouts

// Re-export the in-memory store and mock provider from their source crates
pub use synapse_llm::MockEmbeddingProvider;
pub use synapse_storage::InMemoryStorage;

// Re-export core types for convenience
pub use synapse_core::{
    ActiveContext, AgentId, BlockId, BudgetLedger, BudgetStatus, ContextId, ContextState,
    EmbeddingPolicy, EmbeddingRecord, EmbeddingVector, MemoryBlock, MemoryKind, SynapseConfig,
    SynapseError, SynapseResult, Task, TaskId, TaskPriority, TaskStatus, compute_content_hash,
    new_entity_id,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use synapse_core::EmbeddingError;
use synapse_llm::EmbeddingProvider;

// ============================================================================
// CONFIG FIXTURES
// ============================================================================

/// A config with a small ceiling and short TTL, suitable for unit tests.
pub fn test_config(budget_ceiling: i64) -> SynapseConfig {
    SynapseConfig {
        budget_ceiling,
        context_ttl: std::time::Duration::from_secs(60),
        default_model_id: "mock-embed".to_string(),
        embedding_policy: EmbeddingPolicy::Synchronous,
        sweep_interval: std::time::Duration::from_millis(50),
    }
}

// ============================================================================
// ENTITY FIXTURES
// ============================================================================

/// A planning-state task with placeholder content.
pub fn make_task(parent: Option<TaskId>) -> Task {
    Task::new("Test task", "Test description", TaskPriority::Medium, parent)
}

/// A decision block, optionally owned by a task.
pub fn make_block(task_id: Option<TaskId>) -> MemoryBlock {
    MemoryBlock::new("Test block content", MemoryKind::Decision, task_id)
}

/// A context in the given state holding `tokens`.
pub fn make_context(
    agent_id: AgentId,
    task_id: TaskId,
    state: ContextState,
    tokens: i64,
) -> ActiveContext {
    let now = Utc::now();
    ActiveContext {
        context_id: new_entity_id(),
        agent_id,
        task_id,
        model_id: "mock-embed".to_string(),
        reservation_id: new_entity_id(),
        reserved_tokens: tokens,
        used_tokens: tokens,
        tokens_reclaimed: None,
        state,
        created_at: now,
        expires_at: now + chrono::Duration::seconds(60),
    }
}

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// Provider returning handcrafted vectors per exact text, falling back to a
/// fixed vector. Gives tests precise control over similarity scores.
pub struct StaticEmbeddingProvider {
    model_id: String,
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl StaticEmbeddingProvider {
    pub fn new(model_id: &str, entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
        Self {
            model_id: model_id.to_string(),
            vectors: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            fallback,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbeddingProvider {
    async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector> {
        let data = self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(EmbeddingVector::new(data, self.model_id.clone()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> i32 {
        self.fallback.len() as i32
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Provider that always fails, for degradation tests.
pub struct UnavailableEmbeddingProvider {
    model_id: String,
}

impl UnavailableEmbeddingProvider {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
        }
    }

    fn unavailable(&self) -> SynapseError {
        SynapseError::Embedding(EmbeddingError::ProviderUnavailable {
            model_id: self.model_id.clone(),
            reason: "connection refused".to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for UnavailableEmbeddingProvider {
    async fn embed(&self, _text: &str) -> SynapseResult<EmbeddingVector> {
        Err(self.unavailable())
    }

    async fn embed_batch(&self, _texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>> {
        Err(self.unavailable())
    }

    fn dimensions(&self) -> i32 {
        4
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
