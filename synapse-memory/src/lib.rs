//! SYNAPSE Memory - Semantic Memory Service
//!
//! Stores memory blocks, maintains their embeddings per model, and answers
//! ranked similarity queries. Content is always persisted before any
//! embedding work: a failed provider call never loses a block, it only leaves
//! the block unembedded (and out of search results) until a synchronization
//! pass succeeds.

use std::collections::HashSet;
use std::sync::Arc;
use synapse_core::{
    EmbeddingPolicy, EmbeddingRecord, EmbeddingVector, MemoryBlock, MemoryKind, SynapseConfig,
    SynapseResult, Task, TaskId,
};
use synapse_llm::{EmbeddingCache, ProviderRegistry};
use synapse_storage::StorageTrait;
use synapse_tasks::TaskHierarchy;

/// Number of texts sent to the provider per batch during synchronization.
const SYNC_BATCH_SIZE: usize = 32;

/// Default capacity of the content-hash embedding cache.
const EMBEDDING_CACHE_SIZE: usize = 4096;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of storing a memory block.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMemory {
    /// The persisted block.
    pub block: MemoryBlock,
    /// True when the block has no embedding yet and will stay out of search
    /// results until a synchronization pass embeds it.
    pub embedding_pending: bool,
}

/// Outcome of a synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Task snapshots (re)embedded because the task changed.
    pub tasks_embedded: usize,
    /// Previously unembedded blocks that gained an embedding.
    pub blocks_embedded: usize,
    /// Tasks whose snapshot was already fresh.
    pub skipped: usize,
    /// Items that failed and will be retried on the next pass.
    pub failed: usize,
}

// ============================================================================
// SEMANTIC MEMORY SERVICE
// ============================================================================

/// Semantic memory service.
#[derive(Clone)]
pub struct SemanticMemory {
    storage: Arc<dyn StorageTrait>,
    registry: Arc<ProviderRegistry>,
    tasks: TaskHierarchy,
    cache: Arc<EmbeddingCache>,
    config: SynapseConfig,
}

impl SemanticMemory {
    /// Create a new semantic memory service.
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        registry: Arc<ProviderRegistry>,
        tasks: TaskHierarchy,
        config: SynapseConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            tasks,
            cache: Arc::new(EmbeddingCache::new(EMBEDDING_CACHE_SIZE)),
            config,
        }
    }

    /// Store a memory block, optionally owned by a task.
    ///
    /// The block is persisted unconditionally. Under
    /// `EmbeddingPolicy::Synchronous` the embedding for the default model is
    /// computed before returning; a provider failure degrades to
    /// `embedding_pending = true` instead of failing the store. Under
    /// `EmbeddingPolicy::Deferred` the block always comes back pending.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound` - `task_id` does not resolve
    /// * `SynapseError::Storage` - the block could not be persisted
    pub async fn store_memory(
        &self,
        content: impl Into<String>,
        kind: MemoryKind,
        task_id: Option<TaskId>,
    ) -> SynapseResult<StoredMemory> {
        if let Some(tid) = task_id {
            self.tasks.get_task(tid)?;
        }

        let block = MemoryBlock::new(content, kind, task_id);
        let model_id = self.config.default_model_id.clone();

        let embedding = match self.config.embedding_policy {
            EmbeddingPolicy::Deferred => None,
            EmbeddingPolicy::Synchronous => {
                match self.embed_content(&block, &model_id).await {
                    Ok(vector) => Some(EmbeddingRecord::new(block.block_id, vector)),
                    Err(err) => {
                        tracing::warn!(
                            block_id = %block.block_id,
                            model_id = %model_id,
                            error = %err,
                            "Embedding failed at store time; block persisted unembedded"
                        );
                        None
                    }
                }
            }
        };

        let embedding_pending = embedding.is_none();
        // Block and embedding commit together; a crash cannot separate them.
        self.storage.block_insert(&block, embedding.as_ref())?;

        tracing::debug!(
            block_id = %block.block_id,
            kind = ?block.kind,
            task_id = ?block.task_id,
            embedding_pending,
            "Memory block stored"
        );

        Ok(StoredMemory {
            block,
            embedding_pending,
        })
    }

    /// Rank stored memory against a query.
    ///
    /// The query is embedded once, then every stored embedding for `model_id`
    /// is scored with cosine similarity. `scope` restricts candidates to
    /// blocks owned by the task or its descendants (standalone blocks are out
    /// of scope by definition). Results are sorted by descending score, ties
    /// broken by most recent creation, and truncated to `limit`. Unembedded
    /// blocks never appear.
    ///
    /// # Errors
    /// * `EmbeddingError::ModelNotRegistered` - no provider for `model_id`
    /// * `SynapseError::Embedding` - the query embedding failed
    /// * `TaskError::TaskNotFound` - `scope` does not resolve
    pub async fn search(
        &self,
        query: &str,
        model_id: &str,
        scope: Option<TaskId>,
        limit: usize,
    ) -> SynapseResult<Vec<(MemoryBlock, f32)>> {
        let provider = self.registry.get(model_id)?;
        let query_vector = provider.embed(query).await?;

        let scope_ids: Option<HashSet<TaskId>> = match scope {
            Some(task_id) => Some(self.tasks.descendant_ids(task_id)?),
            None => None,
        };

        let mut scored: Vec<(MemoryBlock, f32)> = Vec::new();
        for record in self.storage.embedding_list_by_model(model_id)? {
            let Some(block) = self.storage.block_get(record.block_id)? else {
                continue;
            };

            if let Some(ref ids) = scope_ids {
                match block.task_id {
                    Some(owner) if ids.contains(&owner) => {}
                    _ => continue,
                }
            }

            match query_vector.cosine_similarity(&record.vector) {
                Ok(score) => scored.push((block, score)),
                Err(err) => {
                    // A stored vector of the wrong dimensionality is corrupt;
                    // skip it rather than failing the whole query.
                    tracing::warn!(
                        block_id = %record.block_id,
                        model_id = %model_id,
                        error = %err,
                        "Skipping embedding with mismatched dimensions"
                    );
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        });
        scored.truncate(limit);

        Ok(scored)
    }

    /// Batch (re)embed stale task snapshots and unembedded blocks for a model.
    ///
    /// Used when a new model is registered or after bulk task import.
    /// Individual failures are logged and counted, never fatal to the batch.
    ///
    /// # Errors
    /// * `EmbeddingError::ModelNotRegistered` - no provider for `model_id`
    pub async fn synchronize_task_hierarchy(&self, model_id: &str) -> SynapseResult<SyncReport> {
        // Resolve the provider up front so an unknown model is a hard error,
        // not a batch of logged failures.
        self.registry.get(model_id)?;

        let mut report = SyncReport::default();

        for task in self.storage.task_list()? {
            match self.task_snapshot_is_stale(&task, model_id)? {
                false => report.skipped += 1,
                true => match self.embed_task_snapshot(&task, model_id).await {
                    Ok(()) => report.tasks_embedded += 1,
                    Err(err) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            model_id = %model_id,
                            error = %err,
                            "Failed to embed task snapshot; will retry next pass"
                        );
                        report.failed += 1;
                    }
                },
            }
        }

        // Pick up blocks still missing an embedding for this model: deferred
        // stores, past provider failures, and model migrations.
        let missing = self.storage.blocks_missing_embedding(model_id)?;
        for chunk in missing.chunks(SYNC_BATCH_SIZE) {
            match self.embed_block_batch(chunk, model_id).await {
                Ok(count) => report.blocks_embedded += count,
                Err(err) => {
                    tracing::warn!(
                        model_id = %model_id,
                        batch_size = chunk.len(),
                        error = %err,
                        "Failed to embed block batch; will retry next pass"
                    );
                    report.failed += chunk.len();
                }
            }
        }

        tracing::info!(
            model_id = %model_id,
            tasks_embedded = report.tasks_embedded,
            blocks_embedded = report.blocks_embedded,
            skipped = report.skipped,
            failed = report.failed,
            "Synchronization pass completed"
        );

        Ok(report)
    }

    /// Whether the task has no fresh snapshot block for `model_id`.
    fn task_snapshot_is_stale(&self, task: &Task, model_id: &str) -> SynapseResult<bool> {
        let latest_snapshot = self
            .storage
            .block_list_by_task(task.task_id)?
            .into_iter()
            .filter(|b| b.kind == MemoryKind::Task)
            .last();

        match latest_snapshot {
            None => Ok(true),
            Some(snapshot) => {
                if snapshot.created_at < task.updated_at {
                    return Ok(true);
                }
                // Fresh content, but possibly never embedded for this model
                Ok(self
                    .storage
                    .embedding_get(snapshot.block_id, model_id)?
                    .is_none())
            }
        }
    }

    /// Create and embed a snapshot block for a task. Snapshot and embedding
    /// commit atomically; on provider failure nothing is written, so the task
    /// stays stale and is retried on the next pass.
    async fn embed_task_snapshot(&self, task: &Task, model_id: &str) -> SynapseResult<()> {
        // Re-embedding a fresh-but-unembedded snapshot must not mint a new
        // block; blocks are immutable, so only add one when content changed.
        let existing = self
            .storage
            .block_list_by_task(task.task_id)?
            .into_iter()
            .filter(|b| b.kind == MemoryKind::Task)
            .last();

        match existing {
            Some(snapshot) if snapshot.created_at >= task.updated_at => {
                let vector = self.embed_content(&snapshot, model_id).await?;
                self.storage
                    .embedding_upsert(&EmbeddingRecord::new(snapshot.block_id, vector))?;
            }
            _ => {
                let block = MemoryBlock::new(
                    task.embedding_text(),
                    MemoryKind::Task,
                    Some(task.task_id),
                );
                let vector = self.embed_content(&block, model_id).await?;
                let record = EmbeddingRecord::new(block.block_id, vector);
                self.storage.block_insert(&block, Some(&record))?;
            }
        }
        Ok(())
    }

    /// Embed a batch of blocks and upsert the results. Returns how many were
    /// embedded.
    async fn embed_block_batch(
        &self,
        blocks: &[MemoryBlock],
        model_id: &str,
    ) -> SynapseResult<usize> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let provider = self.registry.get(model_id)?;
        let texts: Vec<&str> = blocks.iter().map(|b| b.content.as_str()).collect();
        let vectors = provider.embed_batch(&texts).await?;

        let mut embedded = 0;
        for (block, vector) in blocks.iter().zip(vectors) {
            self.cache.insert(block.content_hash, vector.clone());
            self.storage
                .embedding_upsert(&EmbeddingRecord::new(block.block_id, vector))?;
            embedded += 1;
        }
        Ok(embedded)
    }

    /// Embed a block's content, consulting the content-hash cache first.
    async fn embed_content(
        &self,
        block: &MemoryBlock,
        model_id: &str,
    ) -> SynapseResult<EmbeddingVector> {
        if let Some(cached) = self.cache.get(&block.content_hash, model_id) {
            return Ok(cached);
        }

        let provider = self.registry.get(model_id)?;
        let vector = provider.embed(&block.content).await?;
        self.cache.insert(block.content_hash, vector.clone());
        Ok(vector)
    }
}

impl std::fmt::Debug for SemanticMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMemory")
            .field("default_model_id", &self.config.default_model_id)
            .field("embedding_policy", &self.config.embedding_policy)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use synapse_core::{EmbeddingError, SynapseError, TaskPriority, new_entity_id};
    use synapse_llm::{EmbeddingProvider, MockEmbeddingProvider};
    use synapse_storage::InMemoryStorage;

    /// Provider returning handcrafted vectors per exact text, so ranking
    /// tests control scores precisely.
    struct StaticProvider {
        model_id: String,
        vectors: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl StaticProvider {
        fn new(model_id: &str, entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
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
    impl EmbeddingProvider for StaticProvider {
        async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector> {
            let data = self.vectors.get(text).cloned().unwrap_or_else(|| self.fallback.clone());
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
    struct UnavailableProvider {
        model_id: String,
    }

    #[async_trait]
    impl EmbeddingProvider for UnavailableProvider {
        async fn embed(&self, _text: &str) -> SynapseResult<EmbeddingVector> {
            Err(SynapseError::Embedding(EmbeddingError::ProviderUnavailable {
                model_id: self.model_id.clone(),
                reason: "connection refused".to_string(),
            }))
        }

        async fn embed_batch(&self, _texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>> {
            Err(SynapseError::Embedding(EmbeddingError::ProviderUnavailable {
                model_id: self.model_id.clone(),
                reason: "connection refused".to_string(),
            }))
        }

        fn dimensions(&self) -> i32 {
            4
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    fn make_config(model: &str, policy: EmbeddingPolicy) -> SynapseConfig {
        SynapseConfig {
            default_model_id: model.to_string(),
            embedding_policy: policy,
            ..SynapseConfig::default()
        }
    }

    fn make_memory(
        registry: Arc<ProviderRegistry>,
        config: SynapseConfig,
    ) -> (SemanticMemory, TaskHierarchy) {
        let storage: Arc<dyn StorageTrait> = Arc::new(InMemoryStorage::new());
        let tasks = TaskHierarchy::new(Arc::clone(&storage));
        let memory = SemanticMemory::new(storage, registry, tasks.clone(), config);
        (memory, tasks)
    }

    #[tokio::test]
    async fn test_store_memory_synchronous_is_searchable() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 64)));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let stored = memory
            .store_memory("uses JWT with refresh rotation", MemoryKind::Decision, None)
            .await
            .unwrap();
        assert!(!stored.embedding_pending);

        let results = memory
            .search("uses JWT with refresh rotation", "m1", None, 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.block_id, stored.block.block_id);
        assert!((results[0].1 - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_store_memory_deferred_is_pending() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 64)));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Deferred),
        );

        let stored = memory
            .store_memory("deferred content", MemoryKind::Conversation, None)
            .await
            .unwrap();
        assert!(stored.embedding_pending);

        // Pending blocks stay out of search results
        let results = memory.search("deferred content", "m1", None, 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_store_memory_provider_failure_degrades() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(UnavailableProvider {
            model_id: "m1".to_string(),
        }));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        // The store succeeds even though the provider is down
        let stored = memory
            .store_memory("important insight", MemoryKind::Decision, None)
            .await
            .unwrap();
        assert!(stored.embedding_pending);

        // Swap in a working provider and synchronize: the block becomes searchable
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 64)));
        let report = memory.synchronize_task_hierarchy("m1").await.unwrap();
        assert_eq!(report.blocks_embedded, 1);

        let results = memory.search("important insight", "m1", None, 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_store_memory_unknown_task_rejected() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 64)));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let result = memory
            .store_memory("content", MemoryKind::Decision, Some(new_entity_id()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_search_unknown_model_rejected() {
        let registry = Arc::new(ProviderRegistry::new());
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let result = memory.search("query", "no-such-model", None, 5).await;
        assert!(matches!(
            result,
            Err(SynapseError::Embedding(EmbeddingError::ModelNotRegistered { .. }))
        ));
    }

    #[tokio::test]
    async fn test_search_ranking_order() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(StaticProvider::new(
            "m1",
            &[
                ("query", vec![1.0, 0.0, 0.0]),
                ("close", vec![0.9, 0.1, 0.0]),
                ("closer", vec![1.0, 0.01, 0.0]),
                ("far", vec![0.0, 1.0, 0.0]),
            ],
            vec![0.0, 0.0, 1.0],
        )));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        for content in ["close", "far", "closer"] {
            memory
                .store_memory(content, MemoryKind::Conversation, None)
                .await
                .unwrap();
        }

        let results = memory.search("query", "m1", None, 10).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|(b, _)| b.content.as_str()).collect();
        assert_eq!(contents, vec!["closer", "close", "far"]);

        // Scores are non-increasing
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[tokio::test]
    async fn test_search_tie_break_by_recency() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(StaticProvider::new(
            "m1",
            &[("query", vec![1.0, 0.0])],
            vec![1.0, 0.0], // every block scores identically
        )));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        memory
            .store_memory("older", MemoryKind::Conversation, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        memory
            .store_memory("newer", MemoryKind::Conversation, None)
            .await
            .unwrap();

        let results = memory.search("query", "m1", None, 2).await.unwrap();
        assert_eq!(results[0].0.content, "newer");
        assert_eq!(results[1].0.content, "older");
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 32)));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        for i in 0..10 {
            memory
                .store_memory(format!("content {i}"), MemoryKind::Conversation, None)
                .await
                .unwrap();
        }

        let results = memory.search("content", "m1", None, 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_search_scoped_to_subtree() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 32)));
        let (memory, tasks) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let root = tasks
            .create_task("Root", "", TaskPriority::High, None)
            .unwrap();
        let child = tasks
            .create_task("Child", "", TaskPriority::Medium, Some(root.task_id))
            .unwrap();
        let other = tasks
            .create_task("Other", "", TaskPriority::Medium, None)
            .unwrap();

        memory
            .store_memory("in scope via root", MemoryKind::Decision, Some(root.task_id))
            .await
            .unwrap();
        memory
            .store_memory("in scope via child", MemoryKind::Decision, Some(child.task_id))
            .await
            .unwrap();
        memory
            .store_memory("out of scope", MemoryKind::Decision, Some(other.task_id))
            .await
            .unwrap();
        memory
            .store_memory("standalone", MemoryKind::Decision, None)
            .await
            .unwrap();

        let results = memory
            .search("scope", "m1", Some(root.task_id), 10)
            .await
            .unwrap();
        let contents: HashSet<&str> = results.iter().map(|(b, _)| b.content.as_str()).collect();
        assert!(contents.contains("in scope via root"));
        assert!(contents.contains("in scope via child"));
        assert!(!contents.contains("out of scope"));
        assert!(!contents.contains("standalone"));
    }

    #[tokio::test]
    async fn test_synchronize_embeds_task_snapshots() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 32)));
        let (memory, tasks) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        tasks
            .create_task("Implement auth", "JWT refresh flow", TaskPriority::High, None)
            .unwrap();
        tasks
            .create_task("Write docs", "API reference", TaskPriority::Low, None)
            .unwrap();

        let report = memory.synchronize_task_hierarchy("m1").await.unwrap();
        assert_eq!(report.tasks_embedded, 2);
        assert_eq!(report.failed, 0);

        // A second pass finds everything fresh
        let report = memory.synchronize_task_hierarchy("m1").await.unwrap();
        assert_eq!(report.tasks_embedded, 0);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_synchronize_reembeds_changed_task() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 32)));
        let (memory, tasks) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let task = tasks
            .create_task("T", "first description", TaskPriority::Medium, None)
            .unwrap();
        memory.synchronize_task_hierarchy("m1").await.unwrap();

        // Any status mutation bumps updated_at, staling the snapshot
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tasks
            .update_status(task.task_id, synapse_core::TaskStatus::Active)
            .unwrap();

        let report = memory.synchronize_task_hierarchy("m1").await.unwrap();
        assert_eq!(report.tasks_embedded, 1);
    }

    #[tokio::test]
    async fn test_synchronize_unknown_model_is_hard_error() {
        let registry = Arc::new(ProviderRegistry::new());
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        let result = memory.synchronize_task_hierarchy("nope").await;
        assert!(matches!(
            result,
            Err(SynapseError::Embedding(EmbeddingError::ModelNotRegistered { .. }))
        ));
    }

    #[tokio::test]
    async fn test_multi_model_search_isolation() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(MockEmbeddingProvider::new("m1", 32)));
        registry.register(Arc::new(MockEmbeddingProvider::new("m2", 64)));
        let (memory, _) = make_memory(
            Arc::clone(&registry),
            make_config("m1", EmbeddingPolicy::Synchronous),
        );

        memory
            .store_memory("some fact", MemoryKind::Decision, None)
            .await
            .unwrap();

        // Stored under m1 only; m2 sees nothing until synchronized
        assert_eq!(memory.search("some fact", "m1", None, 5).await.unwrap().len(), 1);
        assert!(memory.search("some fact", "m2", None, 5).await.unwrap().is_empty());

        let report = memory.synchronize_task_hierarchy("m2").await.unwrap();
        assert_eq!(report.blocks_embedded, 1);
        assert_eq!(memory.search("some fact", "m2", None, 5).await.unwrap().len(), 1);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
