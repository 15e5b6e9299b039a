//! SYNAPSE Storage - Storage Trait and In-Memory Implementation
//!
//! Defines the persistence abstraction for SYNAPSE entities. Every trait call
//! is atomic: the in-memory implementation keeps all entity maps behind a
//! single lock, so a call observes and commits either the pre-state or the
//! fully-written post-state, never a partial one. A relational backend would
//! implement the same trait with one transaction per call.

use chrono::Utc;
use synapse_core::{
    ActiveContext, AgentId, BlockId, BudgetLedger, ContextId, ContextState, EmbeddingRecord,
    EntityType, MemoryBlock, StorageError, SynapseError, SynapseResult, Task, TaskId, TaskStatus,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::RwLock;

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New status
    pub status: Option<TaskStatus>,
    /// Terminal status the task was reopened from
    pub reopened_from: Option<TaskStatus>,
    /// New parent (reparent); `Some(None)` clears the parent
    pub parent_task_id: Option<Option<TaskId>>,
    /// Updated metadata
    pub metadata: Option<serde_json::Value>,
}

/// Update payload for active contexts.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    /// New state
    pub state: Option<ContextState>,
    /// Reserved tokens after a shrink
    pub reserved_tokens: Option<i64>,
    /// Tokens actually consumed by the injection
    pub used_tokens: Option<i64>,
    /// Tokens returned at harvest (recorded for idempotent re-harvest)
    pub tokens_reclaimed: Option<i64>,
}

/// Counts of stored entities, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStatistics {
    pub tasks: usize,
    pub blocks: usize,
    pub embeddings: usize,
    pub contexts: usize,
    pub live_contexts: usize,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for SYNAPSE entities.
///
/// Implementations provide durable persistence for tasks, memory blocks,
/// embeddings, active contexts, and the budget ledger. Mutations are durable
/// before the call returns (no write-behind).
pub trait StorageTrait: Send + Sync {
    // === Task Operations ===

    /// Insert a new task.
    fn task_insert(&self, t: &Task) -> SynapseResult<()>;

    /// Get a task by ID.
    fn task_get(&self, id: TaskId) -> SynapseResult<Option<Task>>;

    /// Update a task. Bumps `updated_at`.
    fn task_update(&self, id: TaskId, update: TaskUpdate) -> SynapseResult<Task>;

    /// List the direct children of a task, in insertion order.
    fn task_children(&self, parent_id: TaskId) -> SynapseResult<Vec<Task>>;

    /// List all tasks.
    fn task_list(&self) -> SynapseResult<Vec<Task>>;

    // === Memory Block Operations ===

    /// Insert a new memory block, optionally together with its first
    /// embedding. Block and embedding commit atomically so a crash can never
    /// leave an embedding without its block.
    fn block_insert(
        &self,
        block: &MemoryBlock,
        embedding: Option<&EmbeddingRecord>,
    ) -> SynapseResult<()>;

    /// Get a memory block by ID.
    fn block_get(&self, id: BlockId) -> SynapseResult<Option<MemoryBlock>>;

    /// List blocks owned by a task.
    fn block_list_by_task(&self, task_id: TaskId) -> SynapseResult<Vec<MemoryBlock>>;

    /// List all blocks.
    fn block_list(&self) -> SynapseResult<Vec<MemoryBlock>>;

    // === Embedding Operations ===

    /// Insert or replace the embedding for `(block_id, model_id)`.
    fn embedding_upsert(&self, record: &EmbeddingRecord) -> SynapseResult<()>;

    /// Get the embedding for a block under a specific model.
    fn embedding_get(
        &self,
        block_id: BlockId,
        model_id: &str,
    ) -> SynapseResult<Option<EmbeddingRecord>>;

    /// List every embedding stored for a model.
    fn embedding_list_by_model(&self, model_id: &str) -> SynapseResult<Vec<EmbeddingRecord>>;

    /// List blocks that have no embedding for a model yet.
    fn blocks_missing_embedding(&self, model_id: &str) -> SynapseResult<Vec<MemoryBlock>>;

    // === Active Context Operations ===

    /// Insert a new active context.
    fn context_insert(&self, ctx: &ActiveContext) -> SynapseResult<()>;

    /// Get a context by ID.
    fn context_get(&self, id: ContextId) -> SynapseResult<Option<ActiveContext>>;

    /// Get the live (`Reserved`/`Injected`) context for an (agent, task) pair.
    fn context_live_for_pair(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
    ) -> SynapseResult<Option<ActiveContext>>;

    /// Get the most recent context for an (agent, task) pair in any state.
    fn context_latest_for_pair(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
    ) -> SynapseResult<Option<ActiveContext>>;

    /// Update a context, returning the new row.
    fn context_update(&self, id: ContextId, update: ContextUpdate) -> SynapseResult<ActiveContext>;

    /// List every live context.
    fn context_list_live(&self) -> SynapseResult<Vec<ActiveContext>>;

    /// List live contexts whose TTL has elapsed at `now`.
    fn context_list_expired(&self, now: Timestamp) -> SynapseResult<Vec<ActiveContext>>;

    // === Budget Ledger ===

    /// Load the budget ledger.
    fn ledger_load(&self) -> SynapseResult<BudgetLedger>;

    /// Persist the budget ledger.
    fn ledger_store(&self, ledger: &BudgetLedger) -> SynapseResult<()>;

    // === Observability ===

    /// Entity counts.
    fn stats(&self) -> SynapseResult<StorageStatistics>;
}

// ============================================================================
// IN-MEMORY STORAGE
// ============================================================================

#[derive(Debug, Default)]
struct StorageState {
    tasks: HashMap<TaskId, Task>,
    blocks: HashMap<BlockId, MemoryBlock>,
    embeddings: HashMap<(BlockId, String), EmbeddingRecord>,
    contexts: HashMap<ContextId, ActiveContext>,
    ledger: Option<BudgetLedger>,
}

/// In-memory storage. All entity maps live behind one lock so that every
/// trait call commits atomically with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<StorageState>,
}

impl InMemoryStorage {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = StorageState::default();
        }
    }

    fn read(&self) -> SynapseResult<std::sync::RwLockReadGuard<'_, StorageState>> {
        self.state
            .read()
            .map_err(|_| SynapseError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> SynapseResult<std::sync::RwLockWriteGuard<'_, StorageState>> {
        self.state
            .write()
            .map_err(|_| SynapseError::Storage(StorageError::LockPoisoned))
    }
}

/// Sort entities into insertion order. UUIDv7 ids are timestamp-sortable, but
/// creation timestamps carry finer precision, so sort on both.
fn insertion_order_key(created_at: Timestamp, id: uuid::Uuid) -> (Timestamp, uuid::Uuid) {
    (created_at, id)
}

impl StorageTrait for InMemoryStorage {
    // === Task Operations ===

    fn task_insert(&self, t: &Task) -> SynapseResult<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&t.task_id) {
            return Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Task,
                reason: "already exists".to_string(),
            }));
        }
        state.tasks.insert(t.task_id, t.clone());
        Ok(())
    }

    fn task_get(&self, id: TaskId) -> SynapseResult<Option<Task>> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    fn task_update(&self, id: TaskId, update: TaskUpdate) -> SynapseResult<Task> {
        let mut state = self.write()?;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(SynapseError::Storage(StorageError::NotFound {
                entity_type: EntityType::Task,
                id,
            }))?;

        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(reopened_from) = update.reopened_from {
            task.reopened_from = Some(reopened_from);
        }
        if let Some(parent) = update.parent_task_id {
            task.parent_task_id = parent;
        }
        if let Some(metadata) = update.metadata {
            task.metadata = Some(metadata);
        }
        task.updated_at = Utc::now();

        Ok(task.clone())
    }

    fn task_children(&self, parent_id: TaskId) -> SynapseResult<Vec<Task>> {
        let state = self.read()?;
        let mut children: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.parent_task_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|t| insertion_order_key(t.created_at, t.task_id));
        Ok(children)
    }

    fn task_list(&self) -> SynapseResult<Vec<Task>> {
        let state = self.read()?;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| insertion_order_key(t.created_at, t.task_id));
        Ok(tasks)
    }

    // === Memory Block Operations ===

    fn block_insert(
        &self,
        block: &MemoryBlock,
        embedding: Option<&EmbeddingRecord>,
    ) -> SynapseResult<()> {
        let mut state = self.write()?;
        if state.blocks.contains_key(&block.block_id) {
            return Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::MemoryBlock,
                reason: "already exists".to_string(),
            }));
        }
        state.blocks.insert(block.block_id, block.clone());
        if let Some(record) = embedding {
            state.embeddings.insert(
                (record.block_id, record.model_id.clone()),
                record.clone(),
            );
        }
        Ok(())
    }

    fn block_get(&self, id: BlockId) -> SynapseResult<Option<MemoryBlock>> {
        Ok(self.read()?.blocks.get(&id).cloned())
    }

    fn block_list_by_task(&self, task_id: TaskId) -> SynapseResult<Vec<MemoryBlock>> {
        let state = self.read()?;
        let mut blocks: Vec<MemoryBlock> = state
            .blocks
            .values()
            .filter(|b| b.task_id == Some(task_id))
            .cloned()
            .collect();
        blocks.sort_by_key(|b| insertion_order_key(b.created_at, b.block_id));
        Ok(blocks)
    }

    fn block_list(&self) -> SynapseResult<Vec<MemoryBlock>> {
        let state = self.read()?;
        let mut blocks: Vec<MemoryBlock> = state.blocks.values().cloned().collect();
        blocks.sort_by_key(|b| insertion_order_key(b.created_at, b.block_id));
        Ok(blocks)
    }

    // === Embedding Operations ===

    fn embedding_upsert(&self, record: &EmbeddingRecord) -> SynapseResult<()> {
        let mut state = self.write()?;
        if !state.blocks.contains_key(&record.block_id) {
            return Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Embedding,
                reason: format!("no memory block {}", record.block_id),
            }));
        }
        state.embeddings.insert(
            (record.block_id, record.model_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn embedding_get(
        &self,
        block_id: BlockId,
        model_id: &str,
    ) -> SynapseResult<Option<EmbeddingRecord>> {
        let state = self.read()?;
        Ok(state
            .embeddings
            .get(&(block_id, model_id.to_string()))
            .cloned())
    }

    fn embedding_list_by_model(&self, model_id: &str) -> SynapseResult<Vec<EmbeddingRecord>> {
        let state = self.read()?;
        Ok(state
            .embeddings
            .values()
            .filter(|e| e.model_id == model_id)
            .cloned()
            .collect())
    }

    fn blocks_missing_embedding(&self, model_id: &str) -> SynapseResult<Vec<MemoryBlock>> {
        let state = self.read()?;
        let mut missing: Vec<MemoryBlock> = state
            .blocks
            .values()
            .filter(|b| {
                !state
                    .embeddings
                    .contains_key(&(b.block_id, model_id.to_string()))
            })
            .cloned()
            .collect();
        missing.sort_by_key(|b| insertion_order_key(b.created_at, b.block_id));
        Ok(missing)
    }

    // === Active Context Operations ===

    fn context_insert(&self, ctx: &ActiveContext) -> SynapseResult<()> {
        let mut state = self.write()?;
        if state.contexts.contains_key(&ctx.context_id) {
            return Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Context,
                reason: "already exists".to_string(),
            }));
        }
        // One live context per (agent, task) pair, enforced at the storage
        // boundary.
        let duplicate = state.contexts.values().any(|c| {
            c.agent_id == ctx.agent_id && c.task_id == ctx.task_id && c.state.is_live()
        });
        if duplicate && ctx.state.is_live() {
            return Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Context,
                reason: format!(
                    "live context already exists for agent {} on task {}",
                    ctx.agent_id, ctx.task_id
                ),
            }));
        }
        state.contexts.insert(ctx.context_id, ctx.clone());
        Ok(())
    }

    fn context_get(&self, id: ContextId) -> SynapseResult<Option<ActiveContext>> {
        Ok(self.read()?.contexts.get(&id).cloned())
    }

    fn context_live_for_pair(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
    ) -> SynapseResult<Option<ActiveContext>> {
        let state = self.read()?;
        Ok(state
            .contexts
            .values()
            .find(|c| c.agent_id == agent_id && c.task_id == task_id && c.state.is_live())
            .cloned())
    }

    fn context_latest_for_pair(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
    ) -> SynapseResult<Option<ActiveContext>> {
        let state = self.read()?;
        Ok(state
            .contexts
            .values()
            .filter(|c| c.agent_id == agent_id && c.task_id == task_id)
            .max_by_key(|c| insertion_order_key(c.created_at, c.context_id))
            .cloned())
    }

    fn context_update(&self, id: ContextId, update: ContextUpdate) -> SynapseResult<ActiveContext> {
        let mut state = self.write()?;
        let ctx = state
            .contexts
            .get_mut(&id)
            .ok_or(SynapseError::Storage(StorageError::NotFound {
                entity_type: EntityType::Context,
                id,
            }))?;

        if let Some(new_state) = update.state {
            ctx.state = new_state;
        }
        if let Some(reserved) = update.reserved_tokens {
            ctx.reserved_tokens = reserved;
        }
        if let Some(used) = update.used_tokens {
            ctx.used_tokens = used;
        }
        if let Some(reclaimed) = update.tokens_reclaimed {
            ctx.tokens_reclaimed = Some(reclaimed);
        }

        Ok(ctx.clone())
    }

    fn context_list_live(&self) -> SynapseResult<Vec<ActiveContext>> {
        let state = self.read()?;
        Ok(state
            .contexts
            .values()
            .filter(|c| c.state.is_live())
            .cloned()
            .collect())
    }

    fn context_list_expired(&self, now: Timestamp) -> SynapseResult<Vec<ActiveContext>> {
        let state = self.read()?;
        Ok(state
            .contexts
            .values()
            .filter(|c| c.is_expired_at(now))
            .cloned()
            .collect())
    }

    // === Budget Ledger ===

    fn ledger_load(&self) -> SynapseResult<BudgetLedger> {
        let state = self.read()?;
        Ok(state.ledger.clone().unwrap_or_else(BudgetLedger::empty))
    }

    fn ledger_store(&self, ledger: &BudgetLedger) -> SynapseResult<()> {
        let mut state = self.write()?;
        state.ledger = Some(ledger.clone());
        Ok(())
    }

    // === Observability ===

    fn stats(&self) -> SynapseResult<StorageStatistics> {
        let state = self.read()?;
        Ok(StorageStatistics {
            tasks: state.tasks.len(),
            blocks: state.blocks.len(),
            embeddings: state.embeddings.len(),
            contexts: state.contexts.len(),
            live_contexts: state.contexts.values().filter(|c| c.state.is_live()).count(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::{EmbeddingVector, MemoryKind, TaskPriority, new_entity_id};

    fn make_task(parent: Option<TaskId>) -> Task {
        Task::new("Test task", "Test description", TaskPriority::Medium, parent)
    }

    fn make_block(task_id: Option<TaskId>) -> MemoryBlock {
        MemoryBlock::new("Test block content", MemoryKind::Decision, task_id)
    }

    fn make_context(agent_id: AgentId, task_id: TaskId, state: ContextState) -> ActiveContext {
        let now = Utc::now();
        ActiveContext {
            context_id: new_entity_id(),
            agent_id,
            task_id,
            model_id: "test-model".to_string(),
            reservation_id: new_entity_id(),
            reserved_tokens: 500,
            used_tokens: 0,
            tokens_reclaimed: None,
            state,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(900),
        }
    }

    // ========================================================================
    // Task Tests
    // ========================================================================

    #[test]
    fn test_task_insert_get() {
        let storage = InMemoryStorage::new();
        let task = make_task(None);

        storage.task_insert(&task).unwrap();
        let retrieved = storage.task_get(task.task_id).unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().task_id, task.task_id);
    }

    #[test]
    fn test_task_insert_duplicate() {
        let storage = InMemoryStorage::new();
        let task = make_task(None);

        storage.task_insert(&task).unwrap();
        let result = storage.task_insert(&task);

        assert!(result.is_err());
    }

    #[test]
    fn test_task_get_missing_returns_none() {
        let storage = InMemoryStorage::new();
        assert!(storage.task_get(new_entity_id()).unwrap().is_none());
    }

    #[test]
    fn test_task_update_status() {
        let storage = InMemoryStorage::new();
        let task = make_task(None);
        storage.task_insert(&task).unwrap();

        let updated = storage
            .task_update(
                task.task_id,
                TaskUpdate {
                    status: Some(TaskStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Active);
        assert!(updated.updated_at >= task.updated_at);
    }

    #[test]
    fn test_task_update_missing_fails() {
        let storage = InMemoryStorage::new();
        let result = storage.task_update(new_entity_id(), TaskUpdate::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_task_children_insertion_order() {
        let storage = InMemoryStorage::new();
        let root = make_task(None);
        storage.task_insert(&root).unwrap();

        let mut inserted = Vec::new();
        for i in 0..5 {
            let mut child = make_task(Some(root.task_id));
            child.title = format!("child-{i}");
            std::thread::sleep(std::time::Duration::from_millis(2));
            child.created_at = Utc::now();
            storage.task_insert(&child).unwrap();
            inserted.push(child.task_id);
        }

        let children = storage.task_children(root.task_id).unwrap();
        let ids: Vec<TaskId> = children.iter().map(|c| c.task_id).collect();
        assert_eq!(ids, inserted);
    }

    // ========================================================================
    // Memory Block Tests
    // ========================================================================

    #[test]
    fn test_block_insert_get() {
        let storage = InMemoryStorage::new();
        let block = make_block(None);

        storage.block_insert(&block, None).unwrap();
        let retrieved = storage.block_get(block.block_id).unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().content, block.content);
    }

    #[test]
    fn test_block_insert_with_embedding_is_atomic() {
        let storage = InMemoryStorage::new();
        let block = make_block(None);
        let record = EmbeddingRecord::new(
            block.block_id,
            EmbeddingVector::new(vec![1.0, 0.0], "test-model".to_string()),
        );

        storage.block_insert(&block, Some(&record)).unwrap();

        assert!(storage.block_get(block.block_id).unwrap().is_some());
        assert!(storage
            .embedding_get(block.block_id, "test-model")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_block_list_by_task() {
        let storage = InMemoryStorage::new();
        let task = make_task(None);
        storage.task_insert(&task).unwrap();

        let b1 = make_block(Some(task.task_id));
        let b2 = make_block(None);
        storage.block_insert(&b1, None).unwrap();
        storage.block_insert(&b2, None).unwrap();

        let blocks = storage.block_list_by_task(task.task_id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_id, b1.block_id);
    }

    // ========================================================================
    // Embedding Tests
    // ========================================================================

    #[test]
    fn test_embedding_upsert_requires_block() {
        let storage = InMemoryStorage::new();
        let record = EmbeddingRecord::new(
            new_entity_id(),
            EmbeddingVector::new(vec![1.0], "test-model".to_string()),
        );
        assert!(storage.embedding_upsert(&record).is_err());
    }

    #[test]
    fn test_embedding_upsert_replaces() {
        let storage = InMemoryStorage::new();
        let block = make_block(None);
        storage.block_insert(&block, None).unwrap();

        let first = EmbeddingRecord::new(
            block.block_id,
            EmbeddingVector::new(vec![1.0, 0.0], "m1".to_string()),
        );
        let second = EmbeddingRecord::new(
            block.block_id,
            EmbeddingVector::new(vec![0.0, 1.0], "m1".to_string()),
        );
        storage.embedding_upsert(&first).unwrap();
        storage.embedding_upsert(&second).unwrap();

        let stored = storage.embedding_get(block.block_id, "m1").unwrap().unwrap();
        assert_eq!(stored.vector.data, vec![0.0, 1.0]);
    }

    #[test]
    fn test_embeddings_by_model_are_isolated() {
        let storage = InMemoryStorage::new();
        let block = make_block(None);
        storage.block_insert(&block, None).unwrap();

        for model in ["m1", "m2"] {
            let record = EmbeddingRecord::new(
                block.block_id,
                EmbeddingVector::new(vec![1.0], model.to_string()),
            );
            storage.embedding_upsert(&record).unwrap();
        }

        assert_eq!(storage.embedding_list_by_model("m1").unwrap().len(), 1);
        assert_eq!(storage.embedding_list_by_model("m2").unwrap().len(), 1);
        assert!(storage.embedding_list_by_model("m3").unwrap().is_empty());
    }

    #[test]
    fn test_blocks_missing_embedding() {
        let storage = InMemoryStorage::new();
        let embedded = make_block(None);
        let bare = make_block(None);
        let record = EmbeddingRecord::new(
            embedded.block_id,
            EmbeddingVector::new(vec![1.0], "m1".to_string()),
        );
        storage.block_insert(&embedded, Some(&record)).unwrap();
        storage.block_insert(&bare, None).unwrap();

        let missing = storage.blocks_missing_embedding("m1").unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].block_id, bare.block_id);

        // Under a different model, both blocks are missing
        assert_eq!(storage.blocks_missing_embedding("m2").unwrap().len(), 2);
    }

    // ========================================================================
    // Active Context Tests
    // ========================================================================

    #[test]
    fn test_context_insert_get() {
        let storage = InMemoryStorage::new();
        let ctx = make_context(new_entity_id(), new_entity_id(), ContextState::Reserved);

        storage.context_insert(&ctx).unwrap();
        let retrieved = storage.context_get(ctx.context_id).unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().state, ContextState::Reserved);
    }

    #[test]
    fn test_context_second_live_for_pair_rejected() {
        let storage = InMemoryStorage::new();
        let agent = new_entity_id();
        let task = new_entity_id();

        storage
            .context_insert(&make_context(agent, task, ContextState::Injected))
            .unwrap();
        let result = storage.context_insert(&make_context(agent, task, ContextState::Reserved));
        assert!(result.is_err());
    }

    #[test]
    fn test_context_live_after_terminal_allowed() {
        let storage = InMemoryStorage::new();
        let agent = new_entity_id();
        let task = new_entity_id();

        storage
            .context_insert(&make_context(agent, task, ContextState::Harvested))
            .unwrap();
        // A harvested context does not block a new live one
        storage
            .context_insert(&make_context(agent, task, ContextState::Injected))
            .unwrap();
    }

    #[test]
    fn test_context_live_for_pair() {
        let storage = InMemoryStorage::new();
        let agent = new_entity_id();
        let task = new_entity_id();

        storage
            .context_insert(&make_context(agent, task, ContextState::Harvested))
            .unwrap();
        let live = make_context(agent, task, ContextState::Injected);
        storage.context_insert(&live).unwrap();

        let found = storage.context_live_for_pair(agent, task).unwrap().unwrap();
        assert_eq!(found.context_id, live.context_id);

        assert!(storage
            .context_live_for_pair(agent, new_entity_id())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_context_latest_for_pair() {
        let storage = InMemoryStorage::new();
        let agent = new_entity_id();
        let task = new_entity_id();

        let mut older = make_context(agent, task, ContextState::Harvested);
        older.created_at = Utc::now() - chrono::Duration::seconds(60);
        storage.context_insert(&older).unwrap();

        let newer = make_context(agent, task, ContextState::Harvested);
        storage.context_insert(&newer).unwrap();

        let latest = storage.context_latest_for_pair(agent, task).unwrap().unwrap();
        assert_eq!(latest.context_id, newer.context_id);
    }

    #[test]
    fn test_context_list_expired() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();

        let mut stale = make_context(new_entity_id(), new_entity_id(), ContextState::Injected);
        stale.expires_at = now - chrono::Duration::seconds(10);
        storage.context_insert(&stale).unwrap();

        let fresh = make_context(new_entity_id(), new_entity_id(), ContextState::Injected);
        storage.context_insert(&fresh).unwrap();

        let expired = storage.context_list_expired(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].context_id, stale.context_id);
    }

    #[test]
    fn test_context_update_records_reclaim() {
        let storage = InMemoryStorage::new();
        let ctx = make_context(new_entity_id(), new_entity_id(), ContextState::Injected);
        storage.context_insert(&ctx).unwrap();

        let updated = storage
            .context_update(
                ctx.context_id,
                ContextUpdate {
                    state: Some(ContextState::Harvested),
                    tokens_reclaimed: Some(500),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.state, ContextState::Harvested);
        assert_eq!(updated.tokens_reclaimed, Some(500));
    }

    // ========================================================================
    // Ledger Tests
    // ========================================================================

    #[test]
    fn test_ledger_default_is_empty() {
        let storage = InMemoryStorage::new();
        let ledger = storage.ledger_load().unwrap();
        assert_eq!(ledger.tokens_in_use, 0);
    }

    #[test]
    fn test_ledger_roundtrip() {
        let storage = InMemoryStorage::new();
        let mut ledger = BudgetLedger::empty();
        ledger.tokens_in_use = 1234;
        storage.ledger_store(&ledger).unwrap();

        let loaded = storage.ledger_load().unwrap();
        assert_eq!(loaded.tokens_in_use, 1234);
    }

    #[test]
    fn test_stats() {
        let storage = InMemoryStorage::new();
        let task = make_task(None);
        storage.task_insert(&task).unwrap();
        storage.block_insert(&make_block(None), None).unwrap();
        storage
            .context_insert(&make_context(
                new_entity_id(),
                task.task_id,
                ContextState::Injected,
            ))
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.tasks, 1);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.contexts, 1);
        assert_eq!(stats.live_contexts, 1);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
