//! SYNAPSE Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no business logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Identifier of a task in the hierarchy.
pub type TaskId = EntityId;

/// Identifier of an immutable memory block.
pub type BlockId = EntityId;

/// Identifier of an agent process holding a session.
pub type AgentId = EntityId;

/// Identifier of an active context (one injection/harvest cycle).
pub type ContextId = EntityId;

/// Handle returned by a budget reservation.
pub type ReservationId = EntityId;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for deduplication and integrity verification.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ============================================================================
// ENUMS
// ============================================================================

/// Entity type discriminator for storage errors and polymorphic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Task,
    MemoryBlock,
    Embedding,
    Context,
    Ledger,
}

/// Lifecycle status of a task.
///
/// Statuses are ordered; `can_transition_to` only permits forward movement,
/// with the single exception of unblocking (`Blocked -> Active`). Leaving a
/// terminal status requires the explicit reopen operation on the task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Planning,
    Active,
    Blocked,
    Completed,
    Archived,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Planning => 0,
            TaskStatus::Active => 1,
            TaskStatus::Blocked => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Archived => 4,
        }
    }

    /// Whether this status ends the task's lifecycle (reopen required to leave).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Archived)
    }

    /// Whether a direct transition to `next` is allowed.
    ///
    /// Forward-only along the status order; `Blocked -> Active` is the one
    /// sanctioned backward move (unblocking). Same-status transitions are
    /// rejected so callers cannot mask no-op updates as progress.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return false;
        }
        if self == TaskStatus::Blocked && next == TaskStatus::Active {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

/// Kind of content stored in a memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Snapshot of a task's title and description, kept for task-level search
    Task,
    /// Conversation excerpt from an agent session
    Conversation,
    /// Decision or recommendation extracted from agent output
    Decision,
    /// File content or file-level summary
    File,
    /// Snapshot of an assembled context
    ContextSnapshot,
}

/// State of an active context (one injection/harvest cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextState {
    /// Budget reserved, context not yet delivered
    Reserved,
    /// Context delivered to the agent; reservation trimmed to tokens used
    Injected,
    /// Harvested; reservation fully released
    Harvested,
    /// Timed out; reservation released by the sweep
    Expired,
}

impl ContextState {
    /// Whether this state holds live budget.
    pub fn is_live(self) -> bool {
        matches!(self, ContextState::Reserved | ContextState::Injected)
    }

    /// Whether this state is terminal (retained for audit only).
    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

/// When to compute embeddings for newly stored memory blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingPolicy {
    /// Embed before `store_memory` returns; the block is searchable immediately
    Synchronous,
    /// Return immediately; the block stays out of search results until a
    /// synchronization pass embeds it
    Deferred,
}

// ============================================================================
// EMBEDDING VECTOR
// ============================================================================

/// Embedding vector with dynamic dimensions.
/// Supports any embedding model dimension (e.g., 384, 768, 1536, 3072).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// The embedding data as a vector of f32 values.
    pub data: Vec<f32>,
    /// Identifier of the model that produced this embedding.
    pub model_id: String,
    /// Number of dimensions (must match data.len()).
    pub dimensions: i32,
}

impl EmbeddingVector {
    /// Create a new embedding vector with dimensions set from data length.
    pub fn new(data: Vec<f32>, model_id: String) -> Self {
        let dimensions = data.len() as i32;
        Self {
            data,
            model_id,
            dimensions,
        }
    }

    /// Compute cosine similarity between two embedding vectors.
    ///
    /// # Returns
    /// * `Ok(f32)` - Cosine similarity in range [-1.0, 1.0]; `0.0` when either
    ///   vector has zero magnitude
    /// * `Err(SynapseError::Vector)` - If dimensions don't match
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> SynapseResult<f32> {
        if self.dimensions != other.dimensions {
            return Err(SynapseError::Vector(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: other.dimensions,
            }));
        }

        let mut dot_product = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.data.iter().zip(other.data.iter()) {
            dot_product += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let norm_a = norm_a.sqrt();
        let norm_b = norm_b.sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot_product / (norm_a * norm_b))
    }

    /// Check if this vector has valid dimensions.
    pub fn is_valid(&self) -> bool {
        self.dimensions > 0 && self.data.len() == self.dimensions as usize
    }
}

// ============================================================================
// CORE ENTITY STRUCTS
// ============================================================================

/// Task - node in the development-task hierarchy.
///
/// Tasks form a tree (project -> roadmap -> macro-task -> micro-task). The
/// parent graph is validated acyclic on every insert and reparent. Tasks are
/// never physically deleted; archiving keeps historical embeddings resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub parent_task_id: Option<TaskId>,
    /// Terminal status this task was reopened from, if it was ever reopened.
    pub reopened_from: Option<TaskStatus>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

impl Task {
    /// Create a new task in `Planning` with fresh timestamps.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
        parent_task_id: Option<TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: new_entity_id(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Planning,
            priority,
            parent_task_id,
            reopened_from: None,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Text used when embedding this task for similarity search.
    pub fn embedding_text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.description)
        }
    }
}

/// Memory block - immutable stored unit of content.
///
/// Corrections are new blocks, not edits, so embeddings and content stay in
/// permanent correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub block_id: BlockId,
    /// Owning task; None for standalone insights.
    pub task_id: Option<TaskId>,
    pub content: String,
    pub kind: MemoryKind,
    pub content_hash: ContentHash,
    pub created_at: Timestamp,
}

impl MemoryBlock {
    /// Create a new memory block, hashing the content.
    pub fn new(content: impl Into<String>, kind: MemoryKind, task_id: Option<TaskId>) -> Self {
        let content = content.into();
        let content_hash = compute_content_hash(content.as_bytes());
        Self {
            block_id: new_entity_id(),
            task_id,
            content,
            kind,
            content_hash,
            created_at: Utc::now(),
        }
    }
}

/// Stored embedding for a memory block under a specific model.
///
/// A block may carry embeddings from multiple models simultaneously (model
/// migration); lookups always filter by a single model identifier so vectors
/// from incompatible spaces are never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub block_id: BlockId,
    pub model_id: String,
    pub vector: EmbeddingVector,
    pub created_at: Timestamp,
}

impl EmbeddingRecord {
    pub fn new(block_id: BlockId, vector: EmbeddingVector) -> Self {
        Self {
            block_id,
            model_id: vector.model_id.clone(),
            vector,
            created_at: Utc::now(),
        }
    }
}

/// Active context - one injection/harvest cycle for an (agent, task) pair.
///
/// Only `Reserved` and `Injected` represent live resource holds; `Harvested`
/// and `Expired` are terminal and retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveContext {
    pub context_id: ContextId,
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub model_id: String,
    pub reservation_id: ReservationId,
    pub reserved_tokens: i64,
    pub used_tokens: i64,
    /// Tokens returned at harvest; replayed on idempotent re-harvest.
    pub tokens_reclaimed: Option<i64>,
    pub state: ContextState,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl ActiveContext {
    /// Whether this context has outlived its TTL at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.state.is_live() && now >= self.expires_at
    }
}

/// Budget ledger - the single global token counter.
///
/// Invariant: `tokens_in_use` always equals the sum of `reserved_tokens` over
/// all live contexts, and never exceeds the configured ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub tokens_in_use: i64,
    pub updated_at: Timestamp,
}

impl BudgetLedger {
    pub fn empty() -> Self {
        Self {
            tokens_in_use: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Snapshot of the budget for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub ceiling: i64,
    pub used: i64,
    pub remaining: i64,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: EntityId,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Task hierarchy validation errors. Rejected synchronously with no side effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Parent task not found: {0}")]
    ParentNotFound(TaskId),

    #[error("Cycle rejected: task {task_id} cannot take {parent_id} as parent")]
    CycleRejected { task_id: TaskId, parent_id: TaskId },

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Budget arbitration errors. Rejected with no reservation left dangling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Budget exceeded: requested {requested} tokens, {remaining} remaining")]
    BudgetExceeded { requested: i64, remaining: i64 },
}

/// Active-context coordination errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("No active context for agent {agent_id} on task {task_id}")]
    NoActiveContext { agent_id: AgentId, task_id: TaskId },

    #[error("Agent {agent_id} already holds a live context on task {task_id}")]
    ContextActive { agent_id: AgentId, task_id: TaskId },
}

/// Embedding provider errors. Content is never lost because of these: storage
/// happens first and unembedded blocks are re-synchronized later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("No embedding provider registered for model {model_id}")]
    ModelNotRegistered { model_id: String },

    #[error("Embedding provider for model {model_id} unavailable: {reason}")]
    ProviderUnavailable { model_id: String, reason: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Vector operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all SYNAPSE errors.
#[derive(Debug, Clone, Error)]
pub enum SynapseError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for SYNAPSE operations.
pub type SynapseResult<T> = Result<T, SynapseError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default token ceiling shared across all concurrent agents.
pub const DEFAULT_BUDGET_CEILING: i64 = 128_000;

/// Default TTL for an active context before the sweep expires it.
pub const DEFAULT_CONTEXT_TTL_SECS: u64 = 900;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default embedding model identifier.
pub const DEFAULT_MODEL_ID: &str = "nomic-embed-text";

/// Master configuration struct.
///
/// The budget ceiling, the context TTL, and the default embedding model are
/// the only externally tunable parameters the core requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseConfig {
    /// Global token ceiling shared by all agents (REQUIRED, > 0)
    pub budget_ceiling: i64,
    /// How long a context may stay live before the sweep expires it
    pub context_ttl: Duration,
    /// Model used to embed newly stored content
    pub default_model_id: String,
    /// Whether `store_memory` embeds before returning
    pub embedding_policy: EmbeddingPolicy,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            budget_ceiling: DEFAULT_BUDGET_CEILING,
            context_ttl: Duration::from_secs(DEFAULT_CONTEXT_TTL_SECS),
            default_model_id: DEFAULT_MODEL_ID.to_string(),
            embedding_policy: EmbeddingPolicy::Synchronous,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl SynapseConfig {
    /// Validate the configuration.
    ///
    /// Validates:
    /// - budget_ceiling > 0
    /// - context_ttl and sweep_interval are positive
    /// - default_model_id is non-empty
    pub fn validate(&self) -> SynapseResult<()> {
        if self.budget_ceiling <= 0 {
            return Err(SynapseError::Config(ConfigError::InvalidValue {
                field: "budget_ceiling".to_string(),
                value: self.budget_ceiling.to_string(),
                reason: "budget_ceiling must be greater than 0".to_string(),
            }));
        }

        if self.context_ttl.is_zero() {
            return Err(SynapseError::Config(ConfigError::InvalidValue {
                field: "context_ttl".to_string(),
                value: format!("{:?}", self.context_ttl),
                reason: "context_ttl must be positive".to_string(),
            }));
        }

        if self.sweep_interval.is_zero() {
            return Err(SynapseError::Config(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: format!("{:?}", self.sweep_interval),
                reason: "sweep_interval must be positive".to_string(),
            }));
        }

        if self.default_model_id.is_empty() {
            return Err(SynapseError::Config(ConfigError::MissingRequired {
                field: "default_model_id".to_string(),
            }));
        }

        Ok(())
    }

    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SYNAPSE_BUDGET_CEILING`: global token ceiling (default: 128000)
    /// - `SYNAPSE_CONTEXT_TTL_SECS`: context TTL in seconds (default: 900)
    /// - `SYNAPSE_DEFAULT_MODEL`: embedding model id (default: nomic-embed-text)
    /// - `SYNAPSE_EMBEDDING_POLICY`: "synchronous" or "deferred" (default: synchronous)
    /// - `SYNAPSE_SWEEP_INTERVAL_SECS`: sweep interval in seconds (default: 60)
    pub fn from_env() -> Self {
        let budget_ceiling = std::env::var("SYNAPSE_BUDGET_CEILING")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BUDGET_CEILING);

        let context_ttl = Duration::from_secs(
            std::env::var("SYNAPSE_CONTEXT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONTEXT_TTL_SECS),
        );

        let default_model_id = std::env::var("SYNAPSE_DEFAULT_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        let embedding_policy = match std::env::var("SYNAPSE_EMBEDDING_POLICY")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "deferred" => EmbeddingPolicy::Deferred,
            _ => EmbeddingPolicy::Synchronous,
        };

        let sweep_interval = Duration::from_secs(
            std::env::var("SYNAPSE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        Self {
            budget_ceiling,
            context_ttl,
            default_model_id,
            embedding_policy,
            sweep_interval,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
