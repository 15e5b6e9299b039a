//! SYNAPSE Bridge - Memory Bridge
//!
//! The orchestration face of the engine. Injection reserves token budget,
//! ranks prior memory against the task, and returns a bounded context;
//! harvest folds new insight back into the index and returns the budget.
//! A background sweep expires abandoned contexts so a crashed agent can
//! never hold budget forever.
//!
//! Ordering is enforced by data, not time: a harvest must find the active
//! context row its injection wrote, and budget is reserved before any
//! suspending call so a slow embedding can never let two requests race past
//! the same budget check.

pub mod budget;
pub mod sweep;

pub use budget::TokenBudget;
pub use sweep::{expiry_sweep_task, SweepMetrics, SweepSnapshot};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synapse_core::{
    ActiveContext, AgentId, ContextError, ContextId, ContextState, EntityType, MemoryKind,
    ReservationId, StorageError, SynapseConfig, SynapseError, SynapseResult, TaskId, Timestamp,
    new_entity_id,
};
use synapse_memory::SemanticMemory;
use synapse_storage::{ContextUpdate, StorageTrait};
use synapse_tasks::TaskHierarchy;

/// How many ranked candidates to pull from semantic memory before packing
/// them into the reservation.
const CANDIDATE_POOL: usize = 50;

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Estimate token count for text.
/// Rough estimate: one token per ~4 characters. Exact tokenization is a
/// pluggable detail; the budget only needs a consistent approximation.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f64 / 4.0).ceil() as i64
}

// ============================================================================
// EXECUTION RESULTS AND INSIGHTS
// ============================================================================

/// An insight explicitly extracted from an agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub content: String,
    pub kind: MemoryKind,
}

/// What a finished agent session hands back for harvesting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Final output of the session. Scanned for decision statements.
    pub output: String,
    /// Insights the agent (or its supervisor) extracted explicitly.
    pub insights: Vec<Insight>,
}

impl ExecutionResult {
    /// Create a result from the session's final output.
    pub fn from_output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            insights: Vec::new(),
        }
    }

    /// Attach an explicitly extracted insight.
    pub fn with_insight(mut self, content: impl Into<String>, kind: MemoryKind) -> Self {
        self.insights.push(Insight {
            content: content.into(),
            kind,
        });
        self
    }
}

// ============================================================================
// DECISION EXTRACTION
// ============================================================================

/// Decision keywords to look for in session output.
const DECISION_KEYWORDS: &[&str] = &[
    "recommend",
    "should",
    "decision",
    "conclude",
    "suggest",
    "advise",
    "propose",
    "determine",
    "choose",
    "select",
];

static DECISION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)I recommend[^\n.]*[.]",
        r"(?i)I suggest[^\n.]*[.]",
        r"(?i)you should[^\n.]*[.]",
        r"(?i)we should[^\n.]*[.]",
        r"(?i)the decision[^\n.]*[.]",
        r"(?i)I conclude[^\n.]*[.]",
        r"(?i)my recommendation[^\n.]*[.]",
        r"(?i)I advise[^\n.]*[.]",
        r"(?i)I propose[^\n.]*[.]",
        r"(?i)the best approach[^\n.]*[.]",
        r"(?i)the recommended[^\n.]*[.]",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check if session output contains decision keywords.
pub fn contains_decision_keywords(output: &str) -> bool {
    let output_lower = output.to_lowercase();
    DECISION_KEYWORDS.iter().any(|kw| output_lower.contains(kw))
}

/// Extract a decision summary from session output.
/// Looks for recommendation patterns, falling back to the first sentence.
pub fn extract_decision(output: &str) -> String {
    for pattern in DECISION_PATTERNS.iter() {
        if let Some(m) = pattern.find(output) {
            return m.as_str().trim().to_string();
        }
    }
    extract_first_sentence(output)
}

/// Extract the first sentence from text (Unicode-safe).
fn extract_first_sentence(text: &str) -> String {
    let end_chars = ['.', '!', '?'];
    let max_chars = 200;

    let mut char_count = 0;
    let mut last_valid_pos = 0;

    for (i, c) in text.char_indices() {
        if end_chars.contains(&c) {
            return text[..i + c.len_utf8()].trim().to_string();
        }

        char_count += 1;
        last_valid_pos = i + c.len_utf8();

        if char_count >= max_chars {
            break;
        }
    }

    if char_count >= max_chars {
        format!("{}...", text[..last_valid_pos].trim())
    } else {
        text.trim().to_string()
    }
}

// ============================================================================
// INJECTION / HARVEST RESULTS
// ============================================================================

/// Bounded context delivered to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    /// The active context this injection opened.
    pub context_id: ContextId,
    /// Assembled context text.
    pub text: String,
    /// Estimated tokens of the accepted content; the reservation is trimmed
    /// to exactly this before the call returns.
    pub tokens_used: i64,
    /// Tasks that own the ranked candidates, nearest first.
    pub similar_tasks: Vec<TaskId>,
}

/// Outcome of harvesting a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harvest {
    /// Tokens returned to the shared budget.
    pub tokens_reclaimed: i64,
    /// New memory blocks stored from the session.
    pub insights_stored: usize,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Contexts transitioned to `Expired`.
    pub expired: usize,
    /// Tokens returned to the shared budget.
    pub tokens_released: i64,
}

// ============================================================================
// INJECTION GUARD
// ============================================================================

/// Undoes a partially completed injection on drop unless disarmed.
///
/// Covers both error returns and caller cancellation: if the injection future
/// is dropped after the reservation was taken, the hold is returned, and if a
/// `Reserved` context row was already written it is expired - identical to an
/// immediate TTL expiry.
struct InjectGuard {
    budget: Arc<TokenBudget>,
    storage: Arc<dyn StorageTrait>,
    reservation_id: ReservationId,
    context_id: Option<ContextId>,
    armed: bool,
}

impl InjectGuard {
    fn new(
        budget: Arc<TokenBudget>,
        storage: Arc<dyn StorageTrait>,
        reservation_id: ReservationId,
    ) -> Self {
        Self {
            budget,
            storage,
            reservation_id,
            context_id: None,
            armed: true,
        }
    }

    fn set_context(&mut self, context_id: ContextId) {
        self.context_id = Some(context_id);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InjectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match self.budget.release(self.reservation_id) {
            Ok(released) => {
                tracing::debug!(
                    reservation_id = %self.reservation_id,
                    released,
                    "Released reservation of abandoned injection"
                );
            }
            Err(err) => {
                tracing::error!(
                    reservation_id = %self.reservation_id,
                    error = %err,
                    "Failed to release reservation of abandoned injection"
                );
            }
        }

        if let Some(context_id) = self.context_id {
            let expire = ContextUpdate {
                state: Some(ContextState::Expired),
                ..Default::default()
            };
            if let Err(err) = self.storage.context_update(context_id, expire) {
                tracing::error!(
                    context_id = %context_id,
                    error = %err,
                    "Failed to expire context row of abandoned injection"
                );
            }
        }
    }
}

// ============================================================================
// MEMORY BRIDGE
// ============================================================================

/// Memory bridge.
///
/// Per-context state machine:
/// `requested -> Reserved -> Injected -> Harvested`, with `Expired` reachable
/// from either live state on timeout and rejection (nothing persisted,
/// nothing held) on validation or budget failure.
#[derive(Clone)]
pub struct MemoryBridge {
    storage: Arc<dyn StorageTrait>,
    tasks: TaskHierarchy,
    memory: SemanticMemory,
    budget: Arc<TokenBudget>,
    config: SynapseConfig,
    ttl: chrono::Duration,
}

impl MemoryBridge {
    /// Create a new memory bridge.
    ///
    /// # Errors
    /// * `SynapseError::Config` - the configuration is invalid
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        tasks: TaskHierarchy,
        memory: SemanticMemory,
        budget: Arc<TokenBudget>,
        config: SynapseConfig,
    ) -> SynapseResult<Self> {
        config.validate()?;
        let ttl = chrono::Duration::from_std(config.context_ttl).map_err(|_| {
            SynapseError::Config(synapse_core::ConfigError::InvalidValue {
                field: "context_ttl".to_string(),
                value: format!("{:?}", config.context_ttl),
                reason: "context_ttl out of range".to_string(),
            })
        })?;

        Ok(Self {
            storage,
            tasks,
            memory,
            budget,
            config,
            ttl,
        })
    }

    /// Assemble and deliver a bounded, relevance-ranked context for an agent
    /// starting work on a task.
    ///
    /// The budget is reserved before any suspending call; on every failure
    /// path after that point the reservation is released, so a rejected or
    /// cancelled injection leaves the caller with zero held budget.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound` - the task does not resolve
    /// * `ContextError::ContextActive` - the pair already holds a live context
    /// * `BudgetError::BudgetExceeded` - the reservation does not fit
    /// * `EmbeddingError::*` - the ranking query could not be embedded
    pub async fn inject_context(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        model_id: &str,
        max_tokens: i64,
    ) -> SynapseResult<Injection> {
        let task = self.tasks.get_task(task_id)?;

        if self
            .storage
            .context_live_for_pair(agent_id, task_id)?
            .is_some()
        {
            return Err(SynapseError::Context(ContextError::ContextActive {
                agent_id,
                task_id,
            }));
        }

        // Atomic check-and-reserve, before the embedding call can suspend us.
        let reservation_id = self.budget.reserve(max_tokens)?;
        let mut guard = InjectGuard::new(
            Arc::clone(&self.budget),
            Arc::clone(&self.storage),
            reservation_id,
        );

        // Write the Reserved row before doing any ranked retrieval. The
        // storage layer enforces one live context per pair, which closes the
        // window between the check above and this insert.
        let now = Utc::now();
        let context_id = new_entity_id();
        let reserved = ActiveContext {
            context_id,
            agent_id,
            task_id,
            model_id: model_id.to_string(),
            reservation_id,
            reserved_tokens: max_tokens.max(0),
            used_tokens: 0,
            tokens_reclaimed: None,
            state: ContextState::Reserved,
            created_at: now,
            expires_at: now + self.ttl,
        };
        match self.storage.context_insert(&reserved) {
            Ok(()) => guard.set_context(context_id),
            Err(SynapseError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Context,
                ..
            })) => {
                // Lost the race to a concurrent injection for the same pair;
                // the guard returns the reservation.
                return Err(SynapseError::Context(ContextError::ContextActive {
                    agent_id,
                    task_id,
                }));
            }
            Err(other) => return Err(other),
        }

        let candidates = self
            .memory
            .search(&task.embedding_text(), model_id, None, CANDIDATE_POOL)
            .await?;

        // A task's own snapshot outranks everything and carries nothing new.
        let candidates: Vec<_> = candidates
            .into_iter()
            .filter(|(block, _)| {
                !(block.kind == MemoryKind::Task && block.task_id == Some(task_id))
            })
            .collect();

        let mut similar_tasks: Vec<TaskId> = Vec::new();
        for (block, _) in &candidates {
            if let Some(owner) = block.task_id {
                if owner != task_id && !similar_tasks.contains(&owner) {
                    similar_tasks.push(owner);
                }
            }
        }

        // Greedy packing: accept by descending score until the next candidate
        // would not fit the remaining reservation.
        let mut entries: Vec<String> = Vec::new();
        let mut tokens_used = 0i64;
        let mut remaining = max_tokens.max(0);
        for (block, _score) in &candidates {
            let entry = format!("[{:?}] {}", block.kind, block.content);
            let cost = estimate_tokens(&entry);
            if cost > remaining {
                break;
            }
            tokens_used += cost;
            remaining -= cost;
            entries.push(entry);
        }
        let text = entries.join("\n\n");

        // Return the unused slice of the hold immediately; a session never
        // keeps more budget than it uses.
        self.budget.shrink(reservation_id, tokens_used)?;
        self.storage.context_update(
            context_id,
            ContextUpdate {
                state: Some(ContextState::Injected),
                reserved_tokens: Some(tokens_used),
                used_tokens: Some(tokens_used),
                ..Default::default()
            },
        )?;
        guard.disarm();

        tracing::info!(
            agent_id = %agent_id,
            task_id = %task_id,
            context_id = %context_id,
            tokens_used,
            candidates = entries.len(),
            "Context injected"
        );

        Ok(Injection {
            context_id,
            text,
            tokens_used,
            similar_tasks,
        })
    }

    /// Harvest a finished session: store its insights, release its budget,
    /// and close the active context.
    ///
    /// Idempotent per context: harvesting an already-harvested pair returns
    /// the recorded `tokens_reclaimed` again without touching the ledger.
    ///
    /// # Errors
    /// * `ContextError::NoActiveContext` - the pair has no live context and no
    ///   harvested one to replay
    pub async fn harvest_memory(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        result: &ExecutionResult,
        model_id: &str,
    ) -> SynapseResult<Harvest> {
        // Only an Injected context is harvestable: a Reserved row means the
        // injection is still in flight, and terminal rows replay or reject.
        let live = self.storage.context_live_for_pair(agent_id, task_id)?;
        let context = match live {
            Some(c) if c.state == ContextState::Injected => c,
            _ => {
                if let Some(previous) = self.storage.context_latest_for_pair(agent_id, task_id)? {
                    if previous.state == ContextState::Harvested {
                        return Ok(Harvest {
                            tokens_reclaimed: previous.tokens_reclaimed.unwrap_or(0),
                            insights_stored: 0,
                        });
                    }
                }
                return Err(SynapseError::Context(ContextError::NoActiveContext {
                    agent_id,
                    task_id,
                }));
            }
        };

        if context.model_id != model_id {
            tracing::debug!(
                context_id = %context.context_id,
                injected_model = %context.model_id,
                harvest_model = %model_id,
                "Harvest model differs from injection model"
            );
        }

        let insights_stored = self.store_insights(task_id, result).await;

        let tokens_reclaimed = self.budget.release(context.reservation_id)?;
        self.storage.context_update(
            context.context_id,
            ContextUpdate {
                state: Some(ContextState::Harvested),
                tokens_reclaimed: Some(tokens_reclaimed),
                ..Default::default()
            },
        )?;

        tracing::info!(
            agent_id = %agent_id,
            task_id = %task_id,
            context_id = %context.context_id,
            tokens_reclaimed,
            insights_stored,
            "Context harvested"
        );

        Ok(Harvest {
            tokens_reclaimed,
            insights_stored,
        })
    }

    /// Store the explicit insights and any extracted decision from a session
    /// result. Individual store failures are logged and skipped; insight loss
    /// must never block the budget release that follows.
    async fn store_insights(&self, task_id: TaskId, result: &ExecutionResult) -> usize {
        let mut stored = 0;

        for insight in &result.insights {
            match self
                .memory
                .store_memory(insight.content.clone(), insight.kind, Some(task_id))
                .await
            {
                Ok(_) => stored += 1,
                Err(err) => {
                    tracing::warn!(
                        task_id = %task_id,
                        error = %err,
                        "Failed to store harvested insight"
                    );
                }
            }
        }

        if contains_decision_keywords(&result.output) {
            let decision = extract_decision(&result.output);
            if !decision.is_empty() {
                match self
                    .memory
                    .store_memory(decision, MemoryKind::Decision, Some(task_id))
                    .await
                {
                    Ok(_) => stored += 1,
                    Err(err) => {
                        tracing::warn!(
                            task_id = %task_id,
                            error = %err,
                            "Failed to store extracted decision"
                        );
                    }
                }
            }
        }

        stored
    }

    /// Expire every live context whose TTL has elapsed at `now`, releasing
    /// its budget. Bounds the blast radius of a crashed or abandoned agent.
    pub fn sweep_expired(&self, now: Timestamp) -> SynapseResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        for context in self.storage.context_list_expired(now)? {
            let released = self.budget.release(context.reservation_id)?;
            self.storage.context_update(
                context.context_id,
                ContextUpdate {
                    state: Some(ContextState::Expired),
                    ..Default::default()
                },
            )?;

            tracing::warn!(
                context_id = %context.context_id,
                agent_id = %context.agent_id,
                task_id = %context.task_id,
                released,
                "Expired abandoned context"
            );

            outcome.expired += 1;
            outcome.tokens_released += released;
        }

        Ok(outcome)
    }

    /// Current budget snapshot.
    pub fn budget_status(&self) -> SynapseResult<synapse_core::BudgetStatus> {
        self.budget.status()
    }

    /// The sweep interval from configuration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.config.sweep_interval
    }
}

impl std::fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("budget_ceiling", &self.budget.ceiling())
            .field("context_ttl", &self.config.context_ttl)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        // 5 chars / 4 = 1.25, ceil = 2
        assert_eq!(estimate_tokens("hello"), 2);
        // 8 chars / 4 = 2
        assert_eq!(estimate_tokens("12345678"), 2);
    }

    #[test]
    fn test_estimate_tokens_longer() {
        let text = "a".repeat(2000);
        assert_eq!(estimate_tokens(&text), 500);
    }

    #[test]
    fn test_contains_decision_keywords() {
        assert!(contains_decision_keywords("I recommend using sled."));
        assert!(contains_decision_keywords("We SHOULD refactor this."));
        assert!(!contains_decision_keywords("The tests all pass."));
    }

    #[test]
    fn test_extract_decision_pattern() {
        let output = "After profiling the options, I recommend caching embeddings by content hash. Other notes follow.";
        assert_eq!(
            extract_decision(output),
            "I recommend caching embeddings by content hash."
        );
    }

    #[test]
    fn test_extract_decision_falls_back_to_first_sentence() {
        let output = "Concluded the refactor cleanly! Nothing else to report.";
        assert_eq!(extract_decision(output), "Concluded the refactor cleanly!");
    }

    #[test]
    fn test_extract_first_sentence_unicode() {
        let output = "Schließlich wählten wir Küsten-Ähnlichkeit. Danach mehr.";
        assert_eq!(
            extract_decision(output),
            "Schließlich wählten wir Küsten-Ähnlichkeit."
        );
    }

    #[test]
    fn test_execution_result_builder() {
        let result = ExecutionResult::from_output("done")
            .with_insight("the cache was the bottleneck", MemoryKind::Decision)
            .with_insight("retry logic lives in client.rs", MemoryKind::File);
        assert_eq!(result.insights.len(), 2);
        assert_eq!(result.output, "done");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
