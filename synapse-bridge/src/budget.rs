//! Token budget manager.
//!
//! The budget ledger is the only resource in the system mutated by more than
//! one logical owner, so every mutation funnels through one mutex-guarded
//! counter. Check-and-reserve is a single atomic step: no two concurrent
//! reservations can together exceed the ceiling, even if both check in
//! parallel. The ledger is written through to storage inside the lock so a
//! restarted service can verify what it recovers from live context rows.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use synapse_core::{
    BudgetError, BudgetLedger, BudgetStatus, ReservationId, StorageError, SynapseError,
    SynapseResult, new_entity_id,
};
use synapse_storage::StorageTrait;

#[derive(Debug, Default)]
struct LedgerInner {
    in_use: i64,
    reservations: HashMap<ReservationId, i64>,
}

/// Mutex-serialized token budget.
pub struct TokenBudget {
    ceiling: i64,
    storage: Arc<dyn StorageTrait>,
    inner: Mutex<LedgerInner>,
}

impl TokenBudget {
    /// Create a budget manager with an empty ledger.
    pub fn new(storage: Arc<dyn StorageTrait>, ceiling: i64) -> Self {
        Self {
            ceiling,
            storage,
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Rebuild the ledger from live context rows.
    ///
    /// After a crash the context rows are the source of truth: each live
    /// context holds exactly its `reserved_tokens`. The persisted ledger is
    /// cross-checked and a mismatch is logged, not trusted.
    pub fn recover(storage: Arc<dyn StorageTrait>, ceiling: i64) -> SynapseResult<Self> {
        let live = storage.context_list_live()?;

        let mut reservations = HashMap::new();
        let mut in_use = 0i64;
        for ctx in &live {
            reservations.insert(ctx.reservation_id, ctx.reserved_tokens);
            in_use += ctx.reserved_tokens;
        }

        let persisted = storage.ledger_load()?;
        if persisted.tokens_in_use != in_use {
            tracing::warn!(
                persisted = persisted.tokens_in_use,
                rebuilt = in_use,
                live_contexts = live.len(),
                "Persisted ledger disagrees with live contexts; using rebuilt value"
            );
        }

        let budget = Self {
            ceiling,
            storage,
            inner: Mutex::new(LedgerInner {
                in_use,
                reservations,
            }),
        };
        budget.persist_locked(in_use)?;
        Ok(budget)
    }

    /// Reserve `amount` tokens.
    ///
    /// # Errors
    /// * `BudgetError::BudgetExceeded` - the reservation would push
    ///   tokens-in-use past the ceiling; nothing is held
    pub fn reserve(&self, amount: i64) -> SynapseResult<ReservationId> {
        let amount = amount.max(0);
        let mut inner = self.lock()?;

        if inner.in_use + amount > self.ceiling {
            return Err(SynapseError::Budget(BudgetError::BudgetExceeded {
                requested: amount,
                remaining: self.ceiling - inner.in_use,
            }));
        }

        let id = new_entity_id();
        inner.in_use += amount;
        inner.reservations.insert(id, amount);

        if let Err(err) = self.persist_locked(inner.in_use) {
            // Roll back so memory and storage stay in agreement.
            inner.in_use -= amount;
            inner.reservations.remove(&id);
            return Err(err);
        }

        Ok(id)
    }

    /// Shrink a reservation to `new_amount`, returning the released delta.
    ///
    /// Used right after injection to give back the unused slice of a
    /// `max_tokens` hold. Unknown handles and growth requests are no-ops.
    pub fn shrink(&self, id: ReservationId, new_amount: i64) -> SynapseResult<i64> {
        let new_amount = new_amount.max(0);
        let mut inner = self.lock()?;

        let Some(&current) = inner.reservations.get(&id) else {
            return Ok(0);
        };
        if new_amount >= current {
            return Ok(0);
        }

        let delta = current - new_amount;
        inner.in_use -= delta;
        inner.reservations.insert(id, new_amount);

        if let Err(err) = self.persist_locked(inner.in_use) {
            inner.in_use += delta;
            inner.reservations.insert(id, current);
            return Err(err);
        }

        Ok(delta)
    }

    /// Release a reservation, returning the released amount.
    ///
    /// Idempotent: releasing an already-released or unknown handle returns 0
    /// rather than erroring, to tolerate duplicate cleanup after timeout
    /// races.
    pub fn release(&self, id: ReservationId) -> SynapseResult<i64> {
        let mut inner = self.lock()?;

        let Some(amount) = inner.reservations.remove(&id) else {
            return Ok(0);
        };
        inner.in_use -= amount;

        if let Err(err) = self.persist_locked(inner.in_use) {
            inner.in_use += amount;
            inner.reservations.insert(id, amount);
            return Err(err);
        }

        Ok(amount)
    }

    /// Current budget snapshot.
    pub fn status(&self) -> SynapseResult<BudgetStatus> {
        let inner = self.lock()?;
        Ok(BudgetStatus {
            ceiling: self.ceiling,
            used: inner.in_use,
            remaining: self.ceiling - inner.in_use,
        })
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> i64 {
        self.ceiling
    }

    fn lock(&self) -> SynapseResult<std::sync::MutexGuard<'_, LedgerInner>> {
        self.inner
            .lock()
            .map_err(|_| SynapseError::Storage(StorageError::LockPoisoned))
    }

    fn persist_locked(&self, in_use: i64) -> SynapseResult<()> {
        self.storage.ledger_store(&BudgetLedger {
            tokens_in_use: in_use,
            updated_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudget")
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use synapse_storage::InMemoryStorage;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any sequence of reserve/release operations, tokens-in-use
        /// equals the sum of live reservations and never exceeds the ceiling
        #[test]
        fn prop_budget_conservation(
            ceiling in 100i64..10_000,
            amounts in prop::collection::vec(1i64..2_000, 1..30),
            release_mask in prop::collection::vec(any::<bool>(), 1..30),
        ) {
            let budget = TokenBudget::new(Arc::new(InMemoryStorage::new()), ceiling);
            let mut held: Vec<(ReservationId, i64)> = Vec::new();
            let mut expected = 0i64;

            for (amount, release_now) in amounts.iter().zip(release_mask.iter().cycle()) {
                match budget.reserve(*amount) {
                    Ok(id) => {
                        expected += amount;
                        if *release_now {
                            let released = budget.release(id).unwrap();
                            prop_assert_eq!(released, *amount);
                            expected -= amount;
                        } else {
                            held.push((id, *amount));
                        }
                    }
                    Err(SynapseError::Budget(BudgetError::BudgetExceeded { .. })) => {
                        // A rejection must leave the ledger untouched
                        prop_assert_eq!(budget.status().unwrap().used, expected);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }

                let status = budget.status().unwrap();
                prop_assert_eq!(status.used, expected);
                prop_assert!(status.used <= ceiling);
                prop_assert!(status.used >= 0);
            }

            // Draining every held reservation returns the ledger to zero
            for (id, amount) in held {
                prop_assert_eq!(budget.release(id).unwrap(), amount);
            }
            prop_assert_eq!(budget.status().unwrap().used, 0);
        }

        /// Double release never goes negative
        #[test]
        fn prop_double_release_is_noop(amount in 1i64..1000) {
            let budget = TokenBudget::new(Arc::new(InMemoryStorage::new()), 10_000);
            let id = budget.reserve(amount).unwrap();

            prop_assert_eq!(budget.release(id).unwrap(), amount);
            prop_assert_eq!(budget.release(id).unwrap(), 0);
            prop_assert_eq!(budget.status().unwrap().used, 0);
        }
    }
}
