//! SYNAPSE Tasks - Task Hierarchy Service
//!
//! Owns the task tree (project -> roadmap -> macro-task -> micro-task) and the
//! task lifecycle. The parent graph is validated acyclic on every insert and
//! reparent, not discovered at traversal time. Tasks are the single-writer
//! responsibility of this service: no other component mutates task rows.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use synapse_core::{
    SynapseError, SynapseResult, Task, TaskError, TaskId, TaskPriority, TaskStatus,
};
use synapse_storage::{StorageTrait, TaskUpdate};

/// Upper bound on parent-chain walks. A healthy hierarchy is a few levels
/// deep; hitting this means the stored graph is corrupt.
const MAX_ANCESTOR_DEPTH: usize = 1024;

// ============================================================================
// TASK HIERARCHY SERVICE
// ============================================================================

/// Task hierarchy service.
///
/// Every mutation is timestamped and durably written before the call returns.
#[derive(Clone)]
pub struct TaskHierarchy {
    storage: Arc<dyn StorageTrait>,
}

impl TaskHierarchy {
    /// Create a new task hierarchy service over the given storage.
    pub fn new(storage: Arc<dyn StorageTrait>) -> Self {
        Self { storage }
    }

    /// Create a new task, optionally under a parent.
    ///
    /// # Errors
    /// * `TaskError::ParentNotFound` - `parent_id` does not resolve
    /// * `TaskError::CycleRejected` - the parent chain is already cyclic
    ///   (corrupt hierarchy; a fresh task can never introduce a cycle itself)
    pub fn create_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
        parent_id: Option<TaskId>,
    ) -> SynapseResult<Task> {
        if let Some(pid) = parent_id {
            let parent = self
                .storage
                .task_get(pid)?
                .ok_or(SynapseError::Task(TaskError::ParentNotFound(pid)))?;
            // Walking to the root proves the chain this task will hang off is
            // still acyclic.
            self.ancestor_chain(parent.task_id)?;
        }

        let task = Task::new(title, description, priority, parent_id);
        self.storage.task_insert(&task)?;

        tracing::debug!(
            task_id = %task.task_id,
            parent_id = ?task.parent_task_id,
            priority = ?task.priority,
            "Task created"
        );

        Ok(task)
    }

    /// Get a task by ID.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound`
    pub fn get_task(&self, task_id: TaskId) -> SynapseResult<Task> {
        self.storage
            .task_get(task_id)?
            .ok_or(SynapseError::Task(TaskError::TaskNotFound(task_id)))
    }

    /// Move a task's status forward.
    ///
    /// Transitions are forward-only along the status order (unblocking is the
    /// one sanctioned backward move); leaving a terminal status requires
    /// [`TaskHierarchy::reopen`].
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound`
    /// * `TaskError::InvalidTransition`
    pub fn update_status(&self, task_id: TaskId, new_status: TaskStatus) -> SynapseResult<Task> {
        let task = self.get_task(task_id)?;

        if !task.status.can_transition_to(new_status) {
            return Err(SynapseError::Task(TaskError::InvalidTransition {
                from: task.status,
                to: new_status,
            }));
        }

        let updated = self.storage.task_update(
            task_id,
            TaskUpdate {
                status: Some(new_status),
                ..Default::default()
            },
        )?;

        tracing::debug!(
            task_id = %task_id,
            from = ?task.status,
            to = ?new_status,
            "Task status updated"
        );

        Ok(updated)
    }

    /// Reopen a terminal task back to `Active`, recording the terminal state
    /// it left.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound`
    /// * `TaskError::InvalidTransition` - the task is not in a terminal state
    pub fn reopen(&self, task_id: TaskId) -> SynapseResult<Task> {
        let task = self.get_task(task_id)?;

        if !task.status.is_terminal() {
            return Err(SynapseError::Task(TaskError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Active,
            }));
        }

        let updated = self.storage.task_update(
            task_id,
            TaskUpdate {
                status: Some(TaskStatus::Active),
                reopened_from: Some(task.status),
                ..Default::default()
            },
        )?;

        tracing::info!(
            task_id = %task_id,
            previous_status = ?task.status,
            "Task reopened"
        );

        Ok(updated)
    }

    /// Re-point a task under a new parent.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound` - the task does not resolve
    /// * `TaskError::ParentNotFound` - the new parent does not resolve
    /// * `TaskError::CycleRejected` - the new parent is the task itself or one
    ///   of its descendants
    pub fn reparent(&self, task_id: TaskId, new_parent_id: TaskId) -> SynapseResult<Task> {
        self.get_task(task_id)?;

        if self.storage.task_get(new_parent_id)?.is_none() {
            return Err(SynapseError::Task(TaskError::ParentNotFound(new_parent_id)));
        }

        if task_id == new_parent_id {
            return Err(SynapseError::Task(TaskError::CycleRejected {
                task_id,
                parent_id: new_parent_id,
            }));
        }

        // If walking up from the new parent reaches the task being moved, the
        // move would close a cycle.
        let chain = self.ancestor_chain(new_parent_id)?;
        if chain.contains(&task_id) {
            return Err(SynapseError::Task(TaskError::CycleRejected {
                task_id,
                parent_id: new_parent_id,
            }));
        }

        let updated = self.storage.task_update(
            task_id,
            TaskUpdate {
                parent_task_id: Some(Some(new_parent_id)),
                ..Default::default()
            },
        )?;

        tracing::debug!(
            task_id = %task_id,
            new_parent_id = %new_parent_id,
            "Task reparented"
        );

        Ok(updated)
    }

    /// Get the subtree rooted at a task, breadth-first, insertion order within
    /// each level. The root task is the first element.
    ///
    /// # Errors
    /// * `TaskError::TaskNotFound`
    pub fn get_subtree(&self, task_id: TaskId) -> SynapseResult<Vec<Task>> {
        let root = self.get_task(task_id)?;

        let mut result = Vec::new();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<Task> = VecDeque::new();
        queue.push_back(root);

        while let Some(task) = queue.pop_front() {
            if !visited.insert(task.task_id) {
                continue;
            }
            for child in self.storage.task_children(task.task_id)? {
                queue.push_back(child);
            }
            result.push(task);
        }

        Ok(result)
    }

    /// IDs of a task and all its descendants. Used to scope memory search to
    /// a branch of the hierarchy.
    pub fn descendant_ids(&self, task_id: TaskId) -> SynapseResult<HashSet<TaskId>> {
        Ok(self
            .get_subtree(task_id)?
            .into_iter()
            .map(|t| t.task_id)
            .collect())
    }

    /// Walk the parent chain from `start` to the root, returning every ID on
    /// the way (including `start`).
    ///
    /// # Errors
    /// * `TaskError::CycleRejected` - the stored chain revisits a node or
    ///   exceeds the depth bound
    fn ancestor_chain(&self, start: TaskId) -> SynapseResult<Vec<TaskId>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut current = Some(start);

        while let Some(id) = current {
            if !seen.insert(id) || chain.len() >= MAX_ANCESTOR_DEPTH {
                return Err(SynapseError::Task(TaskError::CycleRejected {
                    task_id: start,
                    parent_id: id,
                }));
            }
            chain.push(id);
            current = self.storage.task_get(id)?.and_then(|t| t.parent_task_id);
        }

        Ok(chain)
    }
}

impl std::fmt::Debug for TaskHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHierarchy").finish_non_exhaustive()
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
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Reparenting any task under any of its descendants SHALL be rejected
        /// with CycleRejected, for chains of arbitrary depth
        #[test]
        fn prop_reparent_under_descendant_rejected(depth in 1usize..12) {
            let service = TaskHierarchy::new(Arc::new(InMemoryStorage::new()));

            let root = service.create_task("root", "", TaskPriority::Medium, None).unwrap();
            let mut leaf = root.task_id;
            let mut chain = vec![root.task_id];
            for i in 0..depth {
                let t = service
                    .create_task(format!("t{i}"), "", TaskPriority::Medium, Some(leaf))
                    .unwrap();
                leaf = t.task_id;
                chain.push(leaf);
            }

            // Every node in the chain is a descendant of (or is) the root
            for descendant in &chain {
                let result = service.reparent(root.task_id, *descendant);
                let is_expected = matches!(
                    result,
                    Err(SynapseError::Task(TaskError::CycleRejected { .. }))
                );
                prop_assert!(is_expected);
            }
        }

        /// A subtree walk visits each task exactly once and starts at the root
        #[test]
        fn prop_subtree_visits_each_task_once(children in 1usize..8) {
            let service = TaskHierarchy::new(Arc::new(InMemoryStorage::new()));

            let root = service.create_task("root", "", TaskPriority::Medium, None).unwrap();
            for i in 0..children {
                service
                    .create_task(format!("c{i}"), "", TaskPriority::Low, Some(root.task_id))
                    .unwrap();
            }

            let subtree = service.get_subtree(root.task_id).unwrap();
            prop_assert_eq!(subtree.len(), children + 1);
            prop_assert_eq!(subtree[0].task_id, root.task_id);

            let unique: std::collections::HashSet<TaskId> =
                subtree.iter().map(|t| t.task_id).collect();
            prop_assert_eq!(unique.len(), subtree.len());
        }
    }
}
