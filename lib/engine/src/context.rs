//! Per-run task results and input-context assembly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use taskloom_core::TaskId;

/// Separator placed between upstream results when none is configured.
pub const DEFAULT_CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Results produced so far in one run, keyed by task.
///
/// Owned by a single run and only ever grows. A failed task has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultMap(BTreeMap<TaskId, String>);

impl ResultMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task's result.
    pub fn insert(&mut self, task_id: TaskId, result: String) {
        self.0.insert(task_id, result);
    }

    /// Returns a task's result.
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<&str> {
        self.0.get(task_id).map(String::as_str)
    }

    /// Returns true if the task produced a result.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.0.contains_key(task_id)
    }

    /// Returns the number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no task has produced a result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over results ordered by task id.
    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &str)> {
        self.0.iter().map(|(id, result)| (id, result.as_str()))
    }
}

/// Joins the results of `upstream` into one context string.
///
/// Results are taken in the order of `upstream`, never map order. Upstream
/// tasks without a result (they failed) contribute nothing.
#[must_use]
pub fn build_context(upstream: &[TaskId], results: &ResultMap, separator: &str) -> String {
    upstream
        .iter()
        .filter_map(|task_id| results.get(task_id))
        .collect::<Vec<_>>()
        .join(separator)
}
