//! Task outcomes

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::{DependencyResults, Task, TaskType};

/// Outcome of one task. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResult {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub key: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub batch_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    #[serde(skip)]
    pub dependency_results: DependencyResults,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl GraphResult {
    fn base(task: &Task, batch_id: &str) -> Self {
        Self {
            task_type: task.task_type,
            key: task.key(),
            name: task.name.clone(),
            description: task.description.clone(),
            version: task.version.clone(),
            batch_id: batch_id.to_string(),
            started_at: None,
            completed_at: None,
            output: None,
            dependency_results: DependencyResults::new(),
            error: None,
            cancelled: false,
        }
    }

    /// Result of a `process` call
    pub fn processed(
        task: &Task,
        batch_id: &str,
        started_at: DateTime<Utc>,
        outcome: Result<serde_json::Value, String>,
        dependency_results: DependencyResults,
    ) -> Self {
        let (output, error) = match outcome {
            Ok(output) => (Some(output), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            output,
            error,
            dependency_results,
            ..Self::base(task, batch_id)
        }
    }

    /// Result of a task that was never executed
    pub fn cancelled(task: &Task, batch_id: &str) -> Self {
        Self {
            cancelled: true,
            ..Self::base(task, batch_id)
        }
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Results of the requested tasks of one `process` call, keyed by task key
#[derive(Debug, Clone, Default)]
pub struct GraphResults {
    results: BTreeMap<String, Arc<GraphResult>>,
}

impl GraphResults {
    pub(crate) fn insert(&mut self, result: Arc<GraphResult>) {
        self.results.insert(result.key.clone(), result);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<GraphResult>> {
        self.results.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GraphResult>> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results carrying an error
    pub fn failed(&self) -> Vec<&Arc<GraphResult>> {
        self.results.values().filter(|r| r.is_error()).collect()
    }

    /// Results that were cancelled
    pub fn cancelled(&self) -> Vec<&Arc<GraphResult>> {
        self.results.values().filter(|r| r.cancelled).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.results.values().any(|r| !r.is_success())
    }
}
