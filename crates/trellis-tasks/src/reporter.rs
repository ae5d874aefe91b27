//! Task lifecycle reporting

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::result::GraphResult;
use crate::task::{Task, TaskType};

/// Identity of the task an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub key: String,
    /// Key plus the submission suffix, unique within the batch
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub batch_id: String,
    pub version: String,
}

impl TaskInfo {
    pub fn new(task: &Task, batch_id: &str) -> Self {
        Self {
            key: task.key(),
            id: task.id(),
            name: task.name.clone(),
            task_type: task.task_type,
            batch_id: batch_id.to_string(),
            version: task.version.clone(),
        }
    }
}

/// Events emitted while processing a task graph
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A batch is starting
    GraphProcessing {
        batch_id: String,
        started_at: DateTime<Utc>,
        task_count: usize,
    },
    /// A task was added to the graph
    Pending(TaskInfo),
    /// A task started executing
    Processing(TaskInfo),
    /// A task completed successfully
    Complete {
        info: TaskInfo,
        result: Arc<GraphResult>,
        cached: bool,
    },
    /// A task failed
    Error {
        info: TaskInfo,
        error: String,
        cached: bool,
    },
    /// A task will not run
    Cancelled { info: TaskInfo, reason: String },
    /// A batch finished
    GraphComplete {
        batch_id: String,
        completed_at: DateTime<Utc>,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
    },
}

impl TaskEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GraphProcessing { .. } => "taskGraphProcessing",
            Self::Pending(_) => "taskPending",
            Self::Processing(_) => "taskProcessing",
            Self::Complete { .. } => "taskComplete",
            Self::Error { .. } => "taskError",
            Self::Cancelled { .. } => "taskCancelled",
            Self::GraphComplete { .. } => "taskGraphComplete",
        }
    }

    /// Task the event refers to, if any
    pub fn info(&self) -> Option<&TaskInfo> {
        match self {
            Self::Pending(info) | Self::Processing(info) => Some(info),
            Self::Complete { info, .. } | Self::Error { info, .. } | Self::Cancelled { info, .. } => {
                Some(info)
            }
            Self::GraphProcessing { .. } | Self::GraphComplete { .. } => None,
        }
    }
}

/// Trait for receiving task lifecycle events
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::GraphProcessing {
                batch_id,
                task_count,
                ..
            } => {
                tracing::info!(batch_id = %batch_id, task_count, "processing task graph");
            }
            TaskEvent::Pending(info) => {
                tracing::debug!(id = %info.id, batch_id = %info.batch_id, "task pending");
            }
            TaskEvent::Processing(info) => {
                tracing::info!(key = %info.key, version = %info.version, "task processing");
            }
            TaskEvent::Complete { info, result, cached } => {
                let duration = result
                    .started_at
                    .zip(result.completed_at)
                    .map(|(s, c)| (c - s).num_milliseconds())
                    .unwrap_or(0);
                tracing::info!(key = %info.key, cached, duration_ms = duration, "task complete");
            }
            TaskEvent::Error { info, error, cached } => {
                tracing::error!(key = %info.key, cached, error = %error, "task failed");
            }
            TaskEvent::Cancelled { info, reason } => {
                tracing::warn!(id = %info.id, reason = %reason, "task cancelled");
            }
            TaskEvent::GraphComplete {
                batch_id,
                succeeded,
                failed,
                cancelled,
                ..
            } => {
                tracing::info!(
                    batch_id = %batch_id,
                    succeeded,
                    failed,
                    cancelled,
                    "task graph complete"
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `name(key)` for every task event, in emission order
    pub fn task_trace(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.info().map(|info| format!("{}({})", e.name(), info.key)))
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    /// Broadcast an event to all registered reporters
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::*;

    fn info(name: &str) -> TaskInfo {
        TaskInfo::new(&task(TaskType::Build, name, "v1", StubHandler::ok()), "b1")
    }

    #[test]
    fn test_event_names() {
        assert_eq!(TaskEvent::Pending(info("a")).name(), "taskPending");
        assert_eq!(
            TaskEvent::Cancelled {
                info: info("a"),
                reason: "superseded".into()
            }
            .name(),
            "taskCancelled"
        );
        let graph = TaskEvent::GraphComplete {
            batch_id: "b1".into(),
            completed_at: Utc::now(),
            succeeded: 0,
            failed: 0,
            cancelled: 0,
        };
        assert_eq!(graph.name(), "taskGraphComplete");
        assert!(graph.info().is_none());
    }

    #[test]
    fn test_collecting_reporter_trace() {
        let reporter = CollectingReporter::default();
        reporter.report(&TaskEvent::Pending(info("a")));
        reporter.report(&TaskEvent::Processing(info("a")));

        assert_eq!(
            reporter.task_trace(),
            vec!["taskPending(build.a)", "taskProcessing(build.a)"]
        );
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        // Just verify it doesn't panic
        reporter.report(&TaskEvent::Processing(info("a")));
        reporter.report(&TaskEvent::Error {
            info: info("a"),
            error: "boom".into(),
            cached: false,
        });
    }

    #[test]
    fn test_registry_broadcast() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());

        registry.register(collecting.clone());
        registry.register(Arc::new(TracingReporter));
        assert_eq!(registry.all().len(), 2);

        registry.report(&TaskEvent::Pending(info("a")));
        assert_eq!(collecting.events().len(), 1);
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let json = serde_json::to_value(info("api")).unwrap();
        assert_eq!(json["batchId"], "b1");
        assert_eq!(json["type"], "build");
    }
}
