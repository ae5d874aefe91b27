//! Task types and definitions

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use trellis_core::NodeType;

use crate::result::GraphResult;

/// Kind of work a task performs. Each kind has its own concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Build,
    Deploy,
    Run,
    Test,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [Self::Build, Self::Deploy, Self::Run, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Run => "run",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<NodeType> for TaskType {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Build => Self::Build,
            NodeType::Deploy => Self::Deploy,
            NodeType::Run => Self::Run,
            NodeType::Test => Self::Test,
        }
    }
}

/// Results of a task's direct dependencies, keyed by dependency key
pub type DependencyResults = BTreeMap<String, Arc<GraphResult>>;

/// The behaviour behind a task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Tasks that must complete before this one
    async fn resolve_dependencies(&self) -> anyhow::Result<Vec<Task>>;

    /// Do the work, given the results of the direct dependencies
    async fn process(&self, dependencies: &DependencyResults) -> anyhow::Result<serde_json::Value>;
}

/// A unit of work submitted to the processor.
///
/// Two tasks with equal key and version are the same unit of work.
#[derive(Clone)]
pub struct Task {
    pub task_type: TaskType,
    pub name: String,
    /// Content-derived version
    pub version: String,
    /// Bypass the result cache
    pub force: bool,
    /// Disambiguates multiple submissions of one key
    pub id_suffix: Option<String>,
    /// Human readable description, e.g. "build module api"
    pub description: String,
    pub handler: Arc<dyn TaskHandler>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key())
            .field("version", &self.version)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(
        task_type: TaskType,
        name: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let name = name.into();
        Self {
            description: format!("{} {}", task_type, name),
            task_type,
            name,
            version: version.into(),
            force: false,
            id_suffix: None,
            handler,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_id_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.id_suffix = Some(suffix.into());
        self
    }

    /// Work item key: `<type>.<name>`
    pub fn key(&self) -> String {
        format!("{}.{}", self.task_type, self.name)
    }

    /// Key plus the optional suffix
    pub fn id(&self) -> String {
        match &self.id_suffix {
            Some(suffix) => format!("{}.{}", self.key(), suffix),
            None => self.key(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test handlers shared by the crate's tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Handler with fixed dependencies and a scripted outcome
    pub struct StubHandler {
        pub dependencies: Mutex<Vec<Task>>,
        pub fail_with: Option<String>,
        pub delay: Duration,
        pub resolve_delay: Duration,
        pub calls: AtomicUsize,
        pub output: serde_json::Value,
    }

    impl StubHandler {
        pub fn ok() -> Arc<Self> {
            Arc::new(Self::bare())
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(message.to_string()),
                ..Self::bare()
            })
        }

        pub fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Self::bare()
            })
        }

        pub fn slow_to_resolve(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                resolve_delay: delay,
                ..Self::bare()
            })
        }

        fn bare() -> Self {
            Self {
                dependencies: Mutex::new(Vec::new()),
                fail_with: None,
                delay: Duration::ZERO,
                resolve_delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                output: serde_json::json!({"ok": true}),
            }
        }

        pub fn depends_on(self: &Arc<Self>, task: Task) -> Arc<Self> {
            self.dependencies.lock().unwrap().push(task);
            self.clone()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskHandler for StubHandler {
        async fn resolve_dependencies(&self) -> anyhow::Result<Vec<Task>> {
            if !self.resolve_delay.is_zero() {
                tokio::time::sleep(self.resolve_delay).await;
            }
            Ok(self.dependencies.lock().unwrap().clone())
        }

        async fn process(&self, _dependencies: &DependencyResults) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(message) => anyhow::bail!("{}", message),
                None => Ok(self.output.clone()),
            }
        }
    }

    pub fn task(task_type: TaskType, name: &str, version: &str, handler: Arc<StubHandler>) -> Task {
        Task::new(task_type, name, version, handler)
    }
}
