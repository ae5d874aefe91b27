//! Actions: build, deploy, run and test tasks derived from the dependency graph
//!
//! An action task resolves its dependencies by asking the graph for the
//! node's direct dependencies, and processes by calling the provider.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use trellis_core::config::ModuleConfig;
use trellis_core::graph::RuntimeEntity;
use trellis_core::{ConfigGraph, ModuleVersion, NodeType, Result, TrellisError};

use crate::provider::Provider;
use crate::task::{DependencyResults, Task, TaskHandler, TaskType};

/// The kinds of action the engine schedules
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Build { module: String },
    Deploy { service: String },
    Run { task: String },
    /// Test names are `<module>.<test>`
    Test { test: String },
}

impl ActionKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Build { .. } => NodeType::Build,
            Self::Deploy { .. } => NodeType::Deploy,
            Self::Run { .. } => NodeType::Run,
            Self::Test { .. } => NodeType::Test,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Build { module } => module,
            Self::Deploy { service } => service,
            Self::Run { task } => task,
            Self::Test { test } => test,
        }
    }

    /// Action for a graph node
    pub fn for_node(node_type: NodeType, name: impl Into<String>) -> Self {
        let name = name.into();
        match node_type {
            NodeType::Build => Self::Build { module: name },
            NodeType::Deploy => Self::Deploy { service: name },
            NodeType::Run => Self::Run { task: name },
            NodeType::Test => Self::Test { test: name },
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build { module } => write!(f, "build module {}", module),
            Self::Deploy { service } => write!(f, "deploy service {}", service),
            Self::Run { task } => write!(f, "run task {}", task),
            Self::Test { test } => write!(f, "run test {}", test),
        }
    }
}

/// Everything an action needs: the graph snapshot, resolved module versions
/// and the provider doing the work
#[derive(Clone)]
pub struct ActionContext {
    pub graph: Arc<ConfigGraph>,
    pub versions: Arc<BTreeMap<String, ModuleVersion>>,
    pub provider: Arc<dyn Provider>,
    /// Force the requested actions
    pub force: bool,
    /// Also force build dependencies
    pub force_build: bool,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("versions", &self.versions.len())
            .field("force", &self.force)
            .field("force_build", &self.force_build)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    pub fn new(
        graph: Arc<ConfigGraph>,
        versions: BTreeMap<String, ModuleVersion>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            graph,
            versions: Arc::new(versions),
            provider,
            force: false,
            force_build: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_force_build(mut self, force_build: bool) -> Self {
        self.force_build = force_build;
        self
    }

    /// Version string of the module owning an action
    fn version_of(&self, module: &str) -> Result<String> {
        self.versions
            .get(module)
            .map(|v| v.version_string.clone())
            .ok_or_else(|| TrellisError::other(format!("no version resolved for module '{}'", module)))
    }

    fn owning_module(&self, kind: &ActionKind) -> Result<String> {
        match kind {
            ActionKind::Build { module } => Ok(self.graph.get_module(module, true)?.name.clone()),
            other => self
                .graph
                .get_entity(other.node_type(), other.name())
                .map(|e| e.module_name.clone())
                .ok_or_else(|| {
                    TrellisError::other(format!("unknown {} '{}'", other.node_type().entity_kind(), other.name()))
                }),
        }
    }

    /// Create the task for an action
    pub fn task(&self, kind: ActionKind, force: bool) -> Result<Task> {
        let module = self.owning_module(&kind)?;
        let version = self.version_of(&module)?;
        let description = kind.to_string();

        Ok(Task::new(
            TaskType::from(kind.node_type()),
            kind.name().to_string(),
            version,
            Arc::new(ActionTask {
                context: self.clone(),
                kind,
            }),
        )
        .with_force(force)
        .with_description(description))
    }

    /// Build tasks for the given modules, or every enabled module
    pub fn build_tasks(&self, modules: Option<&[String]>) -> Result<Vec<Task>> {
        self.graph
            .get_modules(modules, false)?
            .into_iter()
            .map(|m| self.task(ActionKind::Build { module: m.name.clone() }, self.force))
            .collect()
    }

    /// Deploy tasks for the given services, or every enabled service
    pub fn deploy_tasks(&self, services: Option<&[String]>) -> Result<Vec<Task>> {
        self.entity_tasks(self.graph.get_services(services, false)?, NodeType::Deploy)
    }

    /// Run tasks for the given tasks, or every enabled task
    pub fn run_tasks(&self, tasks: Option<&[String]>) -> Result<Vec<Task>> {
        self.entity_tasks(self.graph.get_tasks(tasks, false)?, NodeType::Run)
    }

    /// Test tasks for the given tests, or every enabled test
    pub fn test_tasks(&self, tests: Option<&[String]>) -> Result<Vec<Task>> {
        self.entity_tasks(self.graph.get_tests(tests, false)?, NodeType::Test)
    }

    fn entity_tasks(&self, entities: Vec<&RuntimeEntity>, node_type: NodeType) -> Result<Vec<Task>> {
        entities
            .into_iter()
            .map(|e| self.task(ActionKind::for_node(node_type, e.name.clone()), self.force))
            .collect()
    }

    fn module(&self, name: &str) -> anyhow::Result<&ModuleConfig> {
        Ok(self.graph.get_module(name, true)?)
    }

    fn entity(&self, kind: &ActionKind) -> anyhow::Result<&RuntimeEntity> {
        self.graph
            .get_entity(kind.node_type(), kind.name())
            .with_context(|| format!("unknown {} '{}'", kind.node_type().entity_kind(), kind.name()))
    }
}

/// Task handler behind every action
struct ActionTask {
    context: ActionContext,
    kind: ActionKind,
}

#[async_trait]
impl TaskHandler for ActionTask {
    async fn resolve_dependencies(&self) -> anyhow::Result<Vec<Task>> {
        let ctx = &self.context;
        let relations = ctx
            .graph
            .get_dependencies(self.kind.node_type(), self.kind.name(), false)?;

        let mut tasks = Vec::new();
        for key in relations.keys() {
            let force = key.node_type == NodeType::Build && ctx.force_build;
            tasks.push(ctx.task(ActionKind::for_node(key.node_type, key.name), force)?);
        }
        Ok(tasks)
    }

    async fn process(&self, dependencies: &DependencyResults) -> anyhow::Result<Value> {
        let ctx = &self.context;
        let provider = &ctx.provider;

        match &self.kind {
            ActionKind::Build { module } => {
                let module = ctx.module(module)?;
                let version = ctx.version_of(&module.name)?;
                provider.build(module, &version, dependencies).await
            }
            kind => {
                let entity = ctx.entity(kind)?;
                let module = ctx.module(&entity.module_name)?;
                let version = ctx.version_of(&module.name)?;
                match kind {
                    ActionKind::Deploy { .. } => provider.deploy(entity, module, &version, dependencies).await,
                    ActionKind::Run { .. } => provider.run_task(entity, module, &version, dependencies).await,
                    _ => provider.test(entity, module, &version, dependencies).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessOptions, TaskGraphProcessor};
    use crate::reporter::CollectingReporter;
    use std::sync::Mutex;
    use trellis_core::config::{RuntimeEntityConfig, TasksConfig};

    /// Provider that records calls and never fails
    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn record(&self, call: String) -> anyhow::Result<Value> {
            self.calls.lock().unwrap().push(call.clone());
            Ok(Value::String(call))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        async fn build(&self, module: &ModuleConfig, version: &str, _: &DependencyResults) -> anyhow::Result<Value> {
            self.record(format!("build {} {}", module.name, version))
        }

        async fn deploy(
            &self,
            service: &RuntimeEntity,
            _: &ModuleConfig,
            _: &str,
            deps: &DependencyResults,
        ) -> anyhow::Result<Value> {
            let deps: Vec<&str> = deps.keys().map(String::as_str).collect();
            self.record(format!("deploy {} after [{}]", service.name, deps.join(", ")))
        }

        async fn run_task(&self, task: &RuntimeEntity, _: &ModuleConfig, _: &str, _: &DependencyResults) -> anyhow::Result<Value> {
            self.record(format!("run {}", task.name))
        }

        async fn test(&self, test: &RuntimeEntity, _: &ModuleConfig, _: &str, _: &DependencyResults) -> anyhow::Result<Value> {
            self.record(format!("test {}", test.name))
        }
    }

    fn graph() -> Arc<ConfigGraph> {
        Arc::new(
            ConfigGraph::build(vec![
                ModuleConfig::new("base"),
                ModuleConfig::new("api")
                    .with_build_dependency("base")
                    .with_service(RuntimeEntityConfig::new("api").with_dependency("db").with_dependency("cache"))
                    .with_task(RuntimeEntityConfig::new("seed").with_dependency("db"))
                    .with_test(RuntimeEntityConfig::new("unit")),
                ModuleConfig::new("db").with_service(RuntimeEntityConfig::new("db")),
                ModuleConfig::new("cache").with_service(RuntimeEntityConfig::new("cache").disabled()),
            ])
            .unwrap(),
        )
    }

    fn versions(graph: &ConfigGraph) -> BTreeMap<String, ModuleVersion> {
        graph
            .build_order()
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    ModuleVersion {
                        version_string: format!("v-{}", name),
                        dependency_versions: BTreeMap::new(),
                        files: Vec::new(),
                    },
                )
            })
            .collect()
    }

    fn context(provider: Arc<RecordingProvider>) -> ActionContext {
        let graph = graph();
        let versions = versions(&graph);
        ActionContext::new(graph, versions, provider)
    }

    fn processor() -> TaskGraphProcessor {
        TaskGraphProcessor::new(&TasksConfig::default(), Arc::new(CollectingReporter::default()))
    }

    #[tokio::test]
    async fn test_deploy_runs_after_builds_and_dependencies() {
        let provider = Arc::new(RecordingProvider::default());
        let ctx = context(provider.clone());
        let tasks = ctx.deploy_tasks(Some(&["api".to_string()])).unwrap();

        let results = processor().process(tasks, ProcessOptions::default()).await.unwrap();
        assert!(results.get("deploy.api").unwrap().is_success());

        let calls = provider.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert!(position("build base v-base") < position("build api v-api"));
        assert!(position("build db v-db") < position("deploy db after [build.db]"));
        // the disabled cache service is not a dependency
        assert!(calls.contains(&"deploy api after [build.api, deploy.db]".to_string()));
        assert_eq!(calls.len(), 5);
    }

    #[tokio::test]
    async fn test_task_uses_owning_module_version() {
        let ctx = context(Arc::new(RecordingProvider::default()));
        let task = ctx.task(ActionKind::Test { test: "api.unit".into() }, false).unwrap();

        assert_eq!(task.key(), "test.api.unit");
        assert_eq!(task.version, "v-api");
        assert_eq!(task.description, "run test api.unit");
    }

    #[tokio::test]
    async fn test_force_build_forces_build_dependencies_only() {
        let ctx = context(Arc::new(RecordingProvider::default())).with_force_build(true);
        let task = ctx.task(ActionKind::Run { task: "seed".into() }, false).unwrap();

        let deps = task.handler.resolve_dependencies().await.unwrap();
        let forced: Vec<(String, bool)> = deps.iter().map(|t| (t.key(), t.force)).collect();
        assert_eq!(
            forced,
            vec![("build.api".to_string(), true), ("deploy.db".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_requested_tasks_forced() {
        let ctx = context(Arc::new(RecordingProvider::default())).with_force(true);
        let tasks = ctx.build_tasks(None).unwrap();
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.force));
    }

    #[test]
    fn test_disabled_service_cannot_be_requested() {
        let ctx = context(Arc::new(RecordingProvider::default()));
        let err = ctx.deploy_tasks(Some(&["cache".to_string()])).unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_missing_version_is_error() {
        let graph = graph();
        let ctx = ActionContext::new(graph, BTreeMap::new(), Arc::new(RecordingProvider::default()));
        let err = ctx.task(ActionKind::Build { module: "api".into() }, false).unwrap_err();
        assert!(err.to_string().contains("no version resolved for module 'api'"));
    }
}
