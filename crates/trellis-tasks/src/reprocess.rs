//! Change-driven reprocessing
//!
//! Turns file change notifications into new task submissions on a
//! long-lived processor. Source changes invalidate cached tree versions and
//! resubmit work for the affected modules. A configuration change rebuilds
//! the dependency graph, keeping the previous one when the new
//! configuration is invalid.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use trellis_core::config::load_config;
use trellis_core::{ChangeDetector, ChangeSet, ConfigGraph, ModuleVersion, Result, VcsHandler};

use crate::actions::{ActionContext, ActionKind};
use crate::error::TaskGraphError;
use crate::processor::{ProcessOptions, TaskGraphProcessor};
use crate::provider::Provider;
use crate::result::GraphResults;
use crate::task::Task;

/// Decides which tasks to submit for a set of changes
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn tasks_for_changes(
        &self,
        graph: &Arc<ConfigGraph>,
        versions: BTreeMap<String, ModuleVersion>,
        changes: &ChangeSet,
    ) -> Result<Vec<Task>>;
}

/// Rebuilds affected modules and optionally redeploys their services and
/// reruns their tests.
///
/// After a configuration change every enabled module is considered affected.
pub struct ActionChangeHandler {
    provider: Arc<dyn Provider>,
    deploy: bool,
    test: bool,
}

impl ActionChangeHandler {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            deploy: false,
            test: false,
        }
    }

    /// Redeploy services of affected modules
    pub fn with_deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    /// Rerun tests of affected modules
    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }
}

#[async_trait]
impl ChangeHandler for ActionChangeHandler {
    async fn tasks_for_changes(
        &self,
        graph: &Arc<ConfigGraph>,
        versions: BTreeMap<String, ModuleVersion>,
        changes: &ChangeSet,
    ) -> Result<Vec<Task>> {
        let affected: BTreeSet<String> = changes.module_names().into_iter().collect();
        let in_scope = |module: &str| changes.config_changed || affected.contains(module);

        let ctx = ActionContext::new(graph.clone(), versions, self.provider.clone());
        let mut kinds = Vec::new();

        for module in graph.get_modules(None, false)? {
            if in_scope(&module.name) {
                kinds.push(ActionKind::Build {
                    module: module.name.clone(),
                });
            }
        }
        if self.deploy {
            for service in graph.get_services(None, false)? {
                if in_scope(&service.module_name) {
                    kinds.push(ActionKind::Deploy {
                        service: service.name.clone(),
                    });
                }
            }
        }
        if self.test {
            for test in graph.get_tests(None, false)? {
                if in_scope(&test.module_name) {
                    kinds.push(ActionKind::Test {
                        test: test.name.clone(),
                    });
                }
            }
        }

        kinds.into_iter().map(|kind| ctx.task(kind, false)).collect()
    }
}

/// What a call to [`Reprocessor::handle_changes`] did
#[derive(Debug, Default)]
pub struct ReprocessOutcome {
    pub changes: ChangeSet,
    /// The dependency graph was rebuilt from a changed configuration
    pub graph_reloaded: bool,
    /// Results of the resubmitted tasks, if any were submitted
    pub results: Option<GraphResults>,
}

/// Resubmits work to a shared processor as files change
pub struct Reprocessor {
    config_path: PathBuf,
    graph: RwLock<Arc<ConfigGraph>>,
    vcs: Arc<VcsHandler>,
    processor: Arc<TaskGraphProcessor>,
    handler: Arc<dyn ChangeHandler>,
    detector: ChangeDetector,
}

impl Reprocessor {
    pub fn new(
        config_path: impl Into<PathBuf>,
        graph: ConfigGraph,
        vcs: Arc<VcsHandler>,
        processor: Arc<TaskGraphProcessor>,
        handler: Arc<dyn ChangeHandler>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            graph: RwLock::new(Arc::new(graph)),
            vcs,
            processor,
            handler,
            detector: ChangeDetector::new(),
        }
    }

    /// Load the configuration file and build the initial graph
    pub fn from_config(
        config_path: impl Into<PathBuf>,
        vcs: Arc<VcsHandler>,
        processor: Arc<TaskGraphProcessor>,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self> {
        let config_path = config_path.into();
        let graph = ConfigGraph::build(load_config(&config_path)?.modules)?;
        Ok(Self::new(config_path, graph, vcs, processor, handler))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The current graph snapshot
    pub fn graph(&self) -> Arc<ConfigGraph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rebuild the graph from the configuration file.
    ///
    /// The current graph is replaced only when loading, validation and graph
    /// construction all succeed.
    pub fn reload_config(&self) -> Result<Arc<ConfigGraph>> {
        let config = load_config(&self.config_path)?;
        let graph = Arc::new(ConfigGraph::build(config.modules)?);
        *self.graph.write().unwrap_or_else(|e| e.into_inner()) = graph.clone();
        info!(path = %self.config_path.display(), "configuration reloaded");
        Ok(graph)
    }

    /// React to changed files
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub async fn handle_changes(&self, paths: &[PathBuf]) -> std::result::Result<ReprocessOutcome, TaskGraphError> {
        for path in paths {
            if !ChangeDetector::is_config_file(path) {
                self.vcs.invalidate(path);
            }
        }

        let mut graph = self.graph();
        let mut changes = self.detector.detect_changes(&graph, paths)?;
        let mut outcome = ReprocessOutcome::default();

        if changes.config_changed {
            match self.reload_config() {
                Ok(reloaded) => {
                    graph = reloaded;
                    changes = self.detector.detect_changes(&graph, paths)?;
                    outcome.graph_reloaded = true;
                }
                Err(e) => {
                    error!(error = %e, "invalid configuration, keeping previous graph");
                    changes.config_changed = false;
                }
            }
        }

        if changes.is_empty() {
            debug!(unmatched = changes.unmatched.len(), "no modules affected");
            outcome.changes = changes;
            return Ok(outcome);
        }

        info!(
            modules = ?changes.module_names(),
            config_changed = changes.config_changed,
            "reprocessing changes"
        );

        let versions = self.vcs.resolve_module_versions(&graph).await?;
        let tasks = self.handler.tasks_for_changes(&graph, versions, &changes).await?;

        if !tasks.is_empty() {
            outcome.results = Some(self.processor.process(tasks, ProcessOptions::default()).await?);
        }
        outcome.changes = changes;
        Ok(outcome)
    }
}
