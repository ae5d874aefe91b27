//! Per-invocation session: configuration, graph, versioning and processor

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use trellis_core::config::{load_config_from_dir, ProjectConfig};
use trellis_core::{ConfigGraph, ModuleVersion, VcsHandler};
use trellis_tasks::{
    ActionContext, GraphResult, GraphResults, ProcessOptions, Provider, ShellProvider, Task, TaskGraphError,
    TaskGraphProcessor, TaskReporterRegistry,
};

use crate::cli::output::ConsoleReporter;
use crate::cli::{Cli, OutputFormat};

/// Everything a command needs to resolve and execute actions
pub struct Session {
    pub config_path: PathBuf,
    pub config: ProjectConfig,
    pub graph: Arc<ConfigGraph>,
    pub vcs: Arc<VcsHandler>,
    pub processor: Arc<TaskGraphProcessor>,
    pub provider: Arc<dyn Provider>,
}

impl Session {
    /// Load the project found from `dir` upwards
    pub fn load(dir: &Path, cli: &Cli) -> anyhow::Result<Self> {
        let (config, config_path) = load_config_from_dir(dir)?;
        info!(path = %config_path.display(), modules = config.modules.len(), "loaded configuration");

        let graph = Arc::new(ConfigGraph::build(config.modules.clone())?);

        let vcs = Arc::new(
            VcsHandler::default()
                .with_file_count_warning_threshold(config.versioning.file_count_warning_threshold),
        );

        let mut reporters = TaskReporterRegistry::new();
        if cli.format == OutputFormat::Text && !cli.quiet {
            reporters.register(Arc::new(ConsoleReporter));
        }
        let processor = Arc::new(TaskGraphProcessor::new(&config.tasks, Arc::new(reporters)));

        Ok(Self {
            config_path,
            config,
            graph,
            vcs,
            processor,
            provider: Arc::new(ShellProvider::new()),
        })
    }

    /// Directory holding the configuration file
    pub fn project_root(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Resolve the version of every module
    pub async fn versions(&self) -> anyhow::Result<BTreeMap<String, ModuleVersion>> {
        let versions = self
            .vcs
            .resolve_module_versions(&self.graph)
            .await
            .context("failed to resolve module versions")?;
        debug!(modules = versions.len(), "resolved module versions");
        Ok(versions)
    }

    /// Action context over freshly resolved versions
    pub async fn action_context(&self, force: bool, force_build: bool) -> anyhow::Result<ActionContext> {
        let versions = self.versions().await?;
        Ok(
            ActionContext::new(self.graph.clone(), versions, self.provider.clone())
                .with_force(force)
                .with_force_build(force_build),
        )
    }

    /// Process tasks, print a summary and fail when any task did not succeed
    pub async fn execute(&self, tasks: Vec<Task>, cli: &Cli) -> anyhow::Result<GraphResults> {
        if tasks.is_empty() {
            if cli.prints_text() {
                crate::cli::output::warning("Nothing to do");
            }
            return Ok(GraphResults::default());
        }

        let results = self.processor.process(tasks, ProcessOptions::default()).await?;
        print_results(&results, cli)?;

        let failures: Vec<String> = results
            .failed()
            .iter()
            .map(|r| format!("{}: {}", r.description, r.error.as_deref().unwrap_or_default()))
            .collect();
        if !failures.is_empty() {
            return Err(TaskGraphError::TasksFailed { failures }.into());
        }
        Ok(results)
    }
}

/// Print a batch summary, or every result as JSON
pub fn print_results(results: &GraphResults, cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let all: Vec<&GraphResult> = results.iter().map(|r| r.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            let failed = results.failed().len();
            let cancelled = results.cancelled().len();
            let succeeded = results.len() - failed - cancelled;
            println!();
            let summary = format!(
                "{} succeeded, {} failed, {} cancelled",
                succeeded, failed, cancelled
            );
            if results.has_failures() {
                crate::cli::output::error(&summary);
            } else {
                crate::cli::output::success(&summary);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
tasks:
  concurrency: 4
modules:
  - name: base
    path: base
    build:
      command: "echo base"
  - name: api
    path: api
    build:
      dependencies: [base]
      command: "echo api"
    services:
      - name: api
        command: "echo deploy"
  - name: broken
    path: broken
    build:
      command: "exit 3"
"#;

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("trellis.yaml"), PROJECT).unwrap();
        for module in ["base", "api", "broken"] {
            std::fs::create_dir_all(temp.path().join(module)).unwrap();
            std::fs::write(temp.path().join(module).join("main.txt"), module).unwrap();
        }
        temp
    }

    fn cli() -> Cli {
        Cli::try_parse_from(["trellis", "--quiet", "validate"]).unwrap()
    }

    #[tokio::test]
    async fn test_load_and_build_selected_modules() {
        let temp = project();
        let session = Session::load(&temp.path().join("api"), &cli()).unwrap();
        assert_eq!(session.project_root(), temp.path());

        let ctx = session.action_context(false, false).await.unwrap();
        let tasks = ctx.build_tasks(Some(&["api".to_string()])).unwrap();
        let results = session.execute(tasks, &cli()).await.unwrap();

        assert!(results.get("build.base").unwrap().is_success());
        let output = results.get("build.api").unwrap().output.clone().unwrap();
        assert_eq!(output["stdout"], "api");
    }

    #[tokio::test]
    async fn test_failed_task_is_task_failure() {
        let temp = project();
        let session = Session::load(temp.path(), &cli()).unwrap();

        let ctx = session.action_context(false, false).await.unwrap();
        let tasks = ctx.build_tasks(Some(&["broken".to_string()])).unwrap();
        let err = session.execute(tasks, &cli()).await.unwrap_err();

        assert_eq!(crate::exit_codes::for_error(&err), crate::exit_codes::TASK_FAILED);
        assert!(err.to_string().contains("build module broken"));
    }

    #[test]
    fn test_missing_config_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let err = Session::load(temp.path(), &cli()).err().unwrap();
        assert_eq!(crate::exit_codes::for_error(&err), crate::exit_codes::CONFIG_ERROR);
    }
}
