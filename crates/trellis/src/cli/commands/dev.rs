//! Dev command - watch the project and reprocess changes
//!
//! Builds everything once, starts the configured auxiliary processes under
//! supervision, then feeds file system notifications to the reprocessor
//! until interrupted. A process tree that fails for good ends the session.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Component, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use trellis_core::config::SupervisedProcessConfig;
use trellis_core::vcs::is_version_file_name;
use trellis_core::ChangeSet;
use trellis_process::{
    NodeConfig, NodeId, ProcessFailure, ProcessSpec, ProcessTree, RetryConfig, SupervisorError,
};
use trellis_tasks::{ActionChangeHandler, ChangeHandler, ProcessOptions, ReprocessOutcome, Reprocessor};

use crate::cli::{output, Cli};
use crate::session::{print_results, Session};

/// Watch for changes and rebuild affected modules
#[derive(Debug, Args)]
pub struct DevCommand {
    /// Also redeploy the services of changed modules
    #[arg(long)]
    pub deploy: bool,

    /// Also rerun the tests of changed modules
    #[arg(long)]
    pub test: bool,

    /// Quiet period collecting file changes before they are processed
    #[arg(long, value_name = "MS", default_value_t = 200)]
    pub debounce_ms: u64,

    /// Do not start the configured auxiliary processes
    #[arg(long)]
    pub no_processes: bool,
}

impl DevCommand {
    /// Execute the dev command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(deploy = self.deploy, test = self.test, "executing dev command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let session = Session::load(&cwd, cli)?;
        let root = session.project_root().to_path_buf();

        let handler: Arc<dyn ChangeHandler> = Arc::new(
            ActionChangeHandler::new(session.provider.clone())
                .with_deploy(self.deploy)
                .with_test(self.test),
        );

        // everything counts as changed on the first pass
        let initial = ChangeSet {
            config_changed: true,
            ..Default::default()
        };
        let versions = session.versions().await?;
        let tasks = handler.tasks_for_changes(&session.graph, versions, &initial).await?;
        if !tasks.is_empty() {
            let results = session.processor.process(tasks, ProcessOptions::default()).await?;
            print_results(&results, cli)?;
        }

        let (failure_tx, failures) = mpsc::unbounded_channel::<ProcessFailure>();
        let mut trees = Vec::new();
        if !self.no_processes {
            for process in &session.config.dev.processes {
                let tree = build_tree(process)?;
                let tx = failure_tx.clone();
                tree.set_failure_handler(move |failure| {
                    let _ = tx.send(failure);
                })?;
                tree.start_all()
                    .with_context(|| format!("failed to start process '{}'", process.name))?;
                trees.push(tree);
            }
        }

        let (change_tx, changes) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                let _ = change_tx.send(event.paths);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "file watcher error"),
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        let reprocessor = Reprocessor::new(
            session.config_path.clone(),
            (*session.graph).clone(),
            session.vcs.clone(),
            session.processor.clone(),
            handler,
        );

        if cli.prints_text() {
            println!();
            output::info(&format!(
                "Watching {} for changes (Ctrl-C to stop)",
                output::path_style().apply_to(root.display())
            ));
        }

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        let reprocessor = &reprocessor;
        let exit = watch(
            changes,
            failures,
            shutdown,
            Duration::from_millis(self.debounce_ms),
            |batch| async move {
                debug!(paths = batch.len(), "processing file changes");
                let reported = match reprocessor.handle_changes(&batch).await {
                    Ok(outcome) => report(&outcome, cli),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = reported {
                    output::error(&format!("{:#}", e));
                }
            },
        )
        .await;

        drop(watcher);
        for tree in &trees {
            tree.stop_all();
        }

        match exit {
            WatchExit::Interrupted => {
                if cli.prints_text() {
                    println!();
                    output::info("Stopped watching");
                }
                Ok(())
            }
            WatchExit::ProcessFailed(failure) => Err(process_failed(failure)),
        }
    }
}

/// Why the watch loop ended
#[derive(Debug, PartialEq, Eq)]
enum WatchExit {
    Interrupted,
    ProcessFailed(ProcessFailure),
}

fn process_failed(failure: ProcessFailure) -> anyhow::Error {
    anyhow::Error::new(SupervisorError::TreeFailed { node: failure.node }).context(failure.reason)
}

/// Feed debounced file changes to `reprocess` until shutdown or a process
/// tree fails.
///
/// One reprocessing run is in flight at a time. Changes arriving meanwhile
/// are queued for the next run, and shutdown and failures are observed while
/// a run is in progress.
async fn watch<F, Fut>(
    mut changes: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    mut failures: mpsc::UnboundedReceiver<ProcessFailure>,
    shutdown: impl Future<Output = ()>,
    window: Duration,
    mut reprocess: F,
) -> WatchExit
where
    F: FnMut(Vec<PathBuf>) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let debounce = tokio::time::sleep(window);
    tokio::pin!(debounce);

    let mut queued: Vec<PathBuf> = Vec::new();
    let mut running: Option<Pin<Box<Fut>>> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => return WatchExit::Interrupted,
            Some(failure) = failures.recv() => {
                error!(node = %failure.node, reason = %failure.reason, "process tree failed");
                return WatchExit::ProcessFailed(failure);
            }
            Some(paths) = changes.recv() => {
                queued.extend(paths);
                debounce.as_mut().reset(tokio::time::Instant::now() + window);
            }
            _ = &mut debounce, if !queued.is_empty() && running.is_none() => {
                let batch = relevant_paths(std::mem::take(&mut queued));
                if !batch.is_empty() {
                    running = Some(Box::pin(reprocess(batch)));
                }
            }
            _ = async { if let Some(run) = running.as_mut() { run.await } }, if running.is_some() => {
                running = None;
            }
        }
    }
}

fn report(outcome: &ReprocessOutcome, cli: &Cli) -> anyhow::Result<()> {
    if cli.prints_text() {
        if outcome.graph_reloaded {
            output::info("Configuration reloaded");
        }
        if !outcome.changes.modules.is_empty() {
            let names = outcome.changes.module_names().join(", ");
            println!("{} {}", style("Changed:").bold(), names);
        }
    }
    if let Some(results) = &outcome.results {
        print_results(results, cli)?;
    }
    Ok(())
}

/// Drop duplicates and paths that never affect a version
fn relevant_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let unique: BTreeSet<PathBuf> = paths
        .into_iter()
        .filter(|path| {
            let in_git = path
                .components()
                .any(|c| matches!(c, Component::Normal(name) if name == ".git"));
            let version_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_version_file_name);
            !in_git && !version_file
        })
        .collect();
    unique.into_iter().collect()
}

fn node_config(process: &SupervisedProcessConfig) -> NodeConfig {
    let mut spec = ProcessSpec::new(process.command.clone()).with_args(process.args.iter().cloned());
    if let Some(cwd) = &process.cwd {
        spec = spec.with_cwd(cwd.clone());
    }
    for (key, value) in &process.env {
        spec = spec.with_env(key.clone(), value.clone());
    }

    let mut node = NodeConfig::new(process.name.clone(), spec).with_retry(RetryConfig::new(
        process.max_retries,
        Duration::from_millis(process.min_timeout_ms),
    ));
    if let Some(pattern) = process.error_pattern.clone() {
        node = node.with_error_classifier(move |line| line.contains(pattern.as_str()));
    }
    if let Some(pattern) = process.critical_pattern.clone() {
        node = node.with_critical_classifier(move |line| line.contains(pattern.as_str()));
    }
    node
}

/// Assemble a supervised tree rooted at `process`
fn build_tree(process: &SupervisedProcessConfig) -> trellis_process::Result<ProcessTree> {
    let tree = ProcessTree::new(node_config(process));
    attach(&tree, tree.root(), &process.descendants)?;
    Ok(tree)
}

fn attach(tree: &ProcessTree, parent: NodeId, children: &[SupervisedProcessConfig]) -> trellis_process::Result<()> {
    let ids = tree.add_descendants(parent, children.iter().map(node_config))?;
    for (id, child) in ids.into_iter().zip(children) {
        attach(tree, id, &child.descendants)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_process::ProcessState;

    fn process(name: &str, command: &str, args: &[&str]) -> SupervisedProcessConfig {
        SupervisedProcessConfig {
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_relevant_paths_filters_and_dedups() {
        let paths = vec![
            PathBuf::from("/p/api/main.rs"),
            PathBuf::from("/p/.git/index"),
            PathBuf::from("/p/api/.trellis-module-version"),
            PathBuf::from("/p/api/main.rs"),
            PathBuf::from("/p/trellis.yaml"),
        ];
        assert_eq!(
            relevant_paths(paths),
            vec![PathBuf::from("/p/api/main.rs"), PathBuf::from("/p/trellis.yaml")]
        );
    }

    fn channels() -> (
        mpsc::UnboundedSender<Vec<PathBuf>>,
        mpsc::UnboundedReceiver<Vec<PathBuf>>,
        mpsc::UnboundedSender<ProcessFailure>,
        mpsc::UnboundedReceiver<ProcessFailure>,
    ) {
        let (change_tx, changes) = mpsc::unbounded_channel();
        let (failure_tx, failures) = mpsc::unbounded_channel();
        (change_tx, changes, failure_tx, failures)
    }

    #[tokio::test]
    async fn test_watch_debounces_change_bursts() {
        let (change_tx, changes, _failure_tx, failures) = channels();
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        change_tx.send(vec![PathBuf::from("/p/b.rs")]).unwrap();
        change_tx.send(vec![PathBuf::from("/p/a.rs"), PathBuf::from("/p/.git/HEAD")]).unwrap();

        let recorded = batches.clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = stop_tx.send(());
        });
        let exit = watch(
            changes,
            failures,
            async {
                let _ = stop_rx.await;
            },
            Duration::from_millis(20),
            |batch| {
                recorded.lock().unwrap().push(batch);
                async {}
            },
        )
        .await;
        stopper.await.unwrap();

        assert_eq!(exit, WatchExit::Interrupted);
        assert_eq!(
            *batches.lock().unwrap(),
            vec![vec![PathBuf::from("/p/a.rs"), PathBuf::from("/p/b.rs")]]
        );
    }

    #[tokio::test]
    async fn test_watch_ends_when_tree_fails() {
        let (_change_tx, changes, failure_tx, failures) = channels();
        let mut root = process("tunnel", "sh", &["-c", "exit 1"]);
        root.max_retries = 0;

        let tree = build_tree(&root).unwrap();
        tree.set_failure_handler(move |failure| {
            let _ = failure_tx.send(failure);
        })
        .unwrap();
        tree.start_all().unwrap();

        let exit = tokio::time::timeout(
            Duration::from_secs(10),
            watch(changes, failures, std::future::pending(), Duration::from_millis(20), |_| async {}),
        )
        .await
        .unwrap();
        tree.stop_all();

        let WatchExit::ProcessFailed(failure) = exit else {
            panic!("expected a process failure");
        };
        assert_eq!(failure.node, "tunnel");

        let err = process_failed(failure);
        assert_eq!(crate::exit_codes::for_error(&err), crate::exit_codes::PROCESS_FAILED);
    }

    #[tokio::test]
    async fn test_failure_observed_during_reprocessing() {
        let (change_tx, changes, failure_tx, failures) = channels();
        let started = Arc::new(tokio::sync::Notify::new());

        change_tx.send(vec![PathBuf::from("/p/api/main.rs")]).unwrap();
        let notify = started.clone();
        tokio::spawn(async move {
            notify.notified().await;
            let _ = failure_tx.send(ProcessFailure {
                node: "tunnel".into(),
                reason: "exited with status 1".into(),
            });
        });

        let signal = started.clone();
        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            watch(changes, failures, std::future::pending(), Duration::from_millis(10), |_| {
                signal.notify_one();
                std::future::pending::<()>()
            }),
        )
        .await
        .unwrap();

        assert!(matches!(exit, WatchExit::ProcessFailed(f) if f.node == "tunnel"));
    }

    #[tokio::test]
    async fn test_shutdown_observed_during_reprocessing() {
        let (change_tx, changes, _failure_tx, failures) = channels();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut stop_tx = Some(stop_tx);

        change_tx.send(vec![PathBuf::from("/p/api/main.rs")]).unwrap();
        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            watch(
                changes,
                failures,
                async {
                    let _ = stop_rx.await;
                },
                Duration::from_millis(10),
                |_| {
                    if let Some(tx) = stop_tx.take() {
                        let _ = tx.send(());
                    }
                    std::future::pending::<()>()
                },
            ),
        )
        .await
        .unwrap();

        assert_eq!(exit, WatchExit::Interrupted);
    }

    #[tokio::test]
    async fn test_tree_starts_and_stops() {
        let mut root = process("tunnel", "sleep", &["30"]);
        root.descendants.push(process("sync", "sleep", &["30"]));

        let tree = build_tree(&root).unwrap();
        tree.start_all().unwrap();
        assert_eq!(tree.state(tree.root()).unwrap(), ProcessState::Running);
        assert!(tree.pid(tree.root()).unwrap().is_some());

        tree.stop_all();
        assert_eq!(tree.state(tree.root()).unwrap(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_exhausted_tree_reports_failure() {
        let mut root = process("tunnel", "sh", &["-c", "exit 1"]);
        root.max_retries = 1;
        root.min_timeout_ms = 10;

        let tree = build_tree(&root).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tree.set_failure_handler(move |failure| {
            let _ = tx.send(failure);
        })
        .unwrap();
        tree.start_all().unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.node, "tunnel");
        assert_eq!(tree.start_count(tree.root()).unwrap(), 2);
        assert!(tree.start_all().is_err());
    }

    #[tokio::test]
    async fn test_critical_output_skips_retries() {
        let mut root = process("sync", "sh", &["-c", "echo 'version mismatch'; sleep 30"]);
        root.critical_pattern = Some("version mismatch".into());

        let tree = build_tree(&root).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tree.set_failure_handler(move |failure| {
            let _ = tx.send(failure);
        })
        .unwrap();
        tree.start_all().unwrap();

        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tree.start_count(tree.root()).unwrap(), 1);
        assert_eq!(tree.state(tree.root()).unwrap(), ProcessState::Failed);
    }
}
