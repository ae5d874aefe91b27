//! Supervised process tree
//!
//! A failing node stops its subtree, waits `min_timeout` and restarts the
//! subtree with one retry less. Healthy output restores the full budget.
//! When a node fails with no retries left, or emits output its critical
//! classifier matches, the whole tree stops for good and the failure handler
//! runs once.
//!
//! Every start bumps the node's generation. Events carry the generation they
//! were produced under and are dropped when it no longer matches, so output
//! from a killed process can never act on a restarted or stopped node.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{Result, SupervisorError};
use crate::spawner::{ProcessEvent, ProcessSpawner, TokioSpawner};
use crate::state::ProcessState;

/// Handle to a node within one tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Passed to the failure handler when the tree fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    /// Name of the node that failed
    pub node: String,
    pub reason: String,
}

type FailureHandler = Arc<dyn Fn(ProcessFailure) + Send + Sync>;

struct Node {
    config: NodeConfig,
    children: Vec<NodeId>,
    state: ProcessState,
    retries_left: u32,
    generation: u64,
    starts: u32,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

impl Node {
    fn transition(&mut self, to: ProcessState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(SupervisorError::InvalidTransition {
                node: self.config.name.clone(),
                from: self.state,
                to,
            });
        }
        debug!(node = %self.config.name, from = %self.state, to = %to, "process state transition");
        self.state = to;
        Ok(())
    }

    /// Kill the current process and invalidate its pending events
    fn halt(&mut self) {
        self.generation += 1;
        self.pid = None;
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

#[derive(Default)]
struct TreeState {
    nodes: Vec<Node>,
    /// Name of the node that failed the tree
    failed: Option<String>,
    handler_called: bool,
}

impl TreeState {
    /// Node and all its descendants, parents before children
    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut ids = vec![root];
        let mut i = 0;
        while i < ids.len() {
            ids.extend(self.nodes[ids[i].0].children.iter().copied());
            i += 1;
        }
        ids
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(SupervisorError::UnknownNode(id.0))
    }
}

enum Verdict {
    Healthy,
    Failed(String),
    Critical(String),
}

struct Inner {
    spawner: Arc<dyn ProcessSpawner>,
    state: Mutex<TreeState>,
    failure_handler: OnceLock<FailureHandler>,
}

/// A tree of supervised processes.
///
/// Cloning gives another handle to the same tree.
#[derive(Clone)]
pub struct ProcessTree {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.inner.lock();
        f.debug_struct("ProcessTree")
            .field("nodes", &tree.nodes.len())
            .field("failed", &tree.failed)
            .finish_non_exhaustive()
    }
}

impl ProcessTree {
    /// Create a tree whose processes are spawned with `tokio::process`
    pub fn new(root: NodeConfig) -> Self {
        Self::with_spawner(root, Arc::new(TokioSpawner))
    }

    pub fn with_spawner(root: NodeConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let mut state = TreeState::default();
        state.nodes.push(new_node(root));
        Self {
            inner: Arc::new(Inner {
                spawner,
                state: Mutex::new(state),
                failure_handler: OnceLock::new(),
            }),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Attach children to a node that has not started yet
    pub fn add_descendants(
        &self,
        parent: NodeId,
        children: impl IntoIterator<Item = NodeConfig>,
    ) -> Result<Vec<NodeId>> {
        let mut tree = self.inner.lock();
        let node = tree.node(parent)?;
        if node.state != ProcessState::Runnable {
            return Err(SupervisorError::NotRunnable {
                node: node.config.name.clone(),
                state: node.state,
            });
        }

        let mut ids = Vec::new();
        for config in children {
            let id = NodeId(tree.nodes.len());
            tree.nodes.push(new_node(config));
            tree.nodes[parent.0].children.push(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Set the handler called when the tree fails. Can only be set once.
    pub fn set_failure_handler(&self, handler: impl Fn(ProcessFailure) + Send + Sync + 'static) -> Result<()> {
        self.inner
            .failure_handler
            .set(Arc::new(handler))
            .map_err(|_| SupervisorError::FailureHandlerAlreadySet)
    }

    /// Start every runnable node, parents first.
    ///
    /// Fails if the tree has failed. Calling it again only starts nodes
    /// added since.
    pub fn start_all(&self) -> Result<()> {
        let mut tree = self.inner.lock();
        if let Some(node) = &tree.failed {
            return Err(SupervisorError::TreeFailed { node: node.clone() });
        }

        for id in tree.subtree(self.root()) {
            if tree.nodes[id.0].state == ProcessState::Runnable {
                self.inner.launch(&mut tree, id);
            }
        }
        Ok(())
    }

    /// Kill every process and stop the tree for good.
    ///
    /// Failed nodes stay failed.
    pub fn stop_all(&self) {
        let mut tree = self.inner.lock();
        for node in &mut tree.nodes {
            node.halt();
            if !node.state.is_final() {
                let _ = node.transition(ProcessState::Stopped);
            }
        }
        info!("process tree stopped");
    }

    pub fn state(&self, id: NodeId) -> Result<ProcessState> {
        Ok(self.inner.lock().node(id)?.state)
    }

    pub fn retries_left(&self, id: NodeId) -> Result<u32> {
        Ok(self.inner.lock().node(id)?.retries_left)
    }

    /// How many times the node's process was started
    pub fn start_count(&self, id: NodeId) -> Result<u32> {
        Ok(self.inner.lock().node(id)?.starts)
    }

    pub fn pid(&self, id: NodeId) -> Result<Option<u32>> {
        Ok(self.inner.lock().node(id)?.pid)
    }

    pub fn is_failed(&self) -> bool {
        self.inner.lock().failed.is_some()
    }
}

fn new_node(config: NodeConfig) -> Node {
    Node {
        retries_left: config.retry.max_retries,
        config,
        children: Vec::new(),
        state: ProcessState::Runnable,
        generation: 0,
        starts: 0,
        pid: None,
        kill: None,
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn launch(self: &Arc<Self>, tree: &mut TreeState, id: NodeId) {
        let node = &mut tree.nodes[id.0];
        if let Err(e) = node.transition(ProcessState::Running) {
            warn!(error = %e, "not starting process");
            return;
        }
        node.generation += 1;
        node.starts += 1;
        let generation = node.generation;

        let events = match self.spawner.spawn(&node.config.spec) {
            Ok(process) => {
                info!(node = %node.config.name, pid = process.pid, generation, "process started");
                node.pid = process.pid;
                node.kill = Some(process.kill);
                process.events
            }
            Err(e) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(ProcessEvent::Error(format!(
                    "failed to start '{}': {}",
                    node.config.spec.command, e
                )));
                rx
            }
        };

        let inner = self.clone();
        tokio::spawn(async move { inner.monitor(id, generation, events).await });
    }

    async fn monitor(
        self: Arc<Self>,
        id: NodeId,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(id, generation, event) {
                break;
            }
        }
    }

    /// Returns whether to keep listening
    fn handle_event(self: &Arc<Self>, id: NodeId, generation: u64, event: ProcessEvent) -> bool {
        let failure = {
            let mut tree = self.lock();
            let node = &tree.nodes[id.0];
            if node.generation != generation || node.state != ProcessState::Running {
                debug!(node = %node.config.name, generation, "ignoring stale process event");
                return false;
            }

            let verdict = match event {
                ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => match node.config.classify(&line) {
                    (_, true) => Verdict::Critical(line),
                    (true, false) => Verdict::Failed(line),
                    (false, false) => Verdict::Healthy,
                },
                ProcessEvent::Exit(code) => Verdict::Failed(match code {
                    Some(code) => format!("process exited with code {}", code),
                    None => "process was terminated".to_string(),
                }),
                ProcessEvent::Error(message) => Verdict::Failed(message),
            };

            match verdict {
                Verdict::Healthy => {
                    for sub in tree.subtree(id) {
                        let node = &mut tree.nodes[sub.0];
                        node.retries_left = node.config.retry.max_retries;
                    }
                    return true;
                }
                Verdict::Failed(reason) => self.fail(&mut tree, id, reason, false),
                Verdict::Critical(reason) => self.fail(&mut tree, id, reason, true),
            }
        };

        if let Some(failure) = failure {
            match self.failure_handler.get() {
                Some(handler) => handler(failure),
                None => error!(node = %failure.node, reason = %failure.reason, "process tree failed"),
            }
        }
        false
    }

    /// Handle a node failure. Returns the failure to report when the tree
    /// has failed for the first time.
    fn fail(self: &Arc<Self>, tree: &mut TreeState, id: NodeId, reason: String, critical: bool) -> Option<ProcessFailure> {
        let name = tree.nodes[id.0].config.name.clone();
        let retries_left = tree.nodes[id.0].retries_left;

        if critical || retries_left == 0 {
            error!(node = %name, reason = %reason, critical, "process failed permanently, stopping tree");
            for (index, node) in tree.nodes.iter_mut().enumerate() {
                node.halt();
                let to = if index == id.0 {
                    ProcessState::Failed
                } else {
                    ProcessState::Stopped
                };
                if !node.state.is_final() {
                    let _ = node.transition(to);
                }
            }
            tree.failed = Some(name.clone());

            if tree.handler_called {
                return None;
            }
            tree.handler_called = true;
            return Some(ProcessFailure { node: name, reason });
        }

        tree.nodes[id.0].retries_left -= 1;
        for sub in tree.subtree(id) {
            let node = &mut tree.nodes[sub.0];
            node.halt();
            if node.state == ProcessState::Running {
                let _ = node.transition(ProcessState::Retrying);
            }
        }

        let node = &tree.nodes[id.0];
        let epoch = node.generation;
        let delay = node.config.retry.min_timeout();
        warn!(
            node = %name,
            reason = %reason,
            retries_left = node.retries_left,
            delay_ms = delay.as_millis() as u64,
            "process failed, restarting subtree"
        );

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.restart(id, epoch);
        });
        None
    }

    fn restart(self: &Arc<Self>, id: NodeId, epoch: u64) {
        let mut tree = self.lock();
        let node = &tree.nodes[id.0];
        if tree.failed.is_some() || node.generation != epoch || node.state != ProcessState::Retrying {
            debug!(node = %node.config.name, "skipping stale restart");
            return;
        }

        for sub in tree.subtree(id) {
            if tree.nodes[sub.0].state == ProcessState::Retrying {
                self.launch(&mut tree, sub);
            }
        }
    }
}
