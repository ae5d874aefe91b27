//! Task graph processor: async executor using tokio
//!
//! Each `process` call discovers the dependency closure of the requested
//! tasks and splits it into independent components. A component holds the
//! keyed lock for all of its keys while it runs, so batches sharing a key are
//! serialized and a key never executes twice at once. Within a component,
//! ready tasks run concurrently under the global and per-type ceilings.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};

use trellis_core::config::TasksConfig;
use trellis_core::KeyedLock;

use crate::cache::ResultCache;
use crate::dag::{PlanNode, TaskPlan};
use crate::error::TaskGraphError;
use crate::reporter::{TaskEvent, TaskInfo, TaskReporter};
use crate::result::{GraphResult, GraphResults};
use crate::state::{BatchState, NodeStatus};
use crate::task::{DependencyResults, Task, TaskType};

/// Reason reported for tasks replaced by a newer submission
pub const SUPERSEDED: &str = "superseded";

/// Options for a single `process` call
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Return an error listing the failed tasks after the batch completes
    pub throw_on_error: bool,
}

/// Schedules and executes task graphs
pub struct TaskGraphProcessor {
    cache: Arc<ResultCache>,
    reporter: Arc<dyn TaskReporter>,
    locks: KeyedLock,
    global: Arc<Semaphore>,
    limits: HashMap<TaskType, Arc<Semaphore>>,
    /// Most recent submission per key
    latest: Mutex<HashMap<String, Submission>>,
    batch_seq: AtomicU64,
}

/// A key's version as of the batch that submitted it
#[derive(Debug, Clone)]
struct Submission {
    seq: u64,
    version: String,
}

struct ComponentOutcome {
    results: BTreeMap<String, Arc<GraphResult>>,
    requested: Vec<String>,
}

impl TaskGraphProcessor {
    pub fn new(config: &TasksConfig, reporter: Arc<dyn TaskReporter>) -> Self {
        let limits = &config.limits;
        let limits: HashMap<TaskType, Arc<Semaphore>> = [
            (TaskType::Build, limits.build),
            (TaskType::Deploy, limits.deploy),
            (TaskType::Run, limits.run),
            (TaskType::Test, limits.test),
        ]
        .into_iter()
        .map(|(t, n)| (t, Arc::new(Semaphore::new(n))))
        .collect();

        Self {
            cache: Arc::new(ResultCache::new()),
            reporter,
            locks: KeyedLock::new(),
            global: Arc::new(Semaphore::new(config.concurrency)),
            limits,
            latest: Mutex::new(HashMap::new()),
            batch_seq: AtomicU64::new(0),
        }
    }

    /// Use a shared result cache
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    fn next_batch(&self) -> (u64, String) {
        let seq = self.batch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        (seq, format!("batch-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), seq))
    }

    fn latest(&self) -> std::sync::MutexGuard<'_, HashMap<String, Submission>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `version` for `key` unless a later batch already submitted the key
    fn submit<'a>(&self, seq: u64, entries: impl IntoIterator<Item = (String, &'a str)>) {
        let mut latest = self.latest();
        for (key, version) in entries {
            let newer = latest.get(&key).is_some_and(|s| s.seq > seq);
            if !newer {
                latest.insert(
                    key,
                    Submission {
                        seq,
                        version: version.to_string(),
                    },
                );
            }
        }
    }

    /// A later batch submitted the key at another version
    fn is_superseded(&self, key: &str, seq: u64, version: &str) -> bool {
        self.latest()
            .get(key)
            .is_some_and(|s| s.seq > seq && s.version != version)
    }

    /// Process a batch of tasks and their dependencies.
    ///
    /// Returns the results of the requested tasks, keyed by task key.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn process(
        &self,
        tasks: Vec<Task>,
        options: ProcessOptions,
    ) -> Result<GraphResults, TaskGraphError> {
        // Submission order is fixed here, before discovery can suspend
        let (seq, batch_id) = self.next_batch();
        self.submit(seq, tasks.iter().map(|t| (t.key(), t.version.as_str())));

        let (plan, superseded) = TaskPlan::discover(tasks).await?;
        self.submit(
            seq,
            plan.nodes
                .iter()
                .filter(|(key, _)| !plan.requested.contains(key))
                .map(|(key, node)| (key.clone(), node.task.version.as_str())),
        );

        self.reporter.report(&TaskEvent::GraphProcessing {
            batch_id: batch_id.clone(),
            started_at: Utc::now(),
            task_count: plan.len(),
        });

        for entry in &superseded {
            debug!(key = %entry.task.key(), by = %entry.by_version, "submission superseded");
            self.reporter.report(&TaskEvent::Cancelled {
                info: TaskInfo::new(&entry.task, &batch_id),
                reason: SUPERSEDED.to_string(),
            });
        }

        let components = plan.partition();
        info!(batch_id = %batch_id, components = components.len(), "processing task graph");

        let outcomes = join_all(
            components
                .into_iter()
                .map(|component| self.process_component(component, seq, &batch_id)),
        )
        .await;

        let mut results = GraphResults::default();
        let (mut succeeded, mut failed, mut cancelled) = (0, 0, 0);
        for outcome in outcomes {
            for result in outcome.results.values() {
                if result.cancelled {
                    cancelled += 1;
                } else if result.is_error() {
                    failed += 1;
                } else {
                    succeeded += 1;
                }
            }
            for key in &outcome.requested {
                if let Some(result) = outcome.results.get(key) {
                    results.insert(result.clone());
                }
            }
        }

        let stats = self.cache.stats();
        debug!(entries = stats.entries, errors = stats.errors, "result cache");

        self.reporter.report(&TaskEvent::GraphComplete {
            batch_id,
            completed_at: Utc::now(),
            succeeded,
            failed,
            cancelled,
        });

        if options.throw_on_error {
            let failures: Vec<String> = results
                .failed()
                .iter()
                .map(|r| format!("{}: {}", r.description, r.error.as_deref().unwrap_or_default()))
                .collect();
            if !failures.is_empty() {
                return Err(TaskGraphError::TasksFailed { failures });
            }
        }

        Ok(results)
    }

    async fn process_component(&self, plan: TaskPlan, seq: u64, batch_id: &str) -> ComponentOutcome {
        let _guard = self.locks.acquire_many(plan.nodes.keys()).await;

        let mut results: BTreeMap<String, Arc<GraphResult>> = BTreeMap::new();

        let mut cached: BTreeSet<&String> = BTreeSet::new();
        for key in &plan.order {
            let task = &plan.nodes[key].task;
            if task.force {
                continue;
            }
            if let Some(hit) = self.cache.get(key, &task.version) {
                results.insert(key.clone(), hit);
                cached.insert(key);
            }
        }

        // Everything not cached that a requested task still needs
        let mut needed: BTreeSet<&String> = BTreeSet::new();
        let mut stack: Vec<&String> = plan
            .requested
            .iter()
            .filter(|k| !cached.contains(k))
            .collect();
        while let Some(key) = stack.pop() {
            if !needed.insert(key) {
                continue;
            }
            for dep in &plan.nodes[key].dependencies {
                if !cached.contains(dep) {
                    stack.push(dep);
                }
            }
        }

        // Cached results are reported when requested or consumed by needed tasks
        let consumed: BTreeSet<&String> = needed
            .iter()
            .flat_map(|k| plan.nodes[*k].dependencies.iter())
            .chain(plan.requested.iter())
            .collect();
        for key in plan.order.iter().filter(|k| cached.contains(k) && consumed.contains(k)) {
            let result = &results[key];
            let info = TaskInfo::new(&plan.nodes[key].task, batch_id);
            match &result.error {
                Some(error) => self.reporter.report(&TaskEvent::Error {
                    info,
                    error: error.clone(),
                    cached: true,
                }),
                None => self.reporter.report(&TaskEvent::Complete {
                    info,
                    result: result.clone(),
                    cached: true,
                }),
            }
        }

        for key in plan.order.iter().filter(|k| needed.contains(k)) {
            self.reporter
                .report(&TaskEvent::Pending(TaskInfo::new(&plan.nodes[key].task, batch_id)));
        }

        let mut state = BatchState::new(
            needed
                .iter()
                .map(|k| ((*k).clone(), plan.nodes[*k].dependencies.clone())),
        );
        let mut in_flight = FuturesUnordered::new();

        // a dependency whose cached result is an error cancels its dependants
        for key in plan.order.iter().filter(|k| needed.contains(k)) {
            let node = &plan.nodes[key];
            let failed_dependency = node
                .dependencies
                .iter()
                .find(|d| cached.contains(d) && results[*d].is_error());
            if let Some(dependency) = failed_dependency {
                if state.status(key) != Some(NodeStatus::Pending) {
                    continue;
                }
                let dependants = state.cancel(key);
                let reason = format!("dependency {} failed", dependency);
                self.record_cancelled(&mut results, node, batch_id, reason);
                for dependant in dependants {
                    let reason = format!("dependency {} failed", key);
                    self.record_cancelled(&mut results, &plan.nodes[&dependant], batch_id, reason);
                }
            }
        }

        loop {
            for key in state.take_ready() {
                let node = &plan.nodes[&key];
                if self.is_superseded(&key, seq, &node.task.version) {
                    let dependants = state.cancel(&key);
                    self.record_cancelled(&mut results, node, batch_id, SUPERSEDED.to_string());
                    for dependant in dependants {
                        let reason = format!("dependency {} was superseded", key);
                        self.record_cancelled(&mut results, &plan.nodes[&dependant], batch_id, reason);
                    }
                    continue;
                }

                let dependencies: DependencyResults = node
                    .dependencies
                    .iter()
                    .filter_map(|d| results.get(d).map(|r| (d.clone(), r.clone())))
                    .collect();
                in_flight.push(self.execute(node.task.clone(), batch_id, dependencies));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };

            let result = Arc::new(result);
            let key = result.key.clone();
            self.cache.put(result.clone());
            let info = TaskInfo::new(&plan.nodes[&key].task, batch_id);

            match &result.error {
                Some(error) => {
                    self.reporter.report(&TaskEvent::Error {
                        info,
                        error: error.clone(),
                        cached: false,
                    });
                    results.insert(key.clone(), result.clone());
                    for dependant in state.fail(&key) {
                        let reason = format!("dependency {} failed", key);
                        self.record_cancelled(&mut results, &plan.nodes[&dependant], batch_id, reason);
                    }
                }
                None => {
                    self.reporter.report(&TaskEvent::Complete {
                        info,
                        result: result.clone(),
                        cached: false,
                    });
                    results.insert(key.clone(), result.clone());
                    state.complete(&key);
                }
            }
        }

        debug_assert!(state.is_finished());
        debug!(
            complete = state.count(NodeStatus::Complete),
            failed = state.count(NodeStatus::Failed),
            cancelled = state.count(NodeStatus::Cancelled),
            "component finished"
        );

        ComponentOutcome {
            results,
            requested: plan.requested.clone(),
        }
    }

    fn record_cancelled(
        &self,
        results: &mut BTreeMap<String, Arc<GraphResult>>,
        node: &PlanNode,
        batch_id: &str,
        reason: String,
    ) {
        let result = Arc::new(GraphResult::cancelled(&node.task, batch_id));
        results.insert(result.key.clone(), result);
        self.reporter.report(&TaskEvent::Cancelled {
            info: TaskInfo::new(&node.task, batch_id),
            reason,
        });
    }

    async fn permits(
        &self,
        task_type: TaskType,
    ) -> Result<(Option<OwnedSemaphorePermit>, OwnedSemaphorePermit), tokio::sync::AcquireError> {
        let type_permit = match self.limits.get(&task_type) {
            Some(semaphore) => Some(semaphore.clone().acquire_owned().await?),
            None => None,
        };
        let global_permit = self.global.clone().acquire_owned().await?;
        Ok((type_permit, global_permit))
    }

    async fn execute(&self, task: Task, batch_id: &str, dependencies: DependencyResults) -> GraphResult {
        let permits = self.permits(task.task_type).await;
        let started_at = Utc::now();

        let outcome = match permits {
            Ok(_permits) => {
                self.reporter
                    .report(&TaskEvent::Processing(TaskInfo::new(&task, batch_id)));
                task.handler
                    .process(&dependencies)
                    .await
                    .map_err(|e| format!("{:#}", e))
            }
            Err(e) => Err(format!("concurrency limiter unavailable: {}", e)),
        };

        GraphResult::processed(&task, batch_id, started_at, outcome, dependencies)
    }
}
