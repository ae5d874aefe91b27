//! Task graph discovery and partitioning
//!
//! Requested tasks resolve their own dependencies, recursively. The result is
//! a plan: one node per key, with dependency and dependant edges, plus the
//! order in which nodes were first completed by the depth-first walk.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument};

use crate::error::TaskGraphError;
use crate::task::Task;

/// A node in a task plan
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub task: Task,
    /// Keys this node depends on
    pub dependencies: BTreeSet<String>,
    /// Keys depending on this node
    pub dependants: BTreeSet<String>,
}

/// Tasks to process, keyed by work item key
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    pub nodes: BTreeMap<String, PlanNode>,
    /// Requested keys, in submission order
    pub requested: Vec<String>,
    /// Depth-first post-order over the requested tasks: dependencies first
    pub order: Vec<String>,
}

/// Requested tasks superseded by a later submission of the same key
#[derive(Debug, Clone)]
pub struct Superseded {
    pub task: Task,
    pub by_version: String,
}

impl TaskPlan {
    /// Discover the full dependency closure of the requested tasks.
    ///
    /// Tasks sharing a key are deduplicated, last submitted wins. Earlier
    /// submissions with a different version are returned as superseded.
    /// Repeated submissions of a key get a numeric id suffix so every id in
    /// the batch is unique.
    #[instrument(skip_all, fields(requested = tasks.len()))]
    pub async fn discover(tasks: Vec<Task>) -> Result<(Self, Vec<Superseded>), TaskGraphError> {
        let mut latest: HashMap<String, Task> = HashMap::new();
        let mut requested: Vec<String> = Vec::new();
        let mut superseded = Vec::new();

        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for mut task in tasks {
            let key = task.key();
            let seen = occurrences.entry(key.clone()).or_insert(0);
            *seen += 1;
            if *seen > 1 && task.id_suffix.is_none() {
                task = task.with_id_suffix(seen.to_string());
            }
            if let Some(previous) = latest.insert(key.clone(), task.clone()) {
                if previous.version != task.version {
                    superseded.push(Superseded {
                        task: previous,
                        by_version: task.version.clone(),
                    });
                }
                requested.retain(|k| k != &key);
            }
            requested.push(key);
        }

        let mut walk = Walk {
            overrides: latest,
            nodes: BTreeMap::new(),
            order: Vec::new(),
        };

        for key in &requested {
            if let Some(task) = walk.overrides.get(key).cloned() {
                let mut stack = Vec::new();
                walk.visit(task, &mut stack).await?;
            }
        }

        let mut nodes = walk.nodes;
        let edges: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|(key, node)| node.dependencies.iter().map(move |d| (key.clone(), d.clone())))
            .collect();
        for (dependant, dependency) in edges {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.dependants.insert(dependant);
            }
        }

        debug!(nodes = nodes.len(), "task graph discovered");
        Ok((
            Self {
                nodes,
                requested,
                order: walk.order,
            },
            superseded,
        ))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Split the plan into connected components.
    ///
    /// Components share no keys and can be processed independently.
    pub fn partition(self) -> Vec<TaskPlan> {
        let keys: Vec<&String> = self.nodes.keys().collect();
        let index: HashMap<&String, usize> = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let mut sets = DisjointSets::new(keys.len());

        for (key, node) in &self.nodes {
            for dep in &node.dependencies {
                if let (Some(&a), Some(&b)) = (index.get(key), index.get(dep)) {
                    sets.union(a, b);
                }
            }
        }

        let mut components: BTreeMap<usize, TaskPlan> = BTreeMap::new();
        let mut component_of: HashMap<String, usize> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            component_of.insert((*key).clone(), sets.find(i));
        }

        let TaskPlan {
            nodes,
            requested,
            order,
        } = self;

        // Number components by first appearance in the walk order
        let mut numbering: HashMap<usize, usize> = HashMap::new();
        for key in &order {
            if let Some(root) = component_of.get(key) {
                let next = numbering.len();
                numbering.entry(*root).or_insert(next);
            }
        }

        let slot = |key: &String| -> usize {
            component_of
                .get(key)
                .and_then(|root| numbering.get(root))
                .copied()
                .unwrap_or(usize::MAX)
        };

        for (key, node) in nodes {
            components
                .entry(slot(&key))
                .or_default()
                .nodes
                .insert(key, node);
        }
        for key in requested {
            components.entry(slot(&key)).or_default().requested.push(key);
        }
        for key in order {
            components.entry(slot(&key)).or_default().order.push(key);
        }

        components.into_values().collect()
    }
}

struct Walk {
    /// Requested tasks take precedence over dependencies with the same key
    overrides: HashMap<String, Task>,
    nodes: BTreeMap<String, PlanNode>,
    order: Vec<String>,
}

impl Walk {
    fn visit<'a>(
        &'a mut self,
        task: Task,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<(), TaskGraphError>> {
        async move {
            let key = task.key();

            if let Some(pos) = stack.iter().position(|k| k == &key) {
                let mut path: Vec<String> = stack[pos..].to_vec();
                path.push(key);
                return Err(TaskGraphError::CircularDependency { path });
            }
            if self.nodes.contains_key(&key) {
                return Ok(());
            }

            let dependencies = task.handler.resolve_dependencies().await.map_err(|e| {
                TaskGraphError::DependencyResolution {
                    key: key.clone(),
                    message: format!("{:#}", e),
                }
            })?;

            stack.push(key.clone());
            let mut dependency_keys = BTreeSet::new();
            for dependency in dependencies {
                let dep_key = dependency.key();
                let dependency = self.overrides.get(&dep_key).cloned().unwrap_or(dependency);
                dependency_keys.insert(dep_key);
                self.visit(dependency, stack).await?;
            }
            stack.pop();

            self.nodes.insert(
                key.clone(),
                PlanNode {
                    task,
                    dependencies: dependency_keys,
                    dependants: BTreeSet::new(),
                },
            );
            self.order.push(key);
            Ok(())
        }
        .boxed()
    }
}

/// Union-find over node indices
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = i;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}
