//! Dependency graph over build, deploy, run and test nodes
//!
//! The graph is built once per configuration snapshot and is read-only
//! afterwards. Structural changes require constructing a new graph.

pub mod cycles;
mod node;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::{ModuleConfig, RuntimeEntityConfig};
use crate::error::{ConfigError, GraphError, Result};

pub use node::{test_node_name, GraphNode, NodeKey, NodeType, RuntimeEntity};

/// Dependency graph for a project's modules, services, tasks and tests
#[derive(Debug, Clone)]
pub struct ConfigGraph {
    modules: BTreeMap<String, ModuleConfig>,
    services: BTreeMap<String, RuntimeEntity>,
    tasks: BTreeMap<String, RuntimeEntity>,
    tests: BTreeMap<String, RuntimeEntity>,
    nodes: BTreeMap<NodeKey, GraphNode>,
    /// Module names, build dependencies first
    build_order: Vec<String>,
}

/// Related entities grouped by node type
#[derive(Debug, Default)]
pub struct DependencyRelations<'a> {
    pub build: Vec<&'a ModuleConfig>,
    pub deploy: Vec<&'a RuntimeEntity>,
    pub run: Vec<&'a RuntimeEntity>,
    pub test: Vec<&'a RuntimeEntity>,
}

impl DependencyRelations<'_> {
    pub fn is_empty(&self) -> bool {
        self.build.is_empty() && self.deploy.is_empty() && self.run.is_empty() && self.test.is_empty()
    }

    /// Node keys of every related entity
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self
            .build
            .iter()
            .map(|m| NodeKey::new(NodeType::Build, m.name.clone()))
            .collect();
        keys.extend(self.deploy.iter().map(|e| NodeKey::new(NodeType::Deploy, e.name.clone())));
        keys.extend(self.run.iter().map(|e| NodeKey::new(NodeType::Run, e.name.clone())));
        keys.extend(self.test.iter().map(|e| NodeKey::new(NodeType::Test, e.name.clone())));
        keys
    }
}

/// Serializable view of the graph
#[derive(Debug, Clone, Serialize)]
pub struct RenderedGraph {
    pub nodes: Vec<RenderedNode>,
    pub relationships: Vec<RenderedEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedNode {
    pub key: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    pub module_name: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedEdge {
    pub dependant: String,
    pub dependency: String,
}

impl ConfigGraph {
    /// Build the graph from module configurations.
    ///
    /// Fails on duplicate names, unresolvable references and circular
    /// dependencies. No partial graph is ever returned.
    #[instrument(skip_all, fields(modules = modules.len()))]
    pub fn build(modules: Vec<ModuleConfig>) -> Result<Self> {
        let mut module_map: BTreeMap<String, ModuleConfig> = BTreeMap::new();
        let mut services: BTreeMap<String, RuntimeEntity> = BTreeMap::new();
        let mut tasks: BTreeMap<String, RuntimeEntity> = BTreeMap::new();
        let mut tests: BTreeMap<String, RuntimeEntity> = BTreeMap::new();

        for module in modules {
            if module_map.contains_key(&module.name) {
                return Err(ConfigError::DuplicateModule {
                    name: module.name.clone(),
                }
                .into());
            }

            for service in &module.services {
                register_entity(&mut services, "Service", &module, service, service.name.clone())?;
            }
            for task in &module.tasks {
                register_entity(&mut tasks, "Task", &module, task, task.name.clone())?;
            }
            for test in &module.tests {
                let name = test_node_name(&module.name, &test.name);
                register_entity(&mut tests, "Test", &module, test, name)?;
            }

            module_map.insert(module.name.clone(), module);
        }

        for (name, service) in &services {
            if let Some(task) = tasks.get(name) {
                return Err(ConfigError::ServiceTaskConflict {
                    name: name.clone(),
                    service_module: service.module_name.clone(),
                    task_module: task.module_name.clone(),
                }
                .into());
            }
        }

        let mut nodes: BTreeMap<NodeKey, GraphNode> = BTreeMap::new();

        for module in module_map.values() {
            let mut node = new_node(NodeType::Build, &module.name, &module.name, module.disabled);
            for dep in &module.build.dependencies {
                if !module_map.contains_key(&dep.name) {
                    return Err(GraphError::MissingBuildDependency {
                        module: module.name.clone(),
                        dependency: dep.name.clone(),
                    }
                    .into());
                }
                node.dependencies
                    .insert(NodeKey::new(NodeType::Build, dep.name.clone()));
            }
            nodes.insert(node.key(), node);
        }

        for (node_type, entities) in [
            (NodeType::Deploy, &services),
            (NodeType::Run, &tasks),
            (NodeType::Test, &tests),
        ] {
            for entity in entities.values() {
                let mut node = new_node(node_type, &entity.name, &entity.module_name, entity.disabled);
                node.dependencies
                    .insert(NodeKey::new(NodeType::Build, entity.module_name.clone()));

                for dep in &entity.config.dependencies {
                    let target = if let Some(service) = services.get(dep) {
                        (NodeKey::new(NodeType::Deploy, dep.clone()), service.disabled)
                    } else if let Some(task) = tasks.get(dep) {
                        (NodeKey::new(NodeType::Run, dep.clone()), task.disabled)
                    } else {
                        return Err(GraphError::MissingRuntimeDependency {
                            kind: node_type.entity_kind(),
                            name: entity.name.clone(),
                            dependency: dep.clone(),
                        }
                        .into());
                    };

                    let (key, disabled) = target;
                    if disabled {
                        debug!(dependant = %node.key(), dependency = %key, "dropping edge to disabled dependency");
                        continue;
                    }
                    node.dependencies.insert(key);
                }

                nodes.insert(node.key(), node);
            }
        }

        let edges: Vec<(NodeKey, NodeKey)> = nodes
            .values()
            .flat_map(|n| n.dependencies.iter().map(move |d| (n.key(), d.clone())))
            .collect();
        for (dependant, dependency) in edges {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.dependants.insert(dependant);
            }
        }

        let build_deps: BTreeMap<String, BTreeSet<String>> = module_map
            .values()
            .map(|m| {
                (
                    m.name.clone(),
                    m.build.dependencies.iter().map(|d| d.name.clone()).collect(),
                )
            })
            .collect();

        let build_order = match cycles::topological_sort(&build_deps) {
            Ok(order) => order,
            Err(leftover) => {
                let path = cycles::find_cycle(&build_deps).unwrap_or(leftover);
                return Err(GraphError::CircularDependency { kind: "build", path }.into());
            }
        };

        let runtime_deps: BTreeMap<NodeKey, BTreeSet<NodeKey>> = nodes
            .values()
            .filter(|n| n.node_type != NodeType::Build)
            .map(|n| {
                (
                    n.key(),
                    n.dependencies
                        .iter()
                        .filter(|d| d.node_type != NodeType::Build)
                        .cloned()
                        .collect(),
                )
            })
            .collect();

        if let Some(cycle) = cycles::find_cycle(&runtime_deps) {
            return Err(GraphError::CircularDependency {
                kind: "runtime",
                path: cycle.iter().map(|k| k.to_string()).collect(),
            }
            .into());
        }

        info!(
            modules = module_map.len(),
            services = services.len(),
            tasks = tasks.len(),
            tests = tests.len(),
            "dependency graph built"
        );

        Ok(Self {
            modules: module_map,
            services,
            tasks,
            tests,
            nodes,
            build_order,
        })
    }

    /// Get a single module
    pub fn get_module(&self, name: &str, include_disabled: bool) -> Result<&ModuleConfig> {
        let names = [name.to_string()];
        Ok(self.get_modules(Some(&names[..]), include_disabled)?[0])
    }

    /// Get modules, optionally filtered by name
    pub fn get_modules(
        &self,
        names: Option<&[String]>,
        include_disabled: bool,
    ) -> Result<Vec<&ModuleConfig>> {
        pick("module", &self.modules, names, include_disabled, |m| m.disabled)
    }

    /// Get services, optionally filtered by name
    pub fn get_services(
        &self,
        names: Option<&[String]>,
        include_disabled: bool,
    ) -> Result<Vec<&RuntimeEntity>> {
        pick("service", &self.services, names, include_disabled, |e| e.disabled)
    }

    /// Get tasks, optionally filtered by name
    pub fn get_tasks(
        &self,
        names: Option<&[String]>,
        include_disabled: bool,
    ) -> Result<Vec<&RuntimeEntity>> {
        pick("task", &self.tasks, names, include_disabled, |e| e.disabled)
    }

    /// Get tests, optionally filtered by `<module>.<test>` name
    pub fn get_tests(
        &self,
        names: Option<&[String]>,
        include_disabled: bool,
    ) -> Result<Vec<&RuntimeEntity>> {
        pick("test", &self.tests, names, include_disabled, |e| e.disabled)
    }

    /// Get the entity behind a runtime node
    pub fn get_entity(&self, node_type: NodeType, name: &str) -> Option<&RuntimeEntity> {
        match node_type {
            NodeType::Build => None,
            NodeType::Deploy => self.services.get(name),
            NodeType::Run => self.tasks.get(name),
            NodeType::Test => self.tests.get(name),
        }
    }

    /// Get a raw graph node
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    /// Module names in build-dependency order (dependencies first)
    pub fn build_order(&self) -> &[String] {
        &self.build_order
    }

    /// Get the dependencies of a node.
    ///
    /// Build dependencies always include disabled modules. Edges to disabled
    /// services and tasks were dropped at construction, so runtime traversal
    /// never reaches them or their own dependencies.
    pub fn get_dependencies(
        &self,
        node_type: NodeType,
        name: &str,
        recursive: bool,
    ) -> Result<DependencyRelations<'_>> {
        let start = self.require_node(node_type, name)?;
        let keys = self.traverse(start, recursive, |n| &n.dependencies, |_| true);
        Ok(self.relations(keys))
    }

    /// Get the nodes that depend on a node.
    ///
    /// Traversal stops at disabled runtime nodes: they are neither returned
    /// nor crossed.
    pub fn get_dependants(
        &self,
        node_type: NodeType,
        name: &str,
        recursive: bool,
    ) -> Result<DependencyRelations<'_>> {
        let start = self.require_node(node_type, name)?;
        let keys = self.traverse(start, recursive, |n| &n.dependants, |n| {
            n.node_type == NodeType::Build || !n.disabled
        });
        Ok(self.relations(keys))
    }

    /// Get everything depending on a module's build
    pub fn get_dependants_for_module(
        &self,
        module: &str,
        recursive: bool,
    ) -> Result<DependencyRelations<'_>> {
        self.get_dependants(NodeType::Build, module, recursive)
    }

    /// Names of every module whose build (transitively) depends on one of the given modules
    pub fn get_build_dependants_for_modules(&self, modules: &[String]) -> Result<BTreeSet<String>> {
        let mut result = BTreeSet::new();
        for module in modules {
            let relations = self.get_dependants_for_module(module, true)?;
            result.extend(relations.build.iter().map(|m| m.name.clone()));
        }
        Ok(result)
    }

    fn require_node(&self, node_type: NodeType, name: &str) -> Result<&GraphNode> {
        self.nodes
            .get(&NodeKey::new(node_type, name))
            .ok_or_else(|| {
                GraphError::NotFound {
                    kind: node_type.entity_kind(),
                    names: name.to_string(),
                }
                .into()
            })
    }

    fn traverse<'a>(
        &'a self,
        start: &'a GraphNode,
        recursive: bool,
        edges: impl Fn(&'a GraphNode) -> &'a BTreeSet<NodeKey>,
        include: impl Fn(&GraphNode) -> bool,
    ) -> Vec<&'a NodeKey> {
        let mut seen: BTreeSet<&NodeKey> = BTreeSet::new();
        let mut found: Vec<&NodeKey> = Vec::new();
        let mut queue: VecDeque<&GraphNode> = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for key in edges(current) {
                if !seen.insert(key) {
                    continue;
                }
                let Some(node) = self.nodes.get(key) else {
                    continue;
                };
                if !include(node) {
                    continue;
                }
                found.push(key);
                if recursive {
                    queue.push_back(node);
                }
            }
        }

        found
    }

    fn relations(&self, keys: Vec<&NodeKey>) -> DependencyRelations<'_> {
        let mut relations = DependencyRelations::default();
        for key in keys {
            match key.node_type {
                NodeType::Build => {
                    if let Some(module) = self.modules.get(&key.name) {
                        relations.build.push(module);
                    }
                }
                NodeType::Deploy => relations.deploy.extend(self.services.get(&key.name)),
                NodeType::Run => relations.run.extend(self.tasks.get(&key.name)),
                NodeType::Test => relations.test.extend(self.tests.get(&key.name)),
            }
        }
        relations
    }

    /// Render every node and edge
    pub fn render(&self) -> RenderedGraph {
        let nodes = self
            .nodes
            .values()
            .map(|n| RenderedNode {
                key: n.key().to_string(),
                node_type: n.node_type,
                name: n.name.clone(),
                module_name: n.module_name.clone(),
                disabled: n.disabled,
            })
            .collect();

        let relationships = self
            .nodes
            .values()
            .flat_map(|n| {
                n.dependencies.iter().map(move |d| RenderedEdge {
                    dependant: n.key().to_string(),
                    dependency: d.to_string(),
                })
            })
            .collect();

        RenderedGraph {
            nodes,
            relationships,
        }
    }

    /// Human-readable dependency listing
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for node in self.nodes.values() {
            let marker = if node.disabled { " (disabled)" } else { "" };
            if node.dependencies.is_empty() {
                out.push_str(&format!("  {}{}\n", node.key(), marker));
            } else {
                let deps: Vec<String> = node.dependencies.iter().map(|d| d.to_string()).collect();
                out.push_str(&format!(
                    "  {}{} (after: {})\n",
                    node.key(),
                    marker,
                    deps.join(", ")
                ));
            }
        }
        out
    }
}

fn new_node(node_type: NodeType, name: &str, module_name: &str, disabled: bool) -> GraphNode {
    GraphNode {
        node_type,
        name: name.to_string(),
        module_name: module_name.to_string(),
        disabled,
        dependencies: BTreeSet::new(),
        dependants: BTreeSet::new(),
    }
}

fn register_entity(
    map: &mut BTreeMap<String, RuntimeEntity>,
    kind: &'static str,
    module: &ModuleConfig,
    config: &RuntimeEntityConfig,
    name: String,
) -> Result<()> {
    if let Some(existing) = map.get(&name) {
        return Err(ConfigError::DuplicateName {
            kind,
            name,
            first_module: existing.module_name.clone(),
            second_module: module.name.clone(),
        }
        .into());
    }

    map.insert(
        name.clone(),
        RuntimeEntity {
            name,
            module_name: module.name.clone(),
            disabled: module.disabled || config.disabled,
            config: config.clone(),
        },
    );
    Ok(())
}

fn pick<'a, T>(
    kind: &'static str,
    map: &'a BTreeMap<String, T>,
    names: Option<&[String]>,
    include_disabled: bool,
    is_disabled: impl Fn(&T) -> bool,
) -> Result<Vec<&'a T>> {
    let Some(names) = names else {
        return Ok(map
            .values()
            .filter(|v| include_disabled || !is_disabled(v))
            .collect());
    };

    let missing: Vec<&str> = names
        .iter()
        .filter(|n| !map.contains_key(n.as_str()))
        .map(|n| n.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(GraphError::NotFound {
            kind,
            names: missing.join(", "),
        }
        .into());
    }

    let mut found = Vec::with_capacity(names.len());
    for name in names {
        let Some(value) = map.get(name.as_str()) else {
            continue;
        };
        if !include_disabled && is_disabled(value) {
            return Err(GraphError::Disabled {
                kind,
                name: name.clone(),
            }
            .into());
        }
        found.push(value);
    }
    Ok(found)
}
