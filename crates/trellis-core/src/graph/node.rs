//! Dependency graph node types

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeEntityConfig;

/// The four kinds of work in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Build a module
    Build,
    /// Deploy a service
    Deploy,
    /// Run a task
    Run,
    /// Run a test suite
    Test,
}

impl NodeType {
    /// All node types, in scheduling order
    pub const ALL: [NodeType; 4] = [Self::Build, Self::Deploy, Self::Run, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Run => "run",
            Self::Test => "test",
        }
    }

    /// Name of the configured entity behind nodes of this type
    pub fn entity_kind(&self) -> &'static str {
        match self {
            Self::Build => "module",
            Self::Deploy => "service",
            Self::Run => "task",
            Self::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "build" => Some(Self::Build),
            "deploy" | "service" => Some(Self::Deploy),
            "run" | "task" => Some(Self::Run),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a node: `<type>.<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub node_type: NodeType,
    pub name: String,
}

impl NodeKey {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_type, self.name)
    }
}

/// A node in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_type: NodeType,
    /// Module name for build nodes; entity name otherwise (tests are `<module>.<test>`)
    pub name: String,
    /// Owning module
    pub module_name: String,
    /// Disabled nodes stay in the graph but are excluded from default queries
    pub disabled: bool,
    /// Nodes this node depends on
    pub dependencies: BTreeSet<NodeKey>,
    /// Nodes depending on this node
    pub dependants: BTreeSet<NodeKey>,
}

impl GraphNode {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.node_type, self.name.clone())
    }
}

/// A service, task or test together with its owning module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEntity {
    /// Graph name (tests are `<module>.<test>`)
    pub name: String,
    pub module_name: String,
    /// Effective disabled flag: the entity's own flag or its module's
    pub disabled: bool,
    pub config: RuntimeEntityConfig,
}

/// Test node names are scoped by module
pub fn test_node_name(module: &str, test: &str) -> String {
    format!("{}.{}", module, test)
}
