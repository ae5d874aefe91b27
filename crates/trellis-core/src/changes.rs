//! Change detection: mapping changed files to affected modules

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::defaults;
use crate::error::Result;
use crate::graph::ConfigGraph;

/// A module affected by a set of file changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedModule {
    /// Module name
    pub name: String,
    /// Module path
    pub path: PathBuf,
    /// Files that changed in this module
    pub changed_files: Vec<PathBuf>,
    /// Reason for inclusion
    pub change_reason: ChangeReason,
}

/// Reason why a module is considered changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeReason {
    /// Files inside the module changed
    DirectChanges,
    /// A module it builds on changed
    DependencyChanged(String),
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectChanges => write!(f, "direct changes"),
            Self::DependencyChanged(dep) => write!(f, "dependency '{}' changed", dep),
        }
    }
}

/// Result of change detection
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// A project configuration file changed
    pub config_changed: bool,
    /// Affected modules, sorted by name
    pub modules: Vec<ChangedModule>,
    /// Changed files outside every module
    pub unmatched: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.config_changed && self.modules.is_empty()
    }
}

/// Change detector for project modules
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    /// Include modules whose build depends on a changed module
    include_transitive: bool,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            include_transitive: true,
        }
    }

    /// Set whether to include transitive build dependants
    pub fn with_transitive(mut self, include: bool) -> Self {
        self.include_transitive = include;
        self
    }

    /// Whether a path names a project configuration file
    pub fn is_config_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(defaults::is_config_file_name)
            .unwrap_or(false)
    }

    /// Determine which modules are affected by changes to the given files
    pub fn detect_changes(&self, graph: &ConfigGraph, changed_files: &[PathBuf]) -> Result<ChangeSet> {
        debug!(
            changed_files = changed_files.len(),
            transitive = self.include_transitive,
            "detecting changed modules"
        );

        let mut set = ChangeSet::default();
        let mut changed: BTreeMap<String, ChangedModule> = BTreeMap::new();
        let modules = graph.get_modules(None, true)?;

        for file in changed_files {
            if Self::is_config_file(file) {
                set.config_changed = true;
                continue;
            }

            let mut matched = false;
            for module in modules.iter().filter(|m| file.starts_with(&m.path)) {
                matched = true;
                changed
                    .entry(module.name.clone())
                    .or_insert_with(|| ChangedModule {
                        name: module.name.clone(),
                        path: module.path.clone(),
                        changed_files: Vec::new(),
                        change_reason: ChangeReason::DirectChanges,
                    })
                    .changed_files
                    .push(file.clone());
            }

            if !matched {
                set.unmatched.push(file.clone());
            }
        }

        if self.include_transitive {
            let direct: Vec<String> = changed.keys().cloned().collect();
            for name in &direct {
                let dependants = graph.get_dependants_for_module(name, true)?;
                for module in dependants.build {
                    changed
                        .entry(module.name.clone())
                        .or_insert_with(|| ChangedModule {
                            name: module.name.clone(),
                            path: module.path.clone(),
                            changed_files: Vec::new(),
                            change_reason: ChangeReason::DependencyChanged(name.clone()),
                        });
                }
            }
        }

        set.modules = changed.into_values().collect();
        info!(
            changed_modules = set.modules.len(),
            config_changed = set.config_changed,
            "change detection complete"
        );
        Ok(set)
    }
}
