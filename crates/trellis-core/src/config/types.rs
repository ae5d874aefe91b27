//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main project configuration for Trellis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name
    pub name: Option<String>,

    /// Task processing configuration
    pub tasks: TasksConfig,

    /// Versioning configuration
    pub versioning: VersioningConfig,

    /// Module declarations
    pub modules: Vec<ModuleConfig>,

    /// Watch mode configuration
    pub dev: DevConfig,
}

impl ProjectConfig {
    /// Resolve module paths relative to the directory holding the config file
    pub fn resolve_paths(&mut self, root: &Path) {
        for module in &mut self.modules {
            if module.path.is_relative() {
                module.path = root.join(&module.path);
            }
        }
        for process in &mut self.dev.processes {
            process.resolve_paths(root);
        }
    }

    /// Find a module by name
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Task processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum number of tasks in flight across all types
    pub concurrency: usize,

    /// Per task-type ceilings
    pub limits: TaskLimits,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            limits: TaskLimits::default(),
        }
    }
}

/// Concurrency ceiling for each task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    pub build: usize,
    pub deploy: usize,
    pub run: usize,
    pub test: usize,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            build: 10,
            deploy: 10,
            run: 10,
            test: 10,
        }
    }
}

/// Versioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Warn when a module includes more files than this
    pub file_count_warning_threshold: usize,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            file_count_warning_threshold: 10_000,
        }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Auxiliary processes kept alive while watching, each the root of its
    /// own supervised tree
    pub processes: Vec<SupervisedProcessConfig>,
}

/// A long-running auxiliary process, such as a port forward or a sync daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisedProcessConfig {
    pub name: String,

    /// Executable to run. Not passed through a shell.
    pub command: String,

    pub args: Vec<String>,

    /// Working directory, relative to the project root
    pub cwd: Option<PathBuf>,

    pub env: BTreeMap<String, String>,

    /// Restarts allowed before the tree gives up
    pub max_retries: u32,

    /// Wait before restarting, in milliseconds
    pub min_timeout_ms: u64,

    /// Output containing this text counts as a failure
    pub error_pattern: Option<String>,

    /// Output containing this text fails the tree without retrying
    pub critical_pattern: Option<String>,

    /// Processes restarted together with this one
    pub descendants: Vec<SupervisedProcessConfig>,
}

impl Default for SupervisedProcessConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            max_retries: 10,
            min_timeout_ms: 1_000,
            error_pattern: None,
            critical_pattern: None,
            descendants: Vec::new(),
        }
    }
}

impl SupervisedProcessConfig {
    fn resolve_paths(&mut self, root: &Path) {
        self.cwd = Some(match self.cwd.take() {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(cwd) => root.join(cwd),
            None => root.to_path_buf(),
        });
        for child in &mut self.descendants {
            child.resolve_paths(root);
        }
    }
}

/// A module: a unit of source code that is built, and that owns services,
/// tasks and tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module name
    pub name: String,

    /// Provider type (e.g., "container", "exec")
    #[serde(rename = "type")]
    pub module_type: String,

    /// Module root directory
    pub path: PathBuf,

    /// Whether the module is disabled
    pub disabled: bool,

    /// Include globs, relative to the module path (all files when unset)
    pub include: Option<Vec<String>>,

    /// Exclude globs, relative to the module path
    pub exclude: Option<Vec<String>>,

    /// Build output globs
    pub outputs: Vec<String>,

    /// Build-relevant subset of the configuration, set by providers.
    /// When present only this is hashed into the module version.
    pub build_config: Option<serde_json::Value>,

    /// Build configuration
    pub build: BuildConfig,

    /// Long-running services
    pub services: Vec<RuntimeEntityConfig>,

    /// One-off tasks
    pub tasks: Vec<RuntimeEntityConfig>,

    /// Test suites
    pub tests: Vec<RuntimeEntityConfig>,

    /// Provider-specific configuration
    pub spec: serde_json::Value,
}

impl ModuleConfig {
    /// Create a new module config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: "exec".to_string(),
            ..Default::default()
        }
    }

    /// Set the module path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a build dependency
    pub fn with_build_dependency(mut self, name: impl Into<String>) -> Self {
        self.build.dependencies.push(BuildDependency::new(name));
        self
    }

    /// Set the build command
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build.command = Some(command.into());
        self
    }

    /// Add a service
    pub fn with_service(mut self, service: RuntimeEntityConfig) -> Self {
        self.services.push(service);
        self
    }

    /// Add a task
    pub fn with_task(mut self, task: RuntimeEntityConfig) -> Self {
        self.tasks.push(task);
        self
    }

    /// Add a test
    pub fn with_test(mut self, test: RuntimeEntityConfig) -> Self {
        self.tests.push(test);
        self
    }

    /// Mark the module as disabled
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Names of all build dependencies
    pub fn build_dependency_names(&self) -> Vec<&str> {
        self.build
            .dependencies
            .iter()
            .map(|d| d.name.as_str())
            .collect()
    }
}

/// Build configuration for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Modules that must be built first
    pub dependencies: Vec<BuildDependency>,

    /// Command to run for the build
    pub command: Option<String>,
}

/// A build dependency on another module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BuildDependencySpec")]
pub struct BuildDependency {
    /// Module name
    pub name: String,

    /// Files to copy from the dependency's build output
    #[serde(default)]
    pub copy: Vec<CopySpec>,
}

impl BuildDependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            copy: Vec::new(),
        }
    }
}

/// Source/target pair for copying dependency outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    pub source: String,
    #[serde(default)]
    pub target: String,
}

/// Build dependencies may be written as a bare module name or as a table
#[derive(Deserialize)]
#[serde(untagged)]
enum BuildDependencySpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        copy: Vec<CopySpec>,
    },
}

impl From<BuildDependencySpec> for BuildDependency {
    fn from(spec: BuildDependencySpec) -> Self {
        match spec {
            BuildDependencySpec::Name(name) => Self::new(name),
            BuildDependencySpec::Full { name, copy } => Self { name, copy },
        }
    }
}

/// A service, task or test declared by a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeEntityConfig {
    /// Entity name
    pub name: String,

    /// Services or tasks that must be ready first
    pub dependencies: Vec<String>,

    /// Whether the entity is disabled
    pub disabled: bool,

    /// Command to run
    pub command: Option<String>,

    /// Environment variables to pass
    pub env: BTreeMap<String, String>,

    /// Provider-specific configuration
    pub spec: serde_json::Value,
}

impl RuntimeEntityConfig {
    /// Create a new entity config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a runtime dependency
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Set the command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Mark the entity as disabled
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dependency_short_and_long_form() {
        let yaml = r#"
name: api
path: api
build:
  dependencies:
    - base
    - name: proto
      copy:
        - source: gen/
          target: vendor/
"#;
        let module: ModuleConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(module.build.dependencies.len(), 2);
        assert_eq!(module.build.dependencies[0], BuildDependency::new("base"));
        assert_eq!(module.build.dependencies[1].name, "proto");
        assert_eq!(module.build.dependencies[1].copy[0].target, "vendor/");
    }

    #[test]
    fn test_defaults() {
        let config = ProjectConfig::default();
        assert_eq!(config.tasks.concurrency, 20);
        assert_eq!(config.tasks.limits.build, 10);
        assert_eq!(config.versioning.file_count_warning_threshold, 10_000);
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = ProjectConfig {
            modules: vec![
                ModuleConfig::new("a").with_path("a"),
                ModuleConfig::new("b").with_path("/abs/b"),
            ],
            ..Default::default()
        };
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.modules[0].path, PathBuf::from("/project/a"));
        assert_eq!(config.modules[1].path, PathBuf::from("/abs/b"));
    }

    #[test]
    fn test_module_builder() {
        let module = ModuleConfig::new("api")
            .with_build_dependency("base")
            .with_service(RuntimeEntityConfig::new("api").with_dependency("db"))
            .with_task(RuntimeEntityConfig::new("migrate"));

        assert_eq!(module.build_dependency_names(), vec!["base"]);
        assert_eq!(module.services[0].dependencies, vec!["db"]);
        assert_eq!(module.tasks[0].name, "migrate");
    }

    #[test]
    fn test_dev_processes_parse_with_defaults() {
        let yaml = r#"
dev:
  processes:
    - name: tunnel
      command: kubectl
      args: [port-forward, svc/api, "8080:80"]
      max_retries: 2
      descendants:
        - name: sync
          command: mutagen
          cwd: src
"#;
        let mut config: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        config.resolve_paths(Path::new("/project"));

        let tunnel = &config.dev.processes[0];
        assert_eq!(tunnel.max_retries, 2);
        assert_eq!(tunnel.cwd, Some(PathBuf::from("/project")));

        let sync = &tunnel.descendants[0];
        assert_eq!(sync.max_retries, 10);
        assert_eq!(sync.min_timeout_ms, 1_000);
        assert_eq!(sync.cwd, Some(PathBuf::from("/project/src")));
    }
}
