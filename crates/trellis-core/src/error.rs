//! Error types for Trellis

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using TrellisError
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dependency graph errors
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Versioning errors
    #[error(transparent)]
    Version(#[from] VersionError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl TrellisError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error stems from invalid declarative input
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Graph(_)
                | Self::Version(VersionError::MalformedVersionFile { .. })
        )
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Two entities of the same kind share a name
    #[error("{kind} names must be unique - the {kind} name '{name}' is used in module '{first_module}' and module '{second_module}'")]
    DuplicateName {
        kind: &'static str,
        name: String,
        first_module: String,
        second_module: String,
    },

    /// Two modules share a name
    #[error("Module names must be unique - the module name '{name}' is declared more than once")]
    DuplicateModule { name: String },

    /// A service and a task share a name
    #[error("Service and task names must be mutually unique - the name '{name}' is used for a service in module '{service_module}' and for a task in module '{task_module}'")]
    ServiceTaskConflict {
        name: String,
        service_module: String,
        task_module: String,
    },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Dependency graph errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// No entity with the requested name
    #[error("Could not find {kind}(s): {names}")]
    NotFound { kind: &'static str, names: String },

    /// The entity exists but is disabled
    #[error("{kind} '{name}' is disabled")]
    Disabled { kind: &'static str, name: String },

    /// A build dependency references an unknown module
    #[error("Could not find build dependency '{dependency}', configured in module '{module}'")]
    MissingBuildDependency { module: String, dependency: String },

    /// A runtime dependency references neither a service nor a task
    #[error("Unknown service or task '{dependency}' referenced in dependencies for {kind} '{name}'")]
    MissingRuntimeDependency {
        kind: &'static str,
        name: String,
        dependency: String,
    },

    /// Circular dependencies
    #[error("Detected circular {kind} dependencies: {}", .path.join(" -> "))]
    CircularDependency { kind: &'static str, path: Vec<String> },
}

/// Versioning errors
#[derive(Debug, Error)]
pub enum VersionError {
    /// Version file could not be parsed
    #[error("Unable to parse version file at {path}: {message}")]
    MalformedVersionFile { path: PathBuf, message: String },

    /// File scanning failed
    #[error("Failed to scan files under {path}: {message}")]
    ScanFailed { path: PathBuf, message: String },

    /// Invalid include or exclude pattern
    #[error("Invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
