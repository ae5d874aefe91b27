//! Task processing errors

use trellis_core::TrellisError;

/// Errors raised while planning or processing a task graph
#[derive(Debug, thiserror::Error)]
pub enum TaskGraphError {
    /// A task depends on itself, directly or transitively
    #[error("Circular task dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// A task's dependency resolution failed
    #[error("Failed to resolve dependencies for {key}: {message}")]
    DependencyResolution { key: String, message: String },

    /// One or more tasks failed and the caller asked for errors to be raised
    #[error("{} task(s) failed:\n{}", .failures.len(), .failures.join("\n"))]
    TasksFailed { failures: Vec<String> },

    /// Configuration, graph or versioning error
    #[error(transparent)]
    Core(#[from] TrellisError),
}

impl TaskGraphError {
    /// Whether the error stems from invalid declarative input
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::CircularDependency { .. } => true,
            Self::Core(e) => e.is_configuration(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = TaskGraphError::CircularDependency {
            path: vec!["build.a".into(), "build.b".into(), "build.a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular task dependency detected: build.a -> build.b -> build.a"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn test_tasks_failed_message() {
        let err = TaskGraphError::TasksFailed {
            failures: vec!["build module a: boom".into()],
        };
        assert_eq!(err.to_string(), "1 task(s) failed:\nbuild module a: boom");
        assert!(!err.is_configuration());
    }
}
