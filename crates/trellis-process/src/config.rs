//! Process node configuration

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One OS command: no shell, one PID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Retry budget of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Wait before restarting a failed subtree
    pub min_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            min_timeout_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, min_timeout: Duration) -> Self {
        Self {
            max_retries,
            min_timeout_ms: min_timeout.as_millis() as u64,
        }
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }
}

/// Classifies an output line; `true` marks it
pub type OutputClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A supervised process
#[derive(Clone)]
pub struct NodeConfig {
    pub name: String,
    pub spec: ProcessSpec,
    pub retry: RetryConfig,
    /// Output lines that count as a failure. Nothing does by default.
    pub is_error: Option<OutputClassifier>,
    /// Output lines that fail the tree immediately, skipping retries
    pub is_critical: Option<OutputClassifier>,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            retry: RetryConfig::default(),
            is_error: None,
            is_critical: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error_classifier(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.is_error = Some(Arc::new(f));
        self
    }

    pub fn with_critical_classifier(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.is_critical = Some(Arc::new(f));
        self
    }

    pub(crate) fn classify(&self, line: &str) -> (bool, bool) {
        let critical = self.is_critical.as_ref().is_some_and(|f| f(line));
        let error = critical || self.is_error.as_ref().is_some_and(|f| f(line));
        (error, critical)
    }
}
