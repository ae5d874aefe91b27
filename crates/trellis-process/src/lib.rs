//! Trellis Process - Supervised process trees
//!
//! Keeps long-running auxiliary processes (port forwards, sync daemons)
//! alive. Each node in a tree wraps one OS command. A failing node restarts
//! its whole subtree within a retry budget, and exhausting the budget stops
//! the tree for good.

pub mod config;
pub mod error;
pub mod spawner;
pub mod state;
pub mod tree;

pub use config::{NodeConfig, OutputClassifier, ProcessSpec, RetryConfig};
pub use error::{Result, SupervisorError};
pub use spawner::{ProcessEvent, ProcessSpawner, SpawnedProcess, TokioSpawner};
pub use state::ProcessState;
pub use tree::{NodeId, ProcessFailure, ProcessTree};
