//! Supervision errors

use thiserror::Error;

use crate::state::ProcessState;

/// Result type alias using SupervisorError
pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The state machine does not allow the transition
    #[error("Invalid state transition for process '{node}': {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: ProcessState,
        to: ProcessState,
    },

    /// Descendants can only be attached before a node starts
    #[error("Cannot add descendants to process '{node}' in state {state}")]
    NotRunnable { node: String, state: ProcessState },

    /// A node exhausted its retries or hit a critical error
    #[error("Process tree has failed (process '{node}'), it cannot be restarted")]
    TreeFailed { node: String },

    #[error("A failure handler is already set for this process tree")]
    FailureHandlerAlreadySet,

    #[error("Unknown process node {0}")]
    UnknownNode(usize),
}
