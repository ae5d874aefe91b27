//! Process node state machine

use std::fmt;

use serde::Serialize;

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Not started yet. Descendants can still be attached.
    Runnable,
    Running,
    /// Stopped after a failure, waiting to restart
    Retrying,
    /// Final
    Stopped,
    /// Final
    Failed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the state machine allows moving to `to`
    pub fn can_transition(&self, to: ProcessState) -> bool {
        use ProcessState::*;
        match (self, to) {
            (Runnable, Running) | (Retrying, Running) => true,
            (Running, Retrying) => true,
            (from, Stopped) | (from, Failed) => !from.is_final(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
