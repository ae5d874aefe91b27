//! Exit codes for the CLI

use trellis_core::TrellisError;
use trellis_process::SupervisorError;
use trellis_tasks::TaskGraphError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// One or more tasks failed
pub const TASK_FAILED: i32 = 3;

/// A supervised process tree failed
pub const PROCESS_FAILED: i32 = 4;

/// Exit code for an error, from the first error in its chain we recognise
pub fn for_error(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<TaskGraphError>() {
            if e.is_configuration() {
                return CONFIG_ERROR;
            }
            if matches!(e, TaskGraphError::TasksFailed { .. }) {
                return TASK_FAILED;
            }
        }
        if let Some(e) = cause.downcast_ref::<TrellisError>() {
            if e.is_configuration() {
                return CONFIG_ERROR;
            }
        }
        if cause.downcast_ref::<SupervisorError>().is_some() {
            return PROCESS_FAILED;
        }
    }
    ERROR
}
