//! Trellis Tasks - Task graph processing engine
//!
//! This crate schedules build, deploy, run and test tasks in dependency
//! order under global and per-type concurrency ceilings, caches results by
//! key and version, and reprocesses work when source files change.

pub mod actions;
pub mod cache;
pub mod dag;
pub mod error;
pub mod processor;
pub mod provider;
pub mod reporter;
pub mod reprocess;
pub mod result;
pub mod state;
pub mod task;

pub use actions::{ActionContext, ActionKind};
pub use cache::ResultCache;
pub use error::TaskGraphError;
pub use processor::{ProcessOptions, TaskGraphProcessor};
pub use provider::{Provider, ShellProvider};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use reprocess::{ActionChangeHandler, ChangeHandler, ReprocessOutcome, Reprocessor};
pub use result::{GraphResult, GraphResults};
pub use task::{DependencyResults, Task, TaskHandler, TaskType};
