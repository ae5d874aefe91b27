//! Trellis Core - Core library for development orchestration
//!
//! This crate provides the foundational types, error handling, project
//! configuration, the dependency graph over build/deploy/run/test nodes,
//! and content-hash based versioning of module sources.

pub mod changes;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod vcs;

pub use changes::{ChangeDetector, ChangeSet, ChangedModule};
pub use error::{ConfigError, GraphError, Result, TrellisError, VersionError};
pub use graph::{ConfigGraph, DependencyRelations, NodeType};
pub use lock::KeyedLock;
pub use vcs::{ModuleVersion, TreeVersion, VcsHandler};
