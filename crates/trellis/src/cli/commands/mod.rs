//! CLI commands

mod build;
mod deploy;
mod dev;
mod graph;
mod run;
mod validate;
mod versions;

pub use build::BuildCommand;
pub use deploy::DeployCommand;
pub use dev::DevCommand;
pub use graph::GraphCommand;
pub use run::RunCommand;
pub use test::TestCommand;
pub use validate::ValidateCommand;
pub use versions::VersionsCommand;
