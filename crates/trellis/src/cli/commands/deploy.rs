//! Deploy command

use clap::Args;
use tracing::info;

use super::build::selection;
use crate::cli::Cli;
use crate::session::Session;

/// Deploy services, building their modules and deploying their dependencies first
#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Services to deploy (default: all enabled services)
    pub services: Vec<String>,

    /// Redeploy even when a result for the current version is cached
    #[arg(short, long)]
    pub force: bool,

    /// Also rebuild the modules the services depend on
    #[arg(long)]
    pub force_build: bool,
}

impl DeployCommand {
    /// Execute the deploy command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(services = ?self.services, force = self.force, "executing deploy command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let session = Session::load(&cwd, cli)?;

        let ctx = session.action_context(self.force, self.force_build).await?;
        let tasks = ctx.deploy_tasks(selection(&self.services))?;
        session.execute(tasks, cli).await?;
        Ok(())
    }
}
