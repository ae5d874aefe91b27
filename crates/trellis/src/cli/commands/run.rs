//! Run command

use clap::Args;
use tracing::info;

use crate::cli::Cli;
use crate::session::Session;

/// Run tasks. Requested tasks always run, even when a result is cached.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Also rebuild the modules the tasks depend on
    #[arg(long)]
    pub force_build: bool,
}

impl RunCommand {
    /// Execute the run command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(tasks = ?self.tasks, "executing run command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let session = Session::load(&cwd, cli)?;

        let ctx = session.action_context(true, self.force_build).await?;
        let tasks = ctx.run_tasks(Some(&self.tasks))?;
        session.execute(tasks, cli).await?;
        Ok(())
    }
}
