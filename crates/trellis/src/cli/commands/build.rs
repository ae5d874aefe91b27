//! Build command

use clap::Args;
use tracing::info;

use crate::cli::Cli;
use crate::session::Session;

/// Build modules and their build dependencies
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Modules to build (default: all enabled modules)
    pub modules: Vec<String>,

    /// Rebuild even when a result for the current version is cached
    #[arg(short, long)]
    pub force: bool,
}

impl BuildCommand {
    /// Execute the build command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(modules = ?self.modules, force = self.force, "executing build command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let session = Session::load(&cwd, cli)?;

        // forcing a build also forces the builds it depends on
        let ctx = session.action_context(self.force, self.force).await?;
        let tasks = ctx.build_tasks(selection(&self.modules))?;
        session.execute(tasks, cli).await?;
        Ok(())
    }
}

/// `None` selects everything
pub(crate) fn selection(names: &[String]) -> Option<&[String]> {
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}
