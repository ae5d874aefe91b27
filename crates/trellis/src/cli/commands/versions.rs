//! Versions command - show or pin module versions

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use trellis_core::vcs::{module_version_file_path, write_module_version_file};

use crate::cli::{output, Cli, OutputFormat};
use crate::session::Session;

/// Show module versions
#[derive(Debug, Args)]
pub struct VersionsCommand {
    /// Modules to show (default: all)
    pub modules: Vec<String>,

    /// Pin each version by writing a module version file into the module directory
    #[arg(long)]
    pub write: bool,
}

impl VersionsCommand {
    /// Execute the versions command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(modules = ?self.modules, write = self.write, "executing versions command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let session = Session::load(&cwd, cli)?;

        let versions = if self.modules.is_empty() {
            session.versions().await?
        } else {
            session
                .vcs
                .resolve_module_versions_for(&session.graph, &self.modules)
                .await?
                .into_iter()
                .filter(|(name, _)| self.modules.contains(name))
                .collect()
        };

        if self.write {
            for (name, version) in &versions {
                let module = session.graph.get_module(name, true)?;
                let path = module_version_file_path(module);
                write_module_version_file(&path, version)
                    .with_context(|| format!("failed to pin version of module '{}'", name))?;
            }
        }

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&versions)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                println!("{}", output::header("Module Versions"));
                for (name, version) in &versions {
                    println!(
                        "  {} {} {}",
                        name,
                        output::version_style().apply_to(&version.version_string),
                        style(format!("({} files)", version.files.len())).dim()
                    );
                    for (dep, dep_version) in &version.dependency_versions {
                        println!("    {} {}", style(format!("{} ->", dep)).dim(), dep_version);
                    }
                }
                if self.write {
                    println!();
                    output::success(&format!("Pinned {} module version(s)", versions.len()));
                }
            }
        }

        Ok(())
    }
}
