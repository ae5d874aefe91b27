//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{
    BuildCommand, DeployCommand, DevCommand, GraphCommand, RunCommand, TestCommand,
    ValidateCommand, VersionsCommand,
};

/// Trellis - Build, deploy and test a graph of modules
#[derive(Debug, Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate the project configuration and dependency graph
    Validate(ValidateCommand),

    /// Show the dependency graph
    Graph(GraphCommand),

    /// Show module versions
    Versions(VersionsCommand),

    /// Build modules
    Build(BuildCommand),

    /// Deploy services
    Deploy(DeployCommand),

    /// Run tests
    Test(TestCommand),

    /// Run tasks
    Run(RunCommand),

    /// Watch for changes and rebuild affected modules
    Dev(DevCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Validate(ref cmd) => cmd.execute(&self),
            Commands::Graph(ref cmd) => cmd.execute(&self),
            Commands::Versions(ref cmd) => cmd.execute(&self),
            Commands::Build(ref cmd) => cmd.execute(&self),
            Commands::Deploy(ref cmd) => cmd.execute(&self),
            Commands::Test(ref cmd) => cmd.execute(&self),
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Dev(ref cmd) => cmd.execute(&self),
        }
    }

    /// Whether human-readable output should be printed
    pub fn prints_text(&self) -> bool {
        self.format == OutputFormat::Text && !self.quiet
    }
}
