//! Validate command

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use trellis_core::config::load_config_from_dir;
use trellis_core::ConfigGraph;

use crate::cli::{Cli, OutputFormat};

/// Validate the project configuration and dependency graph
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(strict = self.strict, "executing validate command");
        let cwd = std::env::current_dir()?;

        let mut errors: Vec<anyhow::Error> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let (config, config_path) = match load_config_from_dir(&cwd) {
            Ok((c, p)) => (Some(c), Some(p)),
            Err(e) => {
                errors.push(anyhow::Error::new(e).context("Configuration"));
                (None, None)
            }
        };

        if let Some(ref cfg) = config {
            if let Err(e) = ConfigGraph::build(cfg.modules.clone()) {
                errors.push(anyhow::Error::new(e).context("Dependency graph"));
            }

            for module in &cfg.modules {
                if !module.path.is_dir() {
                    warnings.push(format!(
                        "Module '{}' path {} does not exist",
                        module.name,
                        module.path.display()
                    ));
                }
                if module.disabled {
                    warnings.push(format!("Module '{}' is disabled", module.name));
                }
            }

            if cfg.modules.is_empty() {
                warnings.push("No modules declared".to_string());
            }
        }

        // If strict, promote warnings to errors
        if self.strict {
            errors.extend(warnings.drain(..).map(anyhow::Error::msg));
        }

        let passed = errors.is_empty();
        let messages: Vec<String> = errors.iter().map(|e| format!("{:#}", e)).collect();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "modules": config.as_ref().map(|c| c.modules.len()).unwrap_or(0),
                    "errors": messages,
                    "warnings": warnings
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    if let Some(path) = config_path {
                        println!("Config: {}", style(path.display()).cyan());
                        println!();
                    }

                    if !messages.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &messages {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    if !warnings.is_empty() {
                        println!("{}", style("Warnings:").yellow().bold());
                        for warning in &warnings {
                            println!("  {} {}", style("!").yellow(), warning);
                        }
                        println!();
                    }

                    if passed {
                        if warnings.is_empty() {
                            println!("{}", style("✓ All checks passed").green().bold());
                        } else {
                            println!(
                                "{} with {} warning(s)",
                                style("✓ Validation passed").green().bold(),
                                warnings.len()
                            );
                        }
                    }
                }
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first).context(format!("Validation failed with {} error(s)", messages.len())),
            None => Ok(()),
        }
    }
}
