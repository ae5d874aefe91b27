//! Graph command - show the dependency graph or one node's relations

use clap::Args;
use console::style;
use tracing::info;

use trellis_core::config::load_config_from_dir;
use trellis_core::graph::NodeKey;
use trellis_core::{ConfigGraph, NodeType};

use crate::cli::{output, Cli, OutputFormat};

/// Show the dependency graph
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Only show the relations of this node, e.g. `build.api` or `deploy.web`
    #[arg(long, value_name = "KEY", value_parser = parse_node_key)]
    pub node: Option<NodeKey>,

    /// Show what depends on the node instead of what it depends on
    #[arg(long, requires = "node")]
    pub dependants: bool,

    /// Follow relations transitively
    #[arg(short, long, requires = "node")]
    pub recursive: bool,
}

fn parse_node_key(s: &str) -> Result<NodeKey, String> {
    let (node_type, name) = s
        .split_once('.')
        .ok_or_else(|| format!("expected <type>.<name>, got '{}'", s))?;
    let node_type = NodeType::parse(node_type).ok_or_else(|| format!("unknown node type '{}'", node_type))?;
    if name.is_empty() {
        return Err("node name cannot be empty".to_string());
    }
    Ok(NodeKey::new(node_type, name))
}

impl GraphCommand {
    /// Execute the graph command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(node = ?self.node, dependants = self.dependants, "executing graph command");
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_from_dir(&cwd)?;
        let graph = ConfigGraph::build(config.modules)?;

        match &self.node {
            Some(key) => self.print_relations(&graph, key, cli),
            None => print_graph(&graph, cli),
        }
    }

    fn print_relations(&self, graph: &ConfigGraph, key: &NodeKey, cli: &Cli) -> anyhow::Result<()> {
        let relations = if self.dependants {
            graph.get_dependants(key.node_type, &key.name, self.recursive)?
        } else {
            graph.get_dependencies(key.node_type, &key.name, self.recursive)?
        };
        let keys: Vec<String> = relations.keys().iter().map(|k| k.to_string()).collect();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "node": key.to_string(),
                    "relation": if self.dependants { "dependants" } else { "dependencies" },
                    "recursive": self.recursive,
                    "keys": keys,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                let relation = if self.dependants { "Dependants" } else { "Dependencies" };
                println!("{} of {}", output::header(relation), style(key).cyan());
                if keys.is_empty() {
                    println!("  {}", style("none").dim());
                }
                for k in &keys {
                    println!("  • {}", k);
                }
            }
        }
        Ok(())
    }
}

fn print_graph(graph: &ConfigGraph, cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&graph.render())?);
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", output::header("Dependency Graph"));
            print!("{}", graph.describe());
            println!();
            println!(
                "{}",
                output::key_value("Build order", &graph.build_order().join(" -> "))
            );
        }
    }
    Ok(())
}
