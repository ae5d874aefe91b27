//! Live task status lines

use console::style;
use trellis_tasks::{TaskEvent, TaskReporter};

/// Prints one line per task transition to stdout
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Line to print for an event, if any
    fn line(event: &TaskEvent) -> Option<String> {
        let line = match event {
            TaskEvent::Processing(info) => format!("{} {} {}", style("→").blue(), info.key, style(&info.version).dim()),
            TaskEvent::Complete { info, result, cached } => {
                let detail = if *cached {
                    "cached".to_string()
                } else {
                    result
                        .started_at
                        .zip(result.completed_at)
                        .map(|(s, c)| format!("{}ms", (c - s).num_milliseconds()))
                        .unwrap_or_default()
                };
                format!("{} {} {}", style("✓").green().bold(), info.key, style(detail).dim())
            }
            TaskEvent::Error { info, error, cached } => {
                let marker = if *cached { " (cached)" } else { "" };
                format!("{} {}{}: {}", style("✗").red().bold(), info.key, marker, error)
            }
            TaskEvent::Cancelled { info, reason } => {
                format!("{} {} cancelled: {}", style("!").yellow().bold(), info.key, reason)
            }
            _ => return None,
        };
        Some(line)
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        if let Some(line) = Self::line(event) {
            println!("{}", line);
        }
    }
}
