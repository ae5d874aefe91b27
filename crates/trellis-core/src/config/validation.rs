//! Configuration validation
//!
//! Checks that only need a single module at a time. Cross-module rules
//! (service/task name uniqueness, dependency references, cycles) are
//! enforced when the [`ConfigGraph`](crate::graph::ConfigGraph) is built.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{ProjectConfig, RuntimeEntityConfig, SupervisedProcessConfig};

/// Validate configuration
pub fn validate_config(config: &ProjectConfig) -> Result<()> {
    debug!("validating configuration");
    validate_tasks(config)?;
    validate_modules(config)?;
    validate_processes(&config.dev.processes, "dev.processes")?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_tasks(config: &ProjectConfig) -> Result<()> {
    if config.tasks.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "tasks.concurrency".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into());
    }

    let limits = &config.tasks.limits;
    for (field, value) in [
        ("build", limits.build),
        ("deploy", limits.deploy),
        ("run", limits.run),
        ("test", limits.test),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("tasks.limits.{}", field),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

fn validate_modules(config: &ProjectConfig) -> Result<()> {
    let mut seen = HashSet::new();

    for (i, module) in config.modules.iter().enumerate() {
        if module.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("modules[{}].name", i),
                message: "module name cannot be empty".to_string(),
            }
            .into());
        }

        if !seen.insert(module.name.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: format!("modules[{}].name", i),
                message: format!("module name '{}' is declared more than once", module.name),
            }
            .into());
        }

        for dep in &module.build.dependencies {
            if dep.name == module.name {
                return Err(ConfigError::InvalidValue {
                    field: format!("modules[{}].build.dependencies", i),
                    message: format!("module '{}' cannot depend on itself", module.name),
                }
                .into());
            }
        }

        validate_entities(&module.name, "services", &module.services)?;
        validate_entities(&module.name, "tasks", &module.tasks)?;
        validate_entities(&module.name, "tests", &module.tests)?;
    }

    Ok(())
}

fn validate_entities(module: &str, field: &str, entities: &[RuntimeEntityConfig]) -> Result<()> {
    let mut seen = HashSet::new();

    for (i, entity) in entities.iter().enumerate() {
        if entity.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.{}[{}].name", module, field, i),
                message: "name cannot be empty".to_string(),
            }
            .into());
        }

        if !seen.insert(entity.name.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.{}[{}].name", module, field, i),
                message: format!("'{}' is declared more than once in this module", entity.name),
            }
            .into());
        }
    }

    Ok(())
}

fn validate_processes(processes: &[SupervisedProcessConfig], field: &str) -> Result<()> {
    for (i, process) in processes.iter().enumerate() {
        let at = format!("{}[{}]", field, i);
        if process.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.name", at),
                message: "name cannot be empty".to_string(),
            }
            .into());
        }
        if process.command.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.command", at),
                message: format!("process '{}' has no command", process.name),
            }
            .into());
        }
        validate_processes(&process.descendants, &format!("{}.descendants", at))?;
    }
    Ok(())
}
