//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::ProjectConfig;
use super::validation::validate_config;

/// Load configuration from a file.
///
/// Module paths are resolved relative to the directory holding the file.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let mut config: ProjectConfig = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;

    if let Some(root) = path.parent() {
        config.resolve_paths(root);
    }

    debug!(path = %path.display(), modules = config.modules.len(), "config loaded and validated");
    Ok(config)
}

/// Find the configuration file in a directory or its parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(ProjectConfig, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrellisError;
    use tempfile::TempDir;

    const MINIMAL: &str = "modules:\n  - name: api\n    path: api\n";

    #[test]
    fn test_find_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.yaml");
        std::fs::write(&config_path, MINIMAL).unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.yaml");
        std::fs::write(&config_path, MINIMAL).unwrap();
        let nested = temp.path().join("api").join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_yaml_over_toml() {
        let temp = TempDir::new().unwrap();
        let yaml_path = temp.path().join("trellis.yaml");
        let toml_path = temp.path().join("trellis.toml");
        std::fs::write(&yaml_path, MINIMAL).unwrap();
        std::fs::write(&toml_path, "[[modules]]\nname = \"api\"\n").unwrap();

        assert_eq!(find_config(temp.path()).unwrap(), yaml_path);
    }

    #[test]
    fn test_load_config_yaml_resolves_paths() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.yaml");
        std::fs::write(&config_path, MINIMAL).unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].path, temp.path().join("api"));
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.toml");
        std::fs::write(
            &config_path,
            r#"
name = "demo"

[tasks]
concurrency = 4

[[modules]]
name = "api"
path = "api"

[[modules.services]]
name = "api"
dependencies = ["db"]
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.name.as_deref(), Some("demo"));
        assert_eq!(config.tasks.concurrency, 4);
        assert_eq!(config.modules[0].services[0].dependencies, vec!["db"]);
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.yaml");
        std::fs::write(&config_path, "modules: [unterminated").unwrap();

        let err = load_config(&config_path).unwrap_err();
        assert!(matches!(
            err,
            TrellisError::Config(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_load_config_from_dir_not_found() {
        let temp = TempDir::new().unwrap();
        let err = load_config_from_dir(temp.path()).unwrap_err();
        assert!(matches!(err, TrellisError::Config(ConfigError::NotFound(_))));
    }
}
