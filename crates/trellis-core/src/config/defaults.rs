//! Default configuration values

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "trellis.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "trellis.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".trellis.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".trellis.toml",
    ]
}

/// Whether a file name is one of the project config file names
pub fn is_config_file_name(name: &str) -> bool {
    config_file_names().contains(&name)
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Trellis Configuration

name: my-project

tasks:
  concurrency: 20
  limits:
    build: 10
    deploy: 10
    run: 10
    test: 10

modules:
  - name: api
    type: exec
    path: api
    build:
      command: cargo build
    services:
      - name: api
        command: cargo run
    tests:
      - name: unit
        command: cargo test
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    #[test]
    fn test_template_parses() {
        let config: ProjectConfig = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.name.as_deref(), Some("my-project"));
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].services[0].name, "api");
    }

    #[test]
    fn test_is_config_file_name() {
        assert!(is_config_file_name("trellis.yaml"));
        assert!(is_config_file_name(".trellis.toml"));
        assert!(!is_config_file_name("Cargo.toml"));
    }
}
