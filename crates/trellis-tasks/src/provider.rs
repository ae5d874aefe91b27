//! Provider handlers: the code that actually builds, deploys, runs and tests

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use trellis_core::config::ModuleConfig;
use trellis_core::graph::RuntimeEntity;

use crate::task::DependencyResults;

/// Performs actions for a module type
#[async_trait]
pub trait Provider: Send + Sync {
    /// Build a module
    async fn build(
        &self,
        module: &ModuleConfig,
        version: &str,
        dependencies: &DependencyResults,
    ) -> anyhow::Result<Value>;

    /// Deploy a service
    async fn deploy(
        &self,
        service: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        dependencies: &DependencyResults,
    ) -> anyhow::Result<Value>;

    /// Run a one-off task
    async fn run_task(
        &self,
        task: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        dependencies: &DependencyResults,
    ) -> anyhow::Result<Value>;

    /// Run a test suite
    async fn test(
        &self,
        test: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        dependencies: &DependencyResults,
    ) -> anyhow::Result<Value>;
}

/// Runs each entity's `command` with `sh -c` in the module directory.
///
/// Entities without a command succeed without doing anything.
#[derive(Debug, Clone, Default)]
pub struct ShellProvider {
    env: BTreeMap<String, String>,
}

impl ShellProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable passed to every command
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    async fn run(
        &self,
        action: &str,
        command: Option<&str>,
        module: &ModuleConfig,
        env: &BTreeMap<String, String>,
        version: &str,
    ) -> anyhow::Result<Value> {
        let Some(command) = command else {
            debug!(module = %module.name, action, "no command configured, skipping");
            return Ok(json!({ "skipped": true, "reason": "no command configured" }));
        };

        info!(module = %module.name, action, command, "running command");
        let (stdout, stderr) = run_shell_command(
            command,
            &module.path,
            self.env
                .iter()
                .chain(env.iter())
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .chain([
                    ("TRELLIS_MODULE", module.name.as_str()),
                    ("TRELLIS_VERSION", version),
                ]),
        )
        .await
        .with_context(|| format!("{} failed for module {}", action, module.name))?;

        Ok(json!({
            "command": command,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

#[async_trait]
impl Provider for ShellProvider {
    async fn build(
        &self,
        module: &ModuleConfig,
        version: &str,
        _dependencies: &DependencyResults,
    ) -> anyhow::Result<Value> {
        self.run(
            "build",
            module.build.command.as_deref(),
            module,
            &BTreeMap::new(),
            version,
        )
        .await
    }

    async fn deploy(
        &self,
        service: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        _dependencies: &DependencyResults,
    ) -> anyhow::Result<Value> {
        let config = &service.config;
        self.run("deploy", config.command.as_deref(), module, &config.env, version)
            .await
    }

    async fn run_task(
        &self,
        task: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        _dependencies: &DependencyResults,
    ) -> anyhow::Result<Value> {
        let config = &task.config;
        self.run("run", config.command.as_deref(), module, &config.env, version)
            .await
    }

    async fn test(
        &self,
        test: &RuntimeEntity,
        module: &ModuleConfig,
        version: &str,
        _dependencies: &DependencyResults,
    ) -> anyhow::Result<Value> {
        let config = &test.config;
        self.run("test", config.command.as_deref(), module, &config.env, version)
            .await
    }
}

/// Run a shell command and capture output
async fn run_shell_command<'a>(
    cmd: &str,
    dir: &Path,
    env: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> anyhow::Result<(String, String)> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(dir)
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn `{}` in {}", cmd, dir.display()))?;

    let (stdout, stderr) = tokio::join!(
        read_lines(child.stdout.take(), false),
        read_lines(child.stderr.take(), true)
    );

    let status = child.wait().await.context("failed to wait for command")?;

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        bail!("command exited with code {}: {}", code, stderr.join("\n"));
    }

    Ok((stdout.join("\n"), stderr.join("\n")))
}

async fn read_lines<R: AsyncRead + Unpin>(stream: Option<R>, is_stderr: bool) -> Vec<String> {
    let mut collected = Vec::new();
    let Some(stream) = stream else {
        return collected;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(is_stderr, line = %line, "command output");
        collected.push(line);
    }
    collected
}
