//! OS process spawning

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ProcessSpec;

/// Something a running process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// The process exited, with its code if it had one
    Exit(Option<i32>),
    /// The process could not be started or waited on
    Error(String),
}

/// A started process: its event stream and a kill switch.
///
/// Sending on `kill`, or dropping it, kills the process.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
    pub kill: oneshot::Sender<()>,
}

/// Starts OS processes
pub trait ProcessSpawner: Send + Sync {
    /// Start a process. Must be called from within a tokio runtime.
    fn spawn(&self, spec: &ProcessSpec) -> std::io::Result<SpawnedProcess>;
}

/// Spawns processes with `tokio::process`, streaming output line by line
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &ProcessSpec) -> std::io::Result<SpawnedProcess> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(command = %spec.command, pid, "spawned process");

        let (tx, events) = mpsc::unbounded_channel();
        let (kill, kill_rx) = oneshot::channel::<()>();

        let stdout = tokio::spawn(forward_lines(child.stdout.take(), tx.clone(), ProcessEvent::Stdout));
        let stderr = tokio::spawn(forward_lines(child.stderr.take(), tx.clone(), ProcessEvent::Stderr));

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    // flush remaining output before reporting the exit
                    let _ = stdout.await;
                    let _ = stderr.await;
                    let event = match status {
                        Ok(status) => ProcessEvent::Exit(status.code()),
                        Err(e) => ProcessEvent::Error(e.to_string()),
                    };
                    let _ = tx.send(event);
                }
                _ = kill_rx => {
                    let _ = child.kill().await;
                    stdout.abort();
                    stderr.abort();
                }
            }
        });

        Ok(SpawnedProcess { pid, events, kill })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    stream: Option<R>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(wrap(line)).is_err() {
            break;
        }
    }
}
