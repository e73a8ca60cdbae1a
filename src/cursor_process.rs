//! Launching `cursor-agent` and signalling it from outside the turn.

use std::{path::Path, process::Stdio, time::Duration};

use anyhow::Context as _;
use tokio::{
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::{mpsc, watch},
};
use tracing::{debug, warn};

use crate::config::AgentConfig;

/// Flags asking for non-interactive, streamed, machine-readable output.
const STREAM_ARGS: [&str; 4] = [
    "--print",
    "--output-format",
    "stream-json",
    "--stream-partial-output",
];

pub fn build_args(config: &AgentConfig, resume_token: Option<&str>, prompt: &str) -> Vec<String> {
    let mut args: Vec<String> = STREAM_ARGS.iter().map(|a| a.to_string()).collect();
    if let Some(token) = resume_token {
        args.push("--resume".to_string());
        args.push(token.to_string());
    }
    args.extend(config.extra_args.iter().cloned());
    args.push(prompt.to_string());
    args
}

/// A running `cursor-agent` child with its output pipes.
pub struct CursorProcess {
    parts: CursorProcessParts,
    handle: ProcessHandle,
}

/// Pieces the turn runner drives directly.
pub struct CursorProcessParts {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    /// Forced-kill requests coming from [`ProcessHandle::force_kill`].
    pub kill_rx: mpsc::UnboundedReceiver<()>,
    /// Set to `true` by the runner once the child has been reaped.
    pub exited_tx: watch::Sender<bool>,
}

impl CursorProcess {
    pub fn spawn(
        config: &AgentConfig,
        cwd: &Path,
        resume_token: Option<&str>,
        prompt: &str,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(build_args(config, resume_token, prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if cwd.is_dir() {
            cmd.current_dir(cwd);
        } else {
            warn!(
                "Session cwd {} is not a directory; running cursor-agent in the current directory",
                cwd.display()
            );
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to execute {}", config.executable))?;
        let stdout = child
            .stdout
            .take()
            .context("cursor-agent stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("cursor-agent stderr was not captured")?;

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let handle = ProcessHandle {
            pid: child.id(),
            kill_tx,
            exited: exited_rx,
        };
        debug!("Spawned cursor-agent (pid={:?})", handle.pid);

        Ok(Self {
            parts: CursorProcessParts {
                child,
                stdout,
                stderr,
                kill_rx,
                exited_tx,
            },
            handle,
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    pub fn into_parts(self) -> CursorProcessParts {
        self.parts
    }
}

/// The session's reference to its active child. Cloning it does not give
/// ownership of the process; only the turn runner reaps it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Ask the process to stop, escalating to a kill if it is still alive
    /// after `grace`. Signal failures are ignored: the process may already
    /// be gone.
    pub async fn terminate(self, grace: Duration) {
        if self.has_exited() {
            return;
        }
        self.request_stop();

        let mut exited = self.exited.clone();
        let stopped = tokio::time::timeout(grace, exited.wait_for(|exited| *exited)).await;
        if stopped.is_err() {
            warn!(
                "cursor-agent (pid={:?}) still running {grace:?} after SIGTERM; killing it",
                self.pid
            );
            self.force_kill();
        }
    }

    pub fn force_kill(&self) {
        if self.kill_tx.send(()).is_err() {
            debug!("cursor-agent (pid={:?}) already reaped", self.pid);
        }
    }

    #[cfg(unix)]
    fn request_stop(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            self.force_kill();
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!("Failed to send SIGTERM to cursor-agent (pid={pid}): {err}");
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&self) {
        self.force_kill();
    }
}
