//! Backend recording process - spawn, read output, stop

use super::classify::classify_line;
use crate::backend::BackendCommand;
use crate::error::{RecorderError, Result};
use crate::event::{EventBus, EventKind};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Status text published when the backend exits by itself
pub const COMPLETED_STATUS: &str = "completed";

/// A running backend process
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub program: String,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    /// Hand the output pipes to a reader. Returns `None` the second time.
    pub fn take_output(&mut self) -> Option<(Option<ChildStdout>, Option<ChildStderr>)> {
        if self.stdout.is_none() && self.stderr.is_none() {
            return None;
        }
        Some((self.stdout.take(), self.stderr.take()))
    }

    /// Non-blocking liveness check
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the backend and everything it spawned to exit.
    fn request_stop(&self) {
        #[cfg(unix)]
        if let Err(e) = signal_group(self.pid, libc::SIGTERM) {
            warn!(pid = self.pid, "failed to send SIGTERM to process group: {}", e);
        }
    }

    /// SIGKILL whatever is left of the process group, leader included.
    fn kill_group(&mut self) {
        #[cfg(unix)]
        if let Err(e) = signal_group(self.pid, libc::SIGKILL) {
            if e.raw_os_error() != Some(libc::ESRCH) {
                warn!(pid = self.pid, "failed to kill process group: {}", e);
            }
        }
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.start_kill() {
                debug!(pid = self.pid, "kill failed (already exited?): {}", e);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill_group();
        }
    }
}

/// How the recording process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPath {
    /// The backend exited on its own
    Completed,
    /// We were asked to stop it
    StopRequested,
}

/// Spawns and stops backend processes, and turns their output into events.
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    grace_period: Duration,
}

impl ProcessMonitor {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Launch the recording command with both output streams piped.
    pub fn spawn(&self, url: &str, command: &BackendCommand, output_path: &Path) -> Result<ProcessHandle> {
        let spawn_error = |reason: String| RecorderError::Spawn {
            program: command.program.clone(),
            reason,
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a stop reaches the helpers the backend spawns.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;

        // Without a pid or pipes the child cannot be tracked; don't leak it.
        let Some(pid) = child.id() else {
            let _ = child.start_kill();
            return Err(spawn_error("process exited before it could be tracked".to_string()));
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if stdout.is_none() && stderr.is_none() {
            let _ = child.start_kill();
            return Err(spawn_error("could not capture process output".to_string()));
        }

        info!(
            url = url,
            pid = pid,
            output = %output_path.display(),
            "backend recording process started"
        );

        Ok(ProcessHandle {
            pid,
            program: command.program.clone(),
            child,
            stdout,
            stderr,
        })
    }

    /// Read combined stdout/stderr line by line until both streams end,
    /// publishing classified status and progress events. Returns the number
    /// of lines read.
    pub async fn read_output(
        url: String,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        bus: EventBus,
    ) -> usize {
        let mut out = stdout.map(|s| BufReader::new(s).lines());
        let mut err = stderr.map(|s| BufReader::new(s).lines());
        let mut count = 0;

        loop {
            let (from_stdout, next) = tokio::select! {
                line = next_line(&mut out), if out.is_some() => (true, line),
                line = next_line(&mut err), if err.is_some() => (false, line),
                else => break,
            };

            match next {
                Ok(Some(line)) => {
                    count += 1;
                    Self::publish_line(&url, &line, &bus);
                }
                Ok(None) | Err(_) => {
                    if from_stdout {
                        out = None;
                    } else {
                        err = None;
                    }
                }
            }
        }

        debug!(url = %url, lines = count, "backend output closed");
        count
    }

    /// Publish the events one output line stands for.
    pub fn publish_line(url: &str, line: &str, bus: &EventBus) {
        let class = classify_line(line);
        if let Some(text) = class.status {
            bus.status(url, text);
        }
        if let Some(percent) = class.progress {
            bus.publish(EventKind::ProgressChanged {
                url: url.to_string(),
                percent,
            });
        }
    }

    /// Wait until the process exits by itself or `cancel` fires. Returns
    /// `None` when a stop was requested while the process is still running;
    /// the caller then owns calling [`ProcessMonitor::terminate`].
    pub async fn wait_for_exit(
        &self,
        url: &str,
        handle: &mut ProcessHandle,
        cancel: &CancellationToken,
        bus: &EventBus,
    ) -> Option<(ExitPath, io::Result<ExitStatus>)> {
        let status = tokio::select! {
            status = handle.child.wait() => status,
            _ = cancel.cancelled() => return None,
        };
        match &status {
            Ok(s) => info!(url = url, pid = handle.pid, "backend exited: {}", s),
            Err(e) => warn!(url = url, pid = handle.pid, "failed to wait for backend: {}", e),
        }
        // Helpers the backend left behind die with it.
        handle.kill_group();
        if cancel.is_cancelled() {
            return Some((ExitPath::StopRequested, status));
        }
        bus.status(url, COMPLETED_STATUS);
        Some((ExitPath::Completed, status))
    }

    /// SIGTERM the process group, wait up to the grace period for the
    /// backend, then SIGKILL the group and wait for good.
    pub async fn terminate(&self, handle: &mut ProcessHandle) -> io::Result<ExitStatus> {
        if let Some(status) = handle.child.try_wait()? {
            handle.kill_group();
            return Ok(status);
        }

        handle.request_stop();

        let status = match tokio::time::timeout(self.grace_period, handle.child.wait()).await {
            Ok(status) => {
                debug!(pid = handle.pid, "backend stopped gracefully");
                status
            }
            Err(_) => {
                warn!(
                    pid = handle.pid,
                    "backend ignored stop request for {:?}, killing", self.grace_period
                );
                handle.kill_group();
                handle.child.wait().await
            }
        };
        handle.kill_group();
        status
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

/// Send `signal` to the process group led by `pgid`.
#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .ok()
        .filter(|pgid| *pgid > 1)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid process group id"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    if unsafe { libc::kill(-pgid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
