//! droidcast-capture: owns the external screen-capture process.
//!
//! # Lifecycle
//!
//! ```text
//! CaptureProcess::start ──► read_chunk()* ──► finish()   (end of stream: exit status + stderr)
//!                                        └──► release()  (cancellation / error: kill + reap,
//!                                                         also after an abandoned finish())
//!                                        └──► drop       (kill, reaped by tokio in background)
//! ```
//!
//! Standard error is drained on a background task for the whole life of the
//! process. The collected text is what [`StreamError::Process`] reports.

use std::process::Stdio;
use std::time::Duration;

use droidcast_core::{CaptureCommand, StreamError};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `finish` waits for the stderr pipe to close once the process has exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

// ── CaptureProcess ────────────────────────────────────────────────────────────

/// A running capture process and its standard output.
///
/// Must be created inside a tokio runtime. Dropping the handle kills the
/// process if it is still running.
pub struct CaptureProcess {
    program: String,
    child: Option<Child>,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
}

impl CaptureProcess {
    /// Spawn `command` with stdout and stderr piped and stdin closed.
    pub fn start(command: &CaptureCommand) -> Result<Self, StreamError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamError::Launch { program: command.program.clone(), source })?;

        let launch_error = |what: &str| StreamError::Launch {
            program: command.program.clone(),
            source: std::io::Error::other(format!("{what} was not captured")),
        };
        let stdout = child.stdout.take().ok_or_else(|| launch_error("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| launch_error("stderr"))?;

        let stderr_task = tokio::spawn(async move {
            let mut raw = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut raw).await {
                debug!("stderr drain stopped: {}", e);
            }
            String::from_utf8_lossy(&raw).trim().to_string()
        });

        info!("Capture process started (pid={:?}): {}", child.id(), command);

        Ok(Self {
            program: command.program.clone(),
            child: Some(child),
            stdout,
            stderr_task: Some(stderr_task),
        })
    }

    /// OS process id, or `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Read up to `buf.len()` bytes of standard output. `Ok(0)` means end of stream.
    ///
    /// Cancel safe: dropping the future before completion loses no data.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf).await
    }

    /// Wait for the process to exit after its output reached end of stream.
    ///
    /// A non-zero exit status, or any text on standard error, is reported as
    /// [`StreamError::Process`].
    ///
    /// Cancel safe: if the future is dropped before the process exits, the
    /// handle still owns it and [`release`](Self::release) can kill it.
    pub async fn finish(&mut self) -> Result<(), StreamError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child.wait().await?;
        self.child = None;
        let stderr = self.collect_stderr().await;

        info!("Capture process exited: {} (stderr {} bytes)", status, stderr.len());

        if !status.success() || !stderr.is_empty() {
            return Err(StreamError::Process { code: status.code(), stderr });
        }
        Ok(())
    }

    /// Terminate the process if it is still running and reap it.
    pub async fn release(mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!("Capture process already exited: {}", status),
            Ok(None) => {
                info!("Killing capture process (pid={:?})", child.id());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill capture process: {}", e);
                }
            }
            Err(e) => warn!("Failed to query capture process status: {}", e),
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    async fn collect_stderr(&mut self) -> String {
        let Some(task) = self.stderr_task.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_GRACE, task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("stderr drain task failed: {}", e);
                String::new()
            }
            Err(_) => {
                // A grandchild (e.g. a freshly forked adb server) can keep the pipe open.
                debug!("stderr still open {:?} after exit, giving up on it", STDERR_GRACE);
                String::new()
            }
        }
    }
}

impl Drop for CaptureProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                warn!("Capture process dropped while running, killing (pid={:?})", child.id());
                let _ = child.start_kill();
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
