//! Subprocess resource handle.

use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::services::agent_pool::ResourceHandle;

/// Handle to a child process, terminated with `SIGTERM` when released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send `SIGTERM`. A process that already exited counts as terminated.
    #[cfg(unix)]
    pub fn terminate(&self) -> DomainResult<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(self.pid)
            .map_err(|_| DomainError::ExecutionFailed(format!("invalid pid {}", self.pid)))?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid = self.pid, "Sent SIGTERM");
                Ok(())
            }
            Err(nix::Error::ESRCH) => {
                debug!(pid = self.pid, "Process already exited");
                Ok(())
            }
            Err(e) => Err(DomainError::ExecutionFailed(format!(
                "failed to signal process {}: {e}",
                self.pid
            ))),
        }
    }

    #[cfg(not(unix))]
    pub fn terminate(&self) -> DomainResult<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(DomainError::ExecutionFailed(format!(
                "taskkill failed for process {}",
                self.pid
            )))
        }
    }
}

impl ResourceHandle for ProcessHandle {
    fn describe(&self) -> String {
        format!("process {}", self.pid)
    }

    fn release(&self) -> DomainResult<()> {
        self.terminate()
    }
}
