//! Single tracked child process
//!
//! The agent runs at most one build at a time; the run-status endpoint
//! is a singleton, not a per-slot map. Every status query reaps the
//! child with `try_wait`, so a finished build reads as "nothing running"
//! without a background waiter.

use std::path::Path;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Supervisor owning the one tracked child.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    current: Mutex<Option<TrackedChild>>,
}

#[derive(Debug)]
struct TrackedChild {
    executable: String,
    pid: i32,
    child: Child,
}

impl ProcessSupervisor {
    /// Supervisor with no tracked child.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `executable` (a file inside `workdir`) with `args`, as the
    /// tracked child.
    ///
    /// # Errors
    ///
    /// Rejected while a previous child is still running; also fails when
    /// the executable is missing or the spawn itself fails.
    pub async fn spawn(&self, workdir: &Path, executable: &str, args: &[String]) -> Result<i32> {
        let mut current = self.current.lock().await;

        if let Some(tracked) = current.as_mut() {
            if tracked.child.try_wait()?.is_none() {
                return Err(Error::Agent(format!(
                    "process {} (pid {}) is still running",
                    tracked.executable, tracked.pid
                )));
            }
        }

        let target = workdir.join(executable);
        if !target.is_file() {
            return Err(Error::Agent(format!(
                "executable not found: {}",
                target.display()
            )));
        }

        #[cfg(unix)]
        make_executable(&target)?;

        let child = Command::new(&target)
            .args(args)
            .current_dir(workdir)
            .spawn()?;
        let pid = child.id().and_then(|p| i32::try_from(p).ok()).unwrap_or(-1);

        tracing::info!(executable, pid, "process started");
        *current = Some(TrackedChild {
            executable: executable.to_string(),
            pid,
            child,
        });
        Ok(pid)
    }

    /// Executable name and pid of the tracked child, if it is still
    /// running. Reaps a finished child as a side effect.
    pub async fn status(&self) -> Option<(String, i32)> {
        let mut current = self.current.lock().await;
        let tracked = current.as_mut()?;
        match tracked.child.try_wait() {
            Ok(None) => Some((tracked.executable.clone(), tracked.pid)),
            _ => {
                *current = None;
                None
            }
        }
    }

    /// Kill the tracked child if one is running. Idempotent: returns
    /// `None` when nothing was there to kill.
    pub async fn kill(&self) -> Option<(String, i32)> {
        let mut current = self.current.lock().await;
        let mut tracked = current.take()?;

        if let Ok(Some(_)) = tracked.child.try_wait() {
            return None;
        }

        if let Err(e) = tracked.child.kill().await {
            tracing::warn!(pid = tracked.pid, error = %e, "kill failed");
        }
        tracing::info!(executable = %tracked.executable, pid = tracked.pid, "process killed");
        Some((tracked.executable, tracked.pid))
    }
}

/// Uploaded files lose their mode bits in transfer; make the run target
/// executable before spawning it.
#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}
