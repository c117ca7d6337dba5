//! Host liveness and running-process polling
//!
//! Both refresh operations derive their state purely from the most
//! recent poll. A failed poll never leaves stale positive state behind:
//! the running-process sentinels are reset before each `/runinfo` call,
//! and any `/info` failure marks the host unreachable.

use std::time::Duration;

use super::{AgentClient, INFO_TIMEOUT};
use crate::{Error, Result};

/// Literal body the agent answers on `/runinfo` when idle
pub(crate) const NO_RUNNING_PROCESS: &str = "No running process";

/// Latest known host identity, from the `/info` probe.
#[derive(Debug, Clone, Default)]
pub struct HostStatus {
    /// Host display name, upper-cased
    pub host_name: String,

    /// OS description reported by the agent
    pub os: String,

    /// Whether the most recent probe succeeded. False until the first
    /// successful poll ever completes.
    pub reachable: bool,
}

/// Latest known running-process state, from the `/runinfo` poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcessInfo {
    /// Whether a tracked child process is running
    pub running: bool,

    /// Executable name, empty when nothing is running
    pub executable: String,

    /// Process id, `-1` when unknown or not running
    pub pid: i32,
}

impl Default for RunningProcessInfo {
    fn default() -> Self {
        Self {
            running: false,
            executable: String::new(),
            pid: -1,
        }
    }
}

impl AgentClient {
    /// Cached host status from the most recent `/info` poll.
    #[must_use]
    pub const fn host_status(&self) -> &HostStatus {
        &self.status
    }

    /// Cached running-process state from the most recent `/runinfo` poll.
    #[must_use]
    pub const fn running_info(&self) -> &RunningProcessInfo {
        &self.running
    }

    /// Probe `/info` with the default 500 ms budget.
    ///
    /// # Errors
    ///
    /// See [`refresh_host_status_with`](Self::refresh_host_status_with).
    pub async fn refresh_host_status(&mut self) -> Result<HostStatus> {
        self.refresh_host_status_with(INFO_TIMEOUT).await
    }

    /// Probe `/info` and update the cached [`HostStatus`].
    ///
    /// A clean 3-line body (`name`, reserved, `os`) marks the host
    /// reachable and updates the identity fields, with the name
    /// upper-cased. Any failure marks it unreachable: transport errors,
    /// and also malformed bodies (fail closed rather than preserving the
    /// previous flag).
    ///
    /// # Errors
    ///
    /// Transport failures, and `Protocol` for bodies that are not
    /// exactly 3 lines. The cache is updated before the error returns.
    pub async fn refresh_host_status_with(&mut self, timeout: Duration) -> Result<HostStatus> {
        match self.get_text("info", timeout).await {
            Ok(body) => {
                let trimmed = body.strip_suffix('\n').unwrap_or(&body);
                let lines: Vec<&str> = trimmed.split('\n').collect();
                if lines.len() == 3 {
                    self.status = HostStatus {
                        host_name: lines[0].to_uppercase(),
                        os: lines[2].to_string(),
                        reachable: true,
                    };
                    Ok(self.status.clone())
                } else {
                    self.status.reachable = false;
                    Err(Error::Protocol {
                        url: self.endpoint.command_url("info"),
                        body,
                    })
                }
            }
            Err(e) => {
                self.status.reachable = false;
                Err(e)
            }
        }
    }

    /// Poll `/runinfo` and update the cached [`RunningProcessInfo`].
    ///
    /// The sentinels (`running = false`, empty name, pid `-1`) are reset
    /// before the request goes out, so a failed poll reads as "nothing
    /// running" rather than as stale positive state.
    ///
    /// # Errors
    ///
    /// Transport failures, and `Parse` when the body is neither the idle
    /// sentinel nor an executable line followed by an integer pid.
    pub async fn refresh_running_state(&mut self) -> Result<RunningProcessInfo> {
        self.running = RunningProcessInfo::default();

        let body = self.get_text("runinfo", self.default_timeout).await?;
        if body == NO_RUNNING_PROCESS {
            return Ok(self.running.clone());
        }

        let url = self.endpoint.command_url("runinfo");
        let (executable, pid) = parse_runinfo(&body).map_err(|reason| Error::Parse { url, reason })?;

        self.running = RunningProcessInfo {
            running: true,
            executable,
            pid,
        };
        Ok(self.running.clone())
    }
}

/// Split a non-idle `/runinfo` body into executable name and pid.
fn parse_runinfo(body: &str) -> std::result::Result<(String, i32), String> {
    let mut lines = body.split('\n');
    let executable = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| "missing executable line".to_string())?;
    let pid_line = lines.next().ok_or_else(|| "missing pid line".to_string())?;
    let pid = pid_line
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid pid {pid_line:?}: {e}"))?;
    Ok((executable.to_string(), pid))
}
