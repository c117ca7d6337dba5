//! Client for a remote deploy-runner agent
//!
//! Drives the plain-text command protocol over HTTP GET (request slots,
//! run, kill, list, delete, describe) and hands file transfer off to the
//! FTP uploader in [`ftp`]. One [`AgentClient`] is bound to one
//! [`HostEndpoint`] for its whole lifetime; replacing the endpoint means
//! replacing the client.

pub mod ftp;
pub mod status;

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

pub use status::{HostStatus, RunningProcessInfo};

use crate::{Error, Result};

/// Default agent HTTP command port
pub const DEFAULT_HTTP_PORT: u16 = 8017;

/// Default agent FTP transfer port
pub const DEFAULT_FTP_PORT: u16 = 8021;

/// Default per-request timeout for control calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Shorter timeout for the lightweight `/info` probe
pub const INFO_TIMEOUT: Duration = Duration::from_millis(500);

/// Cap on idle pooled connections, for refresh sweeps over many hosts
const MAX_IDLE_CONNECTIONS: usize = 32;

/// Marker file naming the executable the agent should launch
pub const RUN_MARKER: &str = ".run";

/// Marker file carrying the free-text build description
pub const DESC_MARKER: &str = ".desc";

/// One remote agent. Two endpoints are considered the same host when
/// their addresses match, regardless of ports or credentials.
#[derive(Debug, Clone)]
pub struct HostEndpoint {
    /// IP or hostname of the agent
    pub address: String,

    /// HTTP command port
    pub http_port: u16,

    /// FTP transfer port
    pub ftp_port: u16,

    /// Secret for the `deployrunner` FTP user; anonymous when unset
    pub secret: Option<String>,
}

impl HostEndpoint {
    /// Endpoint for `address` on the default ports, anonymous FTP.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            http_port: DEFAULT_HTTP_PORT,
            ftp_port: DEFAULT_FTP_PORT,
            secret: None,
        }
    }

    /// URL for a single-segment protocol command, e.g. `list` or
    /// `request=my_build`.
    pub(crate) fn command_url(&self, command: &str) -> String {
        format!("http://{}:{}/{}", self.address, self.http_port, command)
    }

    /// `host:port` pair for the FTP control connection.
    pub(crate) fn ftp_addr(&self) -> String {
        format!("{}:{}", self.address, self.ftp_port)
    }

    /// FTP credentials: the fixed `deployrunner` user when a secret is
    /// configured, otherwise anonymous with a device-identifying fake
    /// email as password.
    pub(crate) fn ftp_credentials(&self) -> (String, String) {
        match &self.secret {
            Some(secret) => ("deployrunner".to_string(), secret.clone()),
            None => {
                let device = hostname::get()
                    .map(|h| h.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| "unknown".to_string());
                ("anonymous".to_string(), format!("anonymous@{device}"))
            }
        }
    }
}

impl PartialEq for HostEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for HostEndpoint {}

impl std::hash::Hash for HostEndpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Session against one agent.
///
/// Holds the slot id minted by the most recent successful
/// [`request_slot`](Self::request_slot) and the status caches refreshed
/// by the poll operations in [`status`]. Not synchronized; use one
/// client per host and keep it on one task.
pub struct AgentClient {
    endpoint: HostEndpoint,
    http: reqwest::Client,

    /// Per-request timeout for control calls
    pub default_timeout: Duration,

    last_slot: String,
    pub(crate) status: HostStatus,
    pub(crate) running: RunningProcessInfo,
}

impl AgentClient {
    /// Create a session bound to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: HostEndpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            endpoint,
            http,
            default_timeout: DEFAULT_TIMEOUT,
            last_slot: String::new(),
            status: HostStatus::default(),
            running: RunningProcessInfo::default(),
        })
    }

    /// The endpoint this session is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &HostEndpoint {
        &self.endpoint
    }

    /// Slot id from the most recent successful request; empty before the
    /// first one.
    #[must_use]
    pub fn last_slot(&self) -> &str {
        &self.last_slot
    }

    /// Fetch a command URL and return the body as text.
    pub(crate) async fn get_text(&self, command: &str, timeout: Duration) -> Result<String> {
        let url = self.endpoint.command_url(command);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&url, e))?;
        response
            .text()
            .await
            .map_err(|e| Error::from_reqwest(&url, e))
    }

    /// Ask the agent to mint a fresh upload slot named after `requested`.
    ///
    /// The name is sanitized before transmission; the agent appends a
    /// timestamp so repeated requests for the same name yield distinct
    /// slots. On success the returned id also becomes
    /// [`last_slot`](Self::last_slot).
    ///
    /// # Errors
    ///
    /// Transport failures, and `Protocol` when the agent answers with
    /// `ERROR` or an empty body. `last_slot` is left untouched on error.
    pub async fn request_slot(&mut self, requested: &str) -> Result<String> {
        let name = sanitize_slot_name(requested);
        let command = format!("request={}", urlencoding::encode(&name));
        let body = self.get_text(&command, self.default_timeout).await?;

        if body.is_empty() || body == "ERROR" {
            return Err(Error::Protocol {
                url: self.endpoint.command_url(&command),
                body,
            });
        }

        tracing::debug!(slot = %body, "slot reserved");
        self.last_slot = body.clone();
        Ok(body)
    }

    /// Launch the executable named in a slot's `.run` marker.
    ///
    /// `slot` defaults to [`last_slot`](Self::last_slot) when `None`.
    /// Success is signaled only by the exact body `OK!`.
    ///
    /// # Errors
    ///
    /// Transport failures, and `Protocol` for any body other than `OK!`
    /// (the agent also answers `ERROR` while another process is running).
    pub async fn run_slot(&self, slot: Option<&str>) -> Result<()> {
        self.run_slot_with_args(slot, &[]).await
    }

    /// Like [`run_slot`](Self::run_slot) with extra command-line
    /// arguments, passed URL-safe-base64-encoded.
    ///
    /// # Errors
    ///
    /// Same as [`run_slot`](Self::run_slot).
    pub async fn run_slot_with_args(&self, slot: Option<&str>, args: &[String]) -> Result<()> {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

        let slot = slot.unwrap_or(&self.last_slot);
        let mut command = format!("run={slot}");
        if !args.is_empty() {
            let encoded = URL_SAFE_NO_PAD.encode(args.join(" "));
            command.push_str("&args=");
            command.push_str(&encoded);
        }

        let body = self.get_text(&command, self.default_timeout).await?;
        if body == "OK!" {
            tracing::info!(slot, "remote run started");
            Ok(())
        } else {
            Err(Error::Protocol {
                url: self.endpoint.command_url(&command),
                body,
            })
        }
    }

    /// Delete a slot directory tree on the agent.
    ///
    /// # Errors
    ///
    /// Transport failures, and `Protocol` for any body other than `OK`.
    pub async fn delete_slot(&self, slot: &str) -> Result<()> {
        let command = format!("delete={slot}");
        let body = self.get_text(&command, self.default_timeout).await?;
        if body == "OK" {
            tracing::info!(slot, "slot deleted");
            Ok(())
        } else {
            Err(Error::Protocol {
                url: self.endpoint.command_url(&command),
                body,
            })
        }
    }

    /// List the slot ids present on the agent, in server order.
    ///
    /// # Errors
    ///
    /// Transport failures only; an empty body is an empty list.
    pub async fn list_slots(&self) -> Result<Vec<String>> {
        let body = self.get_text("list", self.default_timeout).await?;
        Ok(body
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Fetch a slot's description, verbatim. The agent answers with an
    /// empty string when the slot carries no `.desc` marker.
    ///
    /// # Errors
    ///
    /// Transport failures only.
    pub async fn slot_description(&self, slot: &str) -> Result<String> {
        let command = format!("builddesc={slot}");
        self.get_text(&command, self.default_timeout).await
    }

    /// Fire-and-forget kill of the agent's tracked process.
    ///
    /// Skipped when the cached running state says nothing is running.
    /// The cache is not updated here; re-poll with
    /// [`refresh_running_state`](Self::refresh_running_state) afterwards.
    ///
    /// # Errors
    ///
    /// Transport failures only; the response body is ignored.
    pub async fn kill_running_process(&self) -> Result<()> {
        if !self.running.running {
            tracing::debug!("no tracked process, kill skipped");
            return Ok(());
        }
        let _ = self.get_text("kill", self.default_timeout).await?;
        Ok(())
    }
}

/// Write the `.run` marker naming the executable to launch, into the
/// local build directory so it is uploaded with the tree.
///
/// # Errors
///
/// Local filesystem failures; not retried.
pub fn create_run_file(build_dir: &Path, executable: &str) -> Result<()> {
    write_marker(build_dir, RUN_MARKER, executable)
}

/// Write the `.desc` marker carrying the build description.
///
/// # Errors
///
/// Local filesystem failures; not retried.
pub fn create_desc_file(build_dir: &Path, description: &str) -> Result<()> {
    write_marker(build_dir, DESC_MARKER, description)
}

/// Single-line, newline-terminated marker file.
fn write_marker(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let mut file = fs::File::create(dir.join(name))?;
    writeln!(file, "{contents}")?;
    Ok(())
}

/// Characters invalid in a filesystem path component, plus space.
/// Runs collapse to one `_`; a trailing dot-run (with any adjacent
/// invalid characters) collapses the same way.
static INVALID_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[\x00-\x1f"<>|:*?\\/ ]*\.+$)|(?:[\x00-\x1f"<>|:*?\\/ ]+)"#)
        .expect("invalid-name pattern is a constant")
});

/// Sanitize a requested slot name into a safe path component.
#[must_use]
pub fn sanitize_slot_name(name: &str) -> String {
    INVALID_NAME.replace_all(name, "_").into_owned()
}
