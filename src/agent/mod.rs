//! Remote agent: the host-side half of the deploy protocol
//!
//! One agent per host. The HTTP server answers the plain-text command
//! endpoints, the FTP server receives slot uploads, and between them sit
//! the slot store and the single-process supervisor.

mod ftp;
pub mod http;
pub mod process;
pub mod store;

use std::fs;
use std::sync::Arc;

use tokio::net::TcpListener;

pub use process::ProcessSupervisor;
pub use store::SlotStore;

use crate::Result;
use crate::config::AgentConfig;

/// Shared state behind the HTTP handlers.
#[derive(Debug)]
pub struct AgentState {
    /// Slot directory store
    pub store: SlotStore,

    /// The one tracked child process
    pub supervisor: ProcessSupervisor,

    /// Host display name for `/info`
    pub host_name: String,

    /// Bind address, echoed as the reserved `/info` field
    pub bind_address: String,
}

impl AgentState {
    /// State for `config`, with the host name taken from the system.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        let host_name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            store: SlotStore::new(&config.data_dir),
            supervisor: ProcessSupervisor::new(),
            host_name,
            bind_address: config.bind_address.clone(),
        }
    }
}

/// The agent service: HTTP command endpoints plus the FTP upload
/// endpoint, over one slot store.
pub struct Agent {
    config: AgentConfig,
    state: Arc<AgentState>,
}

impl Agent {
    /// Build an agent for `config`, creating the data root eagerly so a
    /// bad path fails at startup rather than on the first request.
    ///
    /// # Errors
    ///
    /// Returns an error when the data root cannot be created.
    pub fn new(config: AgentConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let state = Arc::new(AgentState::new(&config));
        Ok(Self { config, state })
    }

    /// Serve HTTP and FTP until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error when either server cannot bind.
    pub async fn run(self) -> Result<()> {
        let ftp_config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = ftp::serve(ftp_config).await {
                tracing::error!(error = %e, "ftp server stopped");
            }
        });

        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(
            %addr,
            data_dir = %self.config.data_dir.display(),
            host = %self.state.host_name,
            "agent listening"
        );

        axum::serve(listener, http::router(self.state)).await?;
        Ok(())
    }
}
