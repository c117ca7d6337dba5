//! Liveness cache over many hosts
//!
//! Owns one [`AgentClient`] per host address and refreshes their status
//! caches in serial sweeps. This is the explicit, caller-owned map the
//! protocol expects: no process-wide singleton, no internal timers. The
//! CLI drives sweeps on its own interval (`status --watch`, every 12 s
//! by default) or on demand.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::{AgentClient, HostEndpoint};
use crate::Result;

/// Suggested delay between periodic sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(12);

/// Short `/info` budget used during sweeps, so one dead host cannot
/// stall a refresh over many
pub const SWEEP_PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Host address → client session map with sweep refresh.
#[derive(Default)]
pub struct HostMonitor {
    clients: HashMap<String, AgentClient>,
}

impl HostMonitor {
    /// Empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `endpoint`, replacing any existing session for the same
    /// address (an edited host means a fresh session).
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed.
    pub fn insert(&mut self, endpoint: HostEndpoint) -> Result<()> {
        let client = AgentClient::new(endpoint)?;
        self.clients
            .insert(client.endpoint().address.clone(), client);
        Ok(())
    }

    /// Stop tracking a host.
    pub fn remove(&mut self, address: &str) -> Option<AgentClient> {
        self.clients.remove(address)
    }

    /// Session for `address`, if tracked.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&AgentClient> {
        self.clients.get(address)
    }

    /// Tracked sessions, in no particular order.
    pub fn clients(&self) -> impl Iterator<Item = &AgentClient> {
        self.clients.values()
    }

    /// Number of tracked hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no hosts are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Refresh every host in turn: a quick `/info` probe, then the
    /// running-process poll for hosts that answered. Failures are logged
    /// and leave that host's caches in their failure state; the sweep
    /// carries on.
    pub async fn sweep(&mut self) {
        for client in self.clients.values_mut() {
            let address = client.endpoint().address.clone();
            if let Err(e) = client.refresh_host_status_with(SWEEP_PROBE_TIMEOUT).await {
                tracing::debug!(%address, error = %e, "host probe failed");
                continue;
            }
            if let Err(e) = client.refresh_running_state().await {
                tracing::warn!(%address, error = %e, "running-state poll failed");
            }
        }
    }

    /// Immediately refresh one host with the full `/info` budget, for
    /// manual force-refresh. Returns the session afterwards so the
    /// caller can read the updated caches.
    pub async fn force_refresh(&mut self, address: &str) -> Option<&AgentClient> {
        let client = self.clients.get_mut(address)?;
        if client.refresh_host_status().await.is_ok() {
            if let Err(e) = client.refresh_running_state().await {
                tracing::warn!(%address, error = %e, "running-state poll failed");
            }
        }
        Some(&*client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_session_for_same_address() {
        let mut monitor = HostMonitor::new();

        let first = HostEndpoint::new("10.0.0.4");
        monitor.insert(first).expect("insert");

        let mut edited = HostEndpoint::new("10.0.0.4");
        edited.http_port = 9000;
        monitor.insert(edited).expect("insert");

        assert_eq!(monitor.len(), 1);
        let client = monitor.get("10.0.0.4").expect("tracked");
        assert_eq!(client.endpoint().http_port, 9000);
    }

    #[tokio::test]
    async fn sweep_marks_unreachable_hosts() {
        let mut monitor = HostMonitor::new();
        // Reserved TEST-NET-1 address; nothing listens there.
        let mut endpoint = HostEndpoint::new("192.0.2.1");
        endpoint.http_port = 9;
        monitor.insert(endpoint).expect("insert");

        monitor.sweep().await;

        let client = monitor.get("192.0.2.1").expect("tracked");
        assert!(!client.host_status().reachable);
        assert!(!client.running_info().running);
    }
}
