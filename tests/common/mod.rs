//! Test agent bootstrap helpers

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use deploy_runner::agent::{Agent, AgentState, http};
use deploy_runner::{AgentConfig, HostEndpoint};

/// An in-process agent HTTP server over a temp data directory.
pub struct TestAgent {
    pub data: TempDir,
    pub endpoint: HostEndpoint,
    server: JoinHandle<()>,
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Serve the real agent router on an ephemeral port (no FTP).
pub async fn spawn_agent() -> TestAgent {
    let data = tempfile::tempdir().expect("tempdir");
    let config = AgentConfig {
        bind_address: "127.0.0.1".to_string(),
        data_dir: data.path().to_path_buf(),
        ..AgentConfig::default()
    };
    let state = Arc::new(AgentState::new(&config));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let server = tokio::spawn(async move {
        axum::serve(listener, http::router(state))
            .await
            .expect("serve");
    });

    let mut endpoint = HostEndpoint::new("127.0.0.1");
    endpoint.http_port = port;
    TestAgent {
        data,
        endpoint,
        server,
    }
}

/// An agent that answers every command with one fixed body, for testing
/// the client's exact-body rules.
pub struct ScriptedAgent {
    pub endpoint: HostEndpoint,
    server: JoinHandle<()>,
}

impl Drop for ScriptedAgent {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_scripted(body: &'static str) -> ScriptedAgent {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let app = axum::Router::new().route(
        "/{command}",
        axum::routing::get(move || async move { body }),
    );
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let mut endpoint = HostEndpoint::new("127.0.0.1");
    endpoint.http_port = port;
    ScriptedAgent { endpoint, server }
}

/// A full agent (HTTP + FTP) on freshly picked free ports.
pub struct FullAgent {
    pub data: TempDir,
    pub endpoint: HostEndpoint,
    server: JoinHandle<()>,
}

impl Drop for FullAgent {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_full_agent() -> FullAgent {
    let data = tempfile::tempdir().expect("tempdir");
    let http_port = free_port();
    let ftp_port = free_port();

    let config = AgentConfig {
        bind_address: "127.0.0.1".to_string(),
        http_port,
        ftp_port,
        data_dir: data.path().to_path_buf(),
        ..AgentConfig::default()
    };

    let agent = Agent::new(config).expect("agent");
    let server = tokio::spawn(async move {
        agent.run().await.expect("agent run");
    });

    // Give both servers a moment to bind.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let mut endpoint = HostEndpoint::new("127.0.0.1");
    endpoint.http_port = http_port;
    endpoint.ftp_port = ftp_port;
    FullAgent {
        data,
        endpoint,
        server,
    }
}

/// Pick a currently free TCP port. Racy by nature, fine for tests.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}
