//! deploy-runner — push builds to remote hosts and run them there
//!
//! Two halves over one tiny wire protocol:
//! - the client drives an agent over HTTP GET (reserve a slot, run,
//!   kill, list, delete, describe, poll liveness) and uploads build
//!   trees over FTP;
//! - the agent serves those endpoints, stores uploaded slots as plain
//!   directories, and tracks at most one running build per host.
//!
//! ```text
//! ┌───────────────────────────────┐
//! │        deployrunner CLI       │
//! │  deploy │ run │ kill │ status │
//! └──────────────┬────────────────┘
//!                │ AgentClient / HostMonitor
//!       HTTP GET │ commands        FTP │ MKD/STOR
//! ┌──────────────▼─────────────────────▼──────────┐
//! │              deploy-runner agent              │
//! │   slot store  │  process supervisor (max 1)   │
//! └───────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod monitor;

pub use agent::Agent;
pub use client::{AgentClient, HostEndpoint, HostStatus, RunningProcessInfo};
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use monitor::HostMonitor;
