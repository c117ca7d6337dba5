//! Agent configuration
//!
//! Loaded from a TOML file (`deployrunner.toml` next to the binary by
//! default); every field has a sensible default so the agent runs with
//! no config file at all.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::client::{DEFAULT_FTP_PORT, DEFAULT_HTTP_PORT};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "deployrunner.toml";

/// Agent-side configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Address both servers bind to
    pub bind_address: String,

    /// HTTP command port
    pub http_port: u16,

    /// FTP transfer port
    pub ftp_port: u16,

    /// Secret for the `deployrunner` FTP user; anonymous access when
    /// unset
    pub ftp_password: Option<String>,

    /// Root directory holding the slot trees
    pub data_dir: PathBuf,

    /// Inclusive port range for passive-mode FTP data connections
    pub passive_ports: [u16; 2],
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            ftp_port: DEFAULT_FTP_PORT,
            ftp_password: None,
            data_dir: PathBuf::from("data"),
            passive_ports: [49152, 49407],
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load from `path` when given; otherwise from
    /// [`DEFAULT_CONFIG_FILE`] if present, else the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_ports() {
        let config = AgentConfig::default();
        assert_eq!(config.http_port, 8017);
        assert_eq!(config.ftp_port, 8021);
        assert!(config.ftp_password.is_none());
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            http-port = 9017
            ftp-password = "hunter2"
            "#,
        )
        .expect("parse");

        assert_eq!(config.http_port, 9017);
        assert_eq!(config.ftp_port, 8021);
        assert_eq!(config.ftp_password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<AgentConfig>("htpp-port = 9017").is_err());
    }
}
