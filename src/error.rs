//! Error types for deploy-runner

use thiserror::Error;

/// Result type alias for deploy-runner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving or serving the agent protocol
#[derive(Debug, Error)]
pub enum Error {
    /// Request did not complete within its timeout
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Connection-level failure (refused, DNS, reset)
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The agent answered, but with an unexpected body
    #[error("unexpected response from {url}: {body:?}")]
    Protocol { url: String, body: String },

    /// The agent answered with a body we could not parse
    #[error("malformed response from {url}: {reason}")]
    Parse { url: String, reason: String },

    /// FTP transfer error
    #[error("ftp error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    /// Local filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Agent-side failure (slot store, process supervisor, servers)
    #[error("agent error: {0}")]
    Agent(String),
}

impl Error {
    /// Classify a `reqwest` failure for `url` into the transport taxonomy.
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Whether this error is a transport-level failure (timeout included),
    /// as opposed to the agent answering with something unexpected.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}
