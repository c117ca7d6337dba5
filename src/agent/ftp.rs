//! FTP upload endpoint
//!
//! Serves the data root over FTP so clients can `MKD`/`STOR` into their
//! reserved slots. Anonymous by default; when a password is configured,
//! only the fixed `deployrunner` user with that password may log in.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use libunftp::auth::{AuthenticationError, Authenticator, Credentials, DefaultUser};
use unftp_sbe_fs::{Filesystem, ServerExt as _};

use crate::config::AgentConfig;
use crate::{Error, Result};

/// Serve FTP for `config` until the task is dropped.
///
/// # Errors
///
/// Returns an error when the server cannot be built or bound.
pub(crate) async fn serve(config: AgentConfig) -> Result<()> {
    let bind = format!("{}:{}", config.bind_address, config.ftp_port);
    let passive: RangeInclusive<u16> = config.passive_ports[0]..=config.passive_ports[1];
    let root = config.data_dir.clone();

    let builder = match config.ftp_password {
        Some(secret) => libunftp::Server::with_authenticator(
            Box::new(move || match Filesystem::new(root.clone()) {
                Ok(fs) => fs,
                Err(e) => panic!("cannot open ftp root {}: {e}", root.display()),
            }),
            Arc::new(SecretAuthenticator { secret }),
        ),
        None => libunftp::Server::with_fs(root),
    };

    let server = builder
        .greeting("deploy-runner agent ready")
        .passive_ports(passive)
        .build()
        .map_err(|e| Error::Agent(format!("ftp server: {e}")))?;

    tracing::info!(%bind, "ftp server listening");
    server
        .listen(bind)
        .await
        .map_err(|e| Error::Agent(format!("ftp server: {e}")))
}

/// Fixed-user authenticator for the `deployrunner` account.
struct SecretAuthenticator {
    secret: String,
}

impl fmt::Debug for SecretAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretAuthenticator").finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator<DefaultUser> for SecretAuthenticator {
    async fn authenticate(
        &self,
        username: &str,
        creds: &Credentials,
    ) -> std::result::Result<DefaultUser, AuthenticationError> {
        if username != "deployrunner" {
            return Err(AuthenticationError::BadUser);
        }
        if creds.password.as_deref() == Some(self.secret.as_str()) {
            Ok(DefaultUser)
        } else {
            Err(AuthenticationError::BadPassword)
        }
    }
}
