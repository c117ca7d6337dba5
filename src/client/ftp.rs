//! FTP tree upload
//!
//! Mirrors a local build directory into a reserved slot on the agent:
//! one MKD per directory, one STOR per file, streamed in fixed-size
//! chunks over a single binary, passive-mode control connection.
//!
//! Uploads are synchronous and have no timeout beyond the OS socket
//! defaults; call from a blocking context. There is no rollback — a
//! failed upload leaves the slot partially populated, and the caller is
//! expected to compensate with
//! [`delete_slot`](super::AgentClient::delete_slot).

use std::fs::File;
use std::io::{Read as _, Write as _};
use std::path::Path;

use suppaftp::FtpStream;
use suppaftp::types::FileType;
use walkdir::WalkDir;

use super::AgentClient;
use crate::{Error, Result};

/// STOR chunk size in bytes
pub const UPLOAD_CHUNK_SIZE: usize = 2048;

impl AgentClient {
    /// Upload the tree under `local_dir` into `slot` on the agent.
    ///
    /// Directories are created first, then files are streamed, both in
    /// plain enumeration order. `progress` receives the fraction of
    /// files uploaded, from `0.0` to `1.0`.
    ///
    /// # Errors
    ///
    /// Any enumeration, filesystem, or FTP failure aborts the whole
    /// operation; already-transferred files stay on the agent.
    pub fn upload_tree(
        &self,
        slot: &str,
        local_dir: &Path,
        mut progress: Option<&mut dyn FnMut(f32)>,
    ) -> Result<()> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in WalkDir::new(local_dir).min_depth(1) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            } else if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let (user, password) = self.endpoint().ftp_credentials();
        let mut ftp = FtpStream::connect(self.endpoint().ftp_addr())?;
        ftp.login(&user, &password)?;
        ftp.transfer_type(FileType::Binary)?;

        if let Some(report) = progress.as_deref_mut() {
            report(0.0);
        }

        for dir in &dirs {
            ftp.mkdir(&remote_path(slot, local_dir, dir)?)?;
        }

        let total = files.len();
        for (index, file) in files.iter().enumerate() {
            let remote = remote_path(slot, local_dir, file)?;
            tracing::debug!(%remote, "uploading");
            store_file(&mut ftp, &remote, file)?;

            if let Some(report) = progress.as_deref_mut() {
                #[allow(clippy::cast_precision_loss)]
                report((index + 1) as f32 / total as f32);
            }
        }

        ftp.quit()?;
        tracing::info!(slot, files = total, dirs = dirs.len(), "upload complete");
        Ok(())
    }
}

/// Remote path for a local entry: `<slot>/<relative path>`, with forward
/// slashes regardless of the local platform.
fn remote_path(slot: &str, base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    let mut remote = String::from(slot);
    for component in relative.components() {
        remote.push('/');
        remote.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(remote)
}

/// STOR one file, streaming `UPLOAD_CHUNK_SIZE` bytes at a time.
fn store_file(ftp: &mut FtpStream, remote: &str, local: &Path) -> Result<()> {
    let mut reader = File::open(local)?;
    let mut stream = ftp.put_with_stream(remote)?;

    let mut buffer = [0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        stream.write_all(&buffer[..read])?;
    }

    ftp.finalize_put_stream(stream)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths_are_slot_rooted_and_slash_separated() {
        let base = Path::new("/tmp/build");
        let file = Path::new("/tmp/build/Data/level0/chunk.bin");
        let remote = remote_path("game-260823-101530", base, file).expect("remote path");
        assert_eq!(remote, "game-260823-101530/Data/level0/chunk.bin");
    }

    #[test]
    fn remote_path_outside_base_is_rejected() {
        let base = Path::new("/tmp/build");
        assert!(remote_path("slot", base, Path::new("/etc/passwd")).is_err());
    }
}
