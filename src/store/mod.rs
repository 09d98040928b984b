//! # Remote File Store Module
//!
//! Session-oriented client for the remote file store used for both
//! configuration sync and telemetry delivery.
//!
//! This module handles:
//! - Connecting with a fixed number of fixed-delay retries
//! - Directory navigation (optionally creating missing directories)
//! - File transfer primitives: download, upload, append (file- and
//!   bytes-backed), list, last-modified query
//!
//! A session is single-use per process invocation: `Disconnected →
//! Connected → Disconnected`, no mid-session reconnects. Every operation
//! returns a typed error; the per-cycle orchestrator decides whether to
//! swallow it, so a flaky store never aborts a cycle.
//!
//! Note the retry policy here is a *fixed* delay between attempts, unlike
//! the exponential backoff used when applying schedules. The two are
//! separate policies on purpose: schedule apply failures are usually RTC
//! drift and benefit from widening gaps, while connect failures are
//! link-establishment hiccups that either clear quickly or not at all.

use std::fs;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use suppaftp::FtpStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{FieldcamError, Result};

/// Connection retry policy for the store (fixed delay between attempts).
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Remote file store session
///
/// Wraps one FTP control connection for the duration of a wake cycle.
pub struct FileStore {
    ftp: Option<FtpStream>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}

impl FileStore {
    /// A store session that never connected. Every operation yields
    /// [`FieldcamError::StoreUnavailable`]; used when no host is
    /// configured.
    pub fn disconnected() -> Self {
        Self { ftp: None }
    }

    /// Connect to the store with the default retry policy.
    ///
    /// Never fails: after the retries are exhausted the returned session
    /// reports `connected() == false` and every operation on it yields
    /// [`FieldcamError::StoreUnavailable`].
    pub async fn connect(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self::connect_with_policy(host, port, username, password, ConnectPolicy::default()).await
    }

    /// Connect to the store with an explicit retry policy.
    pub async fn connect_with_policy(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        policy: ConnectPolicy,
    ) -> Self {
        for attempt in 1..=policy.max_attempts {
            match Self::try_connect(host, port, username, password, policy.timeout) {
                Ok(ftp) => {
                    info!("Connected to file store at {}:{}", host, port);
                    return Self { ftp: Some(ftp) };
                }
                Err(e) => {
                    warn!(
                        "Could not connect to file store: {}, attempt {}/{} failed",
                        e, attempt, policy.max_attempts
                    );
                    if attempt < policy.max_attempts {
                        sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        warn!("Failed to connect to the file store after maximum retries");
        Self { ftp: None }
    }

    fn try_connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<FtpStream> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| FieldcamError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address found for {host}:{port}"),
            )))?;

        let mut ftp = FtpStream::connect_timeout(addr, timeout)?;
        ftp.login(username, password)?;
        Ok(ftp)
    }

    /// Whether a store session is established.
    pub fn connected(&self) -> bool {
        self.ftp.is_some()
    }

    fn session(&mut self) -> Result<&mut FtpStream> {
        self.ftp.as_mut().ok_or(FieldcamError::StoreUnavailable)
    }

    /// Change the current directory on the store, optionally creating it
    /// when absent.
    pub fn change_directory(&mut self, directory: &str, create: bool) -> Result<()> {
        let entries = self.list_files()?;

        let ftp = self.session()?;
        if create && !entries.iter().any(|e| e == directory) {
            ftp.mkdir(directory)?;
            info!("Created store directory {}", directory);
        }

        ftp.cwd(directory)?;
        debug!("Changed store directory to {}", directory);
        Ok(())
    }

    /// Download a remote file and write it to `local_path`.
    pub fn download_file(&mut self, filename: &str, local_path: &Path) -> Result<()> {
        let data = self.session()?.retr_as_buffer(filename)?;
        fs::write(local_path, data.into_inner())?;
        info!("Downloaded {} to {}", filename, local_path.display());
        Ok(())
    }

    /// Upload a local file to the store under `filename`.
    ///
    /// With `delete_after_upload` the local copy is removed once the
    /// transfer succeeded.
    pub fn upload_file(
        &mut self,
        filename: &str,
        local_path: &Path,
        delete_after_upload: bool,
    ) -> Result<()> {
        let mut file = fs::File::open(local_path)?;
        self.session()?.put_file(filename, &mut file)?;
        info!("Uploaded {}", filename);

        if delete_after_upload {
            info!("Deleting local file {}", local_path.display());
            fs::remove_file(local_path)?;
        }
        Ok(())
    }

    /// Append a local file's contents onto a remote file.
    pub fn append_file(
        &mut self,
        filename: &str,
        local_path: &Path,
        delete_after_upload: bool,
    ) -> Result<()> {
        let data = fs::read(local_path)?;
        self.append_file_from_bytes(filename, &data)?;

        if delete_after_upload {
            info!("Deleting local file {}", local_path.display());
            fs::remove_file(local_path)?;
        }
        Ok(())
    }

    /// Append an in-memory buffer onto a remote file (no disk round-trip).
    pub fn append_file_from_bytes(&mut self, filename: &str, data: &[u8]) -> Result<()> {
        let mut reader = Cursor::new(data);
        self.session()?.append_file(filename, &mut reader)?;
        info!("Appended {} bytes to {}", data.len(), filename);
        Ok(())
    }

    /// Retrieve a remote file into memory.
    pub fn get_file_as_bytes(&mut self, filename: &str) -> Result<Bytes> {
        let data = self.session()?.retr_as_buffer(filename)?;
        Ok(Bytes::from(data.into_inner()))
    }

    /// List entries in the current store directory.
    pub fn list_files(&mut self) -> Result<Vec<String>> {
        Ok(self.session()?.nlst(None)?)
    }

    /// Last modification time of a remote file.
    ///
    /// Callers display this for informational purposes only and typically
    /// fall back to the current local time on failure.
    pub fn get_file_last_modified_date(&mut self, filename: &str) -> Result<NaiveDateTime> {
        Ok(self.session()?.mdtm(filename)?)
    }

    /// Close the store session. The session cannot be reused afterwards.
    pub fn quit(&mut self) -> Result<()> {
        if let Some(mut ftp) = self.ftp.take() {
            ftp.quit()?;
            info!("File store connection closed");
        }
        Ok(())
    }
}
