//! Trust-on-first-use host key checking.
//!
//! Unknown host keys are accepted and appended to the known-hosts file
//! without prompting. A key that differs from a remembered one is
//! rejected.

use std::fs;
use std::path::{Path, PathBuf};

use ssh2::{CheckResult, KnownHostFileKind, Session};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Comment written next to learned keys.
const LEARNED_COMMENT: &str = "added by sshelf";

/// What happened to the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyDecision {
    /// The key was already known.
    Matched,
    /// The key was unknown and has been remembered.
    Learned,
}

/// Host key policy backed by an OpenSSH known-hosts file.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    /// Creates a policy using the given known-hosts file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns `~/.ssh/known_hosts`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ssh")
            .join("known_hosts")
    }

    /// Returns the known-hosts file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks the host key of a handshaken session.
    ///
    /// # Errors
    /// `Connection` on a key mismatch or if the key cannot be read or stored.
    pub fn verify(&self, session: &Session, host: &str, port: u16) -> Result<HostKeyDecision> {
        let mut known = session
            .known_hosts()
            .map_err(|e| Error::Connection(format!("known hosts unavailable: {}", e)))?;

        if self.path.exists() {
            known
                .read_file(&self.path, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    Error::Connection(format!("cannot read {}: {}", self.path.display(), e))
                })?;
        }

        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| Error::Connection("server sent no host key".to_string()))?;

        match known.check_port(host, port, key) {
            CheckResult::Match => Ok(HostKeyDecision::Matched),
            CheckResult::NotFound => {
                known
                    .add(&entry_name(host, port), key, LEARNED_COMMENT, key_type.into())
                    .map_err(|e| Error::Connection(format!("cannot remember host key: {}", e)))?;

                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                known
                    .write_file(&self.path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| {
                        Error::Connection(format!("cannot write {}: {}", self.path.display(), e))
                    })?;

                info!("Learned host key for {}", entry_name(host, port));
                Ok(HostKeyDecision::Learned)
            }
            CheckResult::Mismatch => {
                warn!("Host key mismatch for {}", entry_name(host, port));
                Err(Error::Connection(format!(
                    "host key for {} does not match {}",
                    entry_name(host, port),
                    self.path.display()
                )))
            }
            CheckResult::Failure => Err(Error::Connection(
                "host key check failed".to_string(),
            )),
        }
    }
}

impl Default for KnownHosts {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

/// Returns the known-hosts name for a host: `host` on port 22, `[host]:port` otherwise.
#[must_use]
pub fn entry_name(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}
