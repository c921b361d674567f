//! Authentication strategy selection.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::store::ServerProfile;

/// Credential used to authenticate one connection.
///
/// When a profile carries both a password and a key path the password
/// wins, matching how profiles have always been connected.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Password authentication.
    Password { secret: String },
    /// Public key authentication from a private key file.
    Key { path: PathBuf },
}

impl AuthStrategy {
    /// Picks the strategy for a profile.
    ///
    /// # Errors
    /// `Configuration` if the profile has neither a password nor a key path.
    pub fn resolve(profile: &ServerProfile) -> Result<Self> {
        if let Some(ref secret) = profile.password {
            return Ok(Self::Password {
                secret: secret.clone(),
            });
        }
        if let Some(ref path) = profile.private_key_path {
            return Ok(Self::Key {
                path: PathBuf::from(path),
            });
        }
        Err(Error::Configuration(format!(
            "no credential provided for server {}",
            profile.id
        )))
    }

    /// Returns a short name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Key { .. } => "key",
        }
    }
}

// Keeps secrets out of logs and panics.
impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f.write_str("Password { secret: <redacted> }"),
            Self::Key { path } => f.debug_struct("Key").field("path", path).finish(),
        }
    }
}
