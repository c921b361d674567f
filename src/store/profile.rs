//! Server profile data structures.
//!
//! A profile is the persisted set of connection parameters for one
//! remote host. Profiles are created, mutated and removed only through
//! [`super::CredentialStore`].

use serde::Serialize;

use crate::error::{Error, Result};

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// A persisted server profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerProfile {
    /// Store-assigned identifier.
    pub id: i64,
    /// Hostname or IP address.
    pub hostname: String,
    /// SSH port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Password, if password authentication is used. Never serialized.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Private key file, if key authentication is used.
    pub private_key_path: Option<String>,
}

impl ServerProfile {
    /// Returns `user@host`, with `:port` appended when it is not 22.
    #[must_use]
    pub fn connection_string(&self) -> String {
        if self.port == DEFAULT_PORT {
            format!("{}@{}", self.username, self.hostname)
        } else {
            format!("{}@{}:{}", self.username, self.hostname, self.port)
        }
    }

    /// Returns which credential connect will use.
    #[must_use]
    pub fn auth_label(&self) -> &'static str {
        if self.password.is_some() {
            "password"
        } else if self.private_key_path.is_some() {
            "key"
        } else {
            "none"
        }
    }

    /// Returns true if both a password and a key path are stored.
    #[must_use]
    pub fn has_dual_credentials(&self) -> bool {
        self.password.is_some() && self.private_key_path.is_some()
    }

    /// Returns the profile fields without the id.
    #[must_use]
    pub fn fields(&self) -> NewProfile {
        NewProfile {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            private_key_path: self.private_key_path.clone(),
        }
    }

    fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(ref hostname) = update.hostname {
            self.hostname = hostname.clone();
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(ref username) = update.username {
            self.username = username.clone();
        }
        if let Some(ref password) = update.password {
            self.password = normalize(password.clone());
        }
        if let Some(ref key) = update.private_key_path {
            self.private_key_path = normalize(key.clone());
        }
    }
}

/// Profile fields for [`super::CredentialStore::add`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewProfile {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
}

impl NewProfile {
    /// Creates a profile with no credential set.
    #[must_use]
    pub fn new(hostname: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: username.into(),
            password: None,
            private_key_path: None,
        }
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the private key path.
    #[must_use]
    pub fn with_key(mut self, path: impl Into<String>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Drops empty optional credentials. Required fields are stored as given.
    pub(crate) fn normalized(mut self) -> Self {
        self.password = normalize(self.password);
        self.private_key_path = normalize(self.private_key_path);
        self
    }

    /// Checks required fields and, when `strict`, the single-credential rule.
    pub fn validate(&self, strict: bool) -> Result<()> {
        validate_fields(
            &self.hostname,
            self.port,
            &self.username,
            strict && self.password.is_some() && self.private_key_path.is_some(),
        )
    }
}

/// A partial, field-level update.
///
/// Optional credentials use a nested option: `Some(None)` clears the
/// column, `None` leaves it untouched. There is no id field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Option<String>>,
    pub private_key_path: Option<Option<String>>,
}

impl ProfileUpdate {
    /// Builds an update from `(column, value)` pairs.
    ///
    /// An `id` pair is discarded. An empty value clears an optional
    /// credential column. Unknown columns and unparsable ports are
    /// rejected.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut update = Self::default();
        for (column, value) in pairs {
            match column {
                "id" => {}
                "hostname" => update.hostname = Some(value.to_string()),
                "port" => {
                    let port = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| Error::Validation(format!("invalid port '{}'", value)))?;
                    update.port = Some(port);
                }
                "username" => update.username = Some(value.to_string()),
                "password" => update.password = Some(normalize(Some(value.to_string()))),
                "private_key_path" | "key" => {
                    update.private_key_path = Some(normalize(Some(value.to_string())));
                }
                other => {
                    return Err(Error::Validation(format!("unknown field '{}'", other)));
                }
            }
        }
        Ok(update)
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.port.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.private_key_path.is_none()
    }

    /// Applies the update to a copy of `current` and validates the result.
    pub(crate) fn merge(&self, current: &ServerProfile, strict: bool) -> Result<ServerProfile> {
        let mut merged = current.clone();
        merged.apply(self);
        validate_fields(
            &merged.hostname,
            merged.port,
            &merged.username,
            strict && merged.has_dual_credentials(),
        )?;
        Ok(merged)
    }
}

fn validate_fields(hostname: &str, port: u16, username: &str, dual: bool) -> Result<()> {
    require_text("hostname", hostname)?;
    if port == 0 {
        return Err(Error::Validation(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    require_text("username", username)?;
    if dual {
        return Err(Error::Validation(
            "set either a password or a private key path, not both".to_string(),
        ));
    }
    Ok(())
}

/// Rejects empty values and values with surrounding whitespace, so a
/// stored field always reads back exactly as it was written.
fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    if value.trim() != value {
        return Err(Error::Validation(format!(
            "{} must not start or end with whitespace",
            field
        )));
    }
    Ok(())
}

fn normalize(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
