//! Turns a saved profile into an authenticated session.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, Session as RawSession};
use tracing::{debug, info, warn};

use super::auth::AuthStrategy;
use super::connection::{Connection, Ssh2Connection};
use super::known_hosts::KnownHosts;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::store::ServerProfile;

/// Default bound on TCP connect, handshake and authentication.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// libssh2 session error codes reported by user authentication.
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_METHOD_NONE: i32 = -17;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Builds authenticated sessions from profiles.
///
/// No operation here is retried. Each failure is reported once with
/// its own error kind.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    timeout: Duration,
    known_hosts: KnownHosts,
}

impl ConnectionFactory {
    /// Creates a factory with the default timeout and known-hosts file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            known_hosts: KnownHosts::default(),
        }
    }

    /// Sets the connect timeout. A zero timeout keeps the current one.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("Ignoring zero connect timeout; keeping {:?}", self.timeout);
        } else {
            self.timeout = timeout;
        }
        self
    }

    /// Sets the known-hosts policy.
    #[must_use]
    pub fn with_known_hosts(mut self, known_hosts: KnownHosts) -> Self {
        self.known_hosts = known_hosts;
        self
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Picks the authentication strategy for a profile.
    pub fn resolve_strategy(&self, profile: &ServerProfile) -> Result<AuthStrategy> {
        AuthStrategy::resolve(profile)
    }

    /// Connects and authenticates, returning a `Connected` session.
    pub fn connect(&self, profile: &ServerProfile) -> Result<Session<Ssh2Connection>> {
        let mut session = Session::new(profile.clone());
        self.establish(&mut session)?;
        Ok(session)
    }

    /// Drives a `Disconnected` session to `Connected`, or to `Failed`
    /// if any step fails.
    pub fn establish(&self, session: &mut Session<Ssh2Connection>) -> Result<()> {
        let profile = session.profile().clone();
        session.begin_authentication()?;
        let result = self.open(&profile);
        if let Err(ref e) = result {
            warn!("Connection to {} failed: {}", profile.connection_string(), e);
        }
        session.finish_authentication(result)
    }

    /// Returns true iff the session has a live transport.
    pub fn is_alive<C: Connection>(&self, session: &Session<C>) -> bool {
        session.is_alive()
    }

    fn open(&self, profile: &ServerProfile) -> Result<Ssh2Connection> {
        let strategy = self.resolve_strategy(profile)?;
        if let AuthStrategy::Key { ref path } = strategy {
            if !path.exists() {
                return Err(Error::Configuration(format!(
                    "private key {} not found",
                    path.display()
                )));
            }
        }

        info!(
            "Connecting to {} using {} authentication",
            profile.connection_string(),
            strategy.as_str()
        );

        let tcp = self.dial(&profile.hostname, profile.port)?;
        let socket = tcp.try_clone()?;

        let mut raw = RawSession::new()
            .map_err(|e| Error::Connection(format!("cannot create SSH session: {}", e)))?;
        raw.set_timeout(self.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
        raw.set_tcp_stream(tcp);
        raw.handshake()
            .map_err(|e| Error::Connection(format!("SSH handshake failed: {}", e)))?;

        let decision = self
            .known_hosts
            .verify(&raw, &profile.hostname, profile.port)?;
        debug!("Host key check: {:?}", decision);

        authenticate(&raw, &profile.username, &strategy)?;

        // The bound covers establishment only; relays and commands may run long.
        raw.set_timeout(0);

        info!("Connected to {}", profile.connection_string());
        Ok(Ssh2Connection::new(raw, socket))
    }

    /// Opens a TCP connection, trying each resolved address in turn.
    fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", host, e)))?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.timeout) {
                Ok(stream) => {
                    debug!("TCP connected to {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Connection(match last_error {
            Some(e) => format!("{}:{} unreachable: {}", host, port, e),
            None => format!("{} resolved to no addresses", host),
        }))
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn authenticate(session: &RawSession, username: &str, strategy: &AuthStrategy) -> Result<()> {
    let result = match strategy {
        AuthStrategy::Password { secret } => session.userauth_password(username, secret),
        AuthStrategy::Key { path } => {
            session.userauth_pubkey_file(username, None, Path::new(path), None)
        }
    };

    result.map_err(|e| classify_auth_error(&e))?;
    if !session.authenticated() {
        return Err(Error::Authentication(format!(
            "{} authentication rejected for {}",
            strategy.as_str(),
            username
        )));
    }
    Ok(())
}

/// Maps a failed authentication call to an error kind.
///
/// Only a refused credential is an authentication failure. An unreadable
/// key file is a configuration problem; timeouts and socket errors are
/// transport failures.
fn classify_auth_error(e: &ssh2::Error) -> Error {
    match e.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
            | LIBSSH2_ERROR_PASSWORD_EXPIRED
            | LIBSSH2_ERROR_METHOD_NONE,
        ) => Error::Authentication(e.to_string()),
        ErrorCode::Session(LIBSSH2_ERROR_FILE) => {
            Error::Configuration(format!("cannot use private key: {}", e))
        }
        _ => Error::Connection(format!("transport failed during authentication: {}", e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::SessionState;

    fn profile(password: Option<&str>, key: Option<&str>) -> ServerProfile {
        ServerProfile {
            id: 7,
            hostname: "127.0.0.1".to_string(),
            port: 1,
            username: "admin".to_string(),
            password: password.map(str::to_string),
            private_key_path: key.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_strategy_key() {
        let factory = ConnectionFactory::new();
        let s = factory
            .resolve_strategy(&profile(None, Some("/home/u/.ssh/id_rsa")))
            .unwrap();
        assert_eq!(s.as_str(), "key");
    }

    #[test]
    fn test_missing_credential_marks_failed() {
        let factory = ConnectionFactory::new();
        let mut session = Session::new(profile(None, None));
        let err = factory.establish(&mut session).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!factory.is_alive(&session));
    }

    #[test]
    fn test_missing_key_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("id_missing");
        let factory = ConnectionFactory::new();
        let err = factory
            .connect(&profile(None, Some(missing.to_str().unwrap())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_zero_timeout_is_ignored() {
        let factory = ConnectionFactory::new().with_timeout(Duration::ZERO);
        assert_eq!(factory.timeout(), DEFAULT_CONNECT_TIMEOUT);

        let factory = factory.with_timeout(Duration::from_secs(3));
        assert_eq!(factory.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_classify_auth_error() {
        let kind = |code: i32| {
            classify_auth_error(&ssh2::Error::new(ErrorCode::Session(code), "x")).kind()
        };

        assert_eq!(kind(-18), ErrorKind::Authentication);
        assert_eq!(kind(-19), ErrorKind::Authentication);
        assert_eq!(kind(-15), ErrorKind::Authentication);
        assert_eq!(kind(-16), ErrorKind::Configuration);
        // Timeout, socket send, socket disconnect, socket recv.
        assert_eq!(kind(-9), ErrorKind::Connection);
        assert_eq!(kind(-7), ErrorKind::Connection);
        assert_eq!(kind(-13), ErrorKind::Connection);
        assert_eq!(kind(-43), ErrorKind::Connection);
    }

    #[test]
    fn test_unreachable_is_connection_error() {
        // Port 1 on loopback is closed on any sane test host.
        let factory = ConnectionFactory::new().with_timeout(Duration::from_secs(2));
        let err = factory.connect(&profile(Some("pw"), None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
