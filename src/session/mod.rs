//! Live SSH sessions: interactive relay and one-shot command execution.
//!
//! A [`Session`] owns one authenticated connection built from a saved
//! profile. It is never persisted and belongs to the caller that made it.

pub mod cancel;
pub mod fallback;
pub mod relay;
pub mod stdio;
pub mod terminal;

use std::io::{self, Read, Write};

use tracing::{debug, info, warn};

pub use cancel::CancelToken;
pub use relay::{LocalIo, Readiness, ReadinessWait, RelayExit, RelayOutcome};
pub use terminal::{CrosstermTerminal, RawModeGuard, TerminalControl};

use crate::error::{Error, Result};
use crate::ssh::{CommandChannel, Connection, PtyRequest, SplitChannel, Ssh2Connection};
use crate::store::ServerProfile;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected.
    Disconnected,
    /// Handshake and authentication in progress.
    Authenticating,
    /// Authenticated and idle.
    Connected,
    /// An interactive relay is running.
    Relaying,
    /// Closed by the caller.
    Closed,
    /// Establishment or a relay failed.
    Failed,
}

impl SessionState {
    /// Returns a display string for the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Authenticating => "Authenticating",
            Self::Connected => "Connected",
            Self::Relaying => "Relaying",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        }
    }
}

/// How the interactive relay is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Multiplexed where supported, threaded otherwise.
    #[default]
    Auto,
    /// Single readiness-driven loop with raw mode.
    Multiplexed,
    /// Drain thread plus line-buffered input.
    Threaded,
}

impl RelayMode {
    /// Parses a relay mode from a string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "multiplexed" | "poll" | "raw" => Self::Multiplexed,
            "threaded" | "thread" | "fallback" => Self::Threaded,
            _ => Self::Auto,
        }
    }

    /// Resolves `Auto` for the current platform and stdin.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(unix) && stdio::stdin_is_terminal() => Self::Multiplexed,
            Self::Auto => Self::Threaded,
            other => other,
        }
    }
}

/// Options for [`Session::relay`].
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// Relay implementation to use.
    pub mode: RelayMode,
    /// Remote PTY request.
    pub pty: PtyRequest,
    /// Token that stops the relay when triggered.
    pub cancel: CancelToken,
}

/// A live SSH session built from one profile.
pub struct Session<C: Connection = Ssh2Connection> {
    profile: ServerProfile,
    connection: Option<C>,
    state: SessionState,
}

impl<C: Connection> Session<C> {
    /// Creates a session that has not connected yet.
    #[must_use]
    pub fn new(profile: ServerProfile) -> Self {
        Self {
            profile,
            connection: None,
            state: SessionState::Disconnected,
        }
    }

    /// Wraps an already authenticated connection.
    #[must_use]
    pub fn with_connection(profile: ServerProfile, connection: C) -> Self {
        Self {
            profile,
            connection: Some(connection),
            state: SessionState::Connected,
        }
    }

    /// Returns the profile this session was built from.
    #[must_use]
    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true iff a connection exists and its transport is active.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_active)
    }

    /// Moves `Disconnected` to `Authenticating`.
    pub fn begin_authentication(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::Connection(format!(
                "cannot connect a session in state {}",
                self.state.as_str()
            )));
        }
        self.state = SessionState::Authenticating;
        Ok(())
    }

    /// Records the result of establishment: `Connected` or `Failed`.
    pub fn finish_authentication(&mut self, result: Result<C>) -> Result<()> {
        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn connected(&mut self) -> Result<&mut C> {
        if self.state != SessionState::Connected {
            return Err(Error::Connection(format!(
                "session is {}, not connected",
                self.state.as_str()
            )));
        }
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Connection("session has no connection".to_string()))
    }

    /// Runs `command` on a fresh channel and returns its standard output.
    ///
    /// Blocks until the remote process completes.
    pub fn execute(&mut self, command: &str) -> Result<Vec<u8>> {
        let connection = self.connected()?;
        let mut channel = connection.open_command()?;

        debug!("Executing remote command ({} bytes)", command.len());
        channel
            .exec(command)
            .map_err(|e| Error::Connection(format!("cannot execute command: {}", e)))?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        let status = channel.finish()?;
        debug!(
            "Command finished with status {:?}, {} bytes of output",
            status,
            stdout.len()
        );
        Ok(stdout)
    }

    /// Runs the multiplexed relay over a newly opened shell channel.
    pub fn relay_with<T, W, I, O>(
        &mut self,
        pty: &PtyRequest,
        local: LocalIo<'_, T, W, I, O>,
        cancel: &CancelToken,
    ) -> Result<RelayOutcome>
    where
        T: TerminalControl,
        W: ReadinessWait,
        I: Read,
        O: Write,
    {
        let mut shell = self.connected()?.open_shell(pty)?;
        self.state = SessionState::Relaying;
        let result = relay::run(local, &mut shell, cancel);
        self.settle(&result);
        result
    }

    /// Runs the threaded relay over a newly opened shell channel.
    ///
    /// The session is reusable afterwards only if the shell channel was
    /// seen to close; a drain thread still holding it would contend with
    /// the next channel, so the session is marked `Failed` instead.
    pub fn relay_threaded_with<I, O>(
        &mut self,
        pty: &PtyRequest,
        input: &mut I,
        output: O,
        cancel: &CancelToken,
    ) -> Result<RelayOutcome>
    where
        I: Read,
        O: Write + Send + 'static,
    {
        let shell = self.connected()?.open_shell(pty)?;
        self.state = SessionState::Relaying;
        let result = shell
            .split()
            .map_err(Error::from)
            .and_then(|(reader, writer)| fallback::run(reader, writer, input, output, cancel));
        match result {
            Ok(ref outcome) if !outcome.remote_closed => {
                warn!("Shell channel still open after relay; session not reusable");
                self.state = SessionState::Failed;
            }
            _ => self.settle(&result),
        }
        result
    }

    fn settle(&mut self, result: &Result<RelayOutcome>) {
        self.state = match result {
            Ok(_) => SessionState::Connected,
            Err(_) => SessionState::Failed,
        };
    }

    /// Disconnects and moves to `Closed`. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
            info!("Closed session to {}", self.profile.connection_string());
        }
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
        }
    }
}

impl Session<Ssh2Connection> {
    /// Relays between this process's terminal and a remote shell.
    pub fn relay(&mut self, options: &RelayOptions) -> Result<RelayOutcome> {
        match options.mode.resolve() {
            RelayMode::Multiplexed => self.relay_multiplexed(options),
            _ => {
                let mut input = io::stdin().lock();
                self.relay_threaded_with(&options.pty, &mut input, io::stdout(), &options.cancel)
            }
        }
    }

    #[cfg(unix)]
    fn relay_multiplexed(&mut self, options: &RelayOptions) -> Result<RelayOutcome> {
        let socket = self.connected()?.socket().try_clone()?;
        let mut input = stdio::raw_stdin()?;
        let mut waiter = stdio::PollWait::new(&socket, &input)?;
        let mut terminal = CrosstermTerminal;
        let mut output = io::stdout().lock();

        self.relay_with(
            &options.pty,
            LocalIo {
                terminal: &mut terminal,
                waiter: &mut waiter,
                input: &mut input,
                output: &mut output,
            },
            &options.cancel,
        )
    }

    #[cfg(not(unix))]
    fn relay_multiplexed(&mut self, options: &RelayOptions) -> Result<RelayOutcome> {
        warn!("Readiness multiplexing unavailable; using threaded relay");
        let mut input = io::stdin().lock();
        self.relay_threaded_with(&options.pty, &mut input, io::stdout(), &options.cancel)
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.close();
        }
    }
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile.connection_string())
            .field("state", &self.state)
            .field("alive", &self.is_alive())
            .finish()
    }
}
