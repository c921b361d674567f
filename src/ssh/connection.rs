//! Live connection handles.
//!
//! The [`Connection`] trait is the only surface the session layer uses
//! to talk to an SSH server: open a shell, open a command channel,
//! report liveness, disconnect. [`Ssh2Connection`] implements it on top
//! of the `ssh2` crate.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{Channel, ExtendedData, Session};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Pause between retries when a non-blocking channel is not ready.
const RETRY_PAUSE: Duration = Duration::from_millis(5);

/// How long closing a split shell channel waits for the remote close.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Remote pseudo-terminal parameters for a shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Terminal type (TERM).
    pub term: String,
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl PtyRequest {
    /// Creates a request sized to the local terminal, or 80x24 if unknown.
    #[must_use]
    pub fn for_local_terminal(term: &str) -> Self {
        let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
        Self {
            term: term.to_string(),
            cols,
            rows,
        }
    }
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Remote side of the interactive relay.
pub trait RemoteChannel {
    /// Switches the receive side between blocking and non-blocking.
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Receives up to `buf.len()` bytes. `Ok(0)` is end of stream;
    /// `WouldBlock` means no data yet.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sends all of `data`.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Send half of a split channel.
pub trait ChannelWriter: Write {
    /// Sends end of stream and closes the channel, so the receive half
    /// reaches end of stream once the remote acknowledges.
    fn close(&mut self) -> io::Result<()>;
}

impl ChannelWriter for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: ChannelWriter + ?Sized> ChannelWriter for &mut W {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// A channel that can be split into a receive-only and a send-only half.
pub trait SplitChannel {
    /// Receive half, moved into the drain thread.
    type Reader: Read + Send + 'static;
    /// Send half, kept by the caller.
    type Writer: ChannelWriter;

    /// Splits the channel.
    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

/// Single-use channel running one remote command.
pub trait CommandChannel: Read {
    /// Starts `command`.
    fn exec(&mut self, command: &str) -> io::Result<()>;

    /// Waits for the remote process to finish and returns its exit status.
    fn finish(&mut self) -> io::Result<Option<i32>>;
}

/// An authenticated SSH connection.
pub trait Connection {
    /// Interactive shell channel type.
    type Shell: RemoteChannel + SplitChannel;
    /// One-shot command channel type.
    type Command: CommandChannel;

    /// Returns true while the transport is up.
    fn is_active(&self) -> bool;

    /// Opens a shell channel with a remote PTY.
    fn open_shell(&mut self, pty: &PtyRequest) -> Result<Self::Shell>;

    /// Opens a fresh command channel.
    fn open_command(&mut self) -> Result<Self::Command>;

    /// Closes the transport. Safe to call more than once.
    fn disconnect(&mut self);
}

/// Connection backed by an `ssh2` session.
pub struct Ssh2Connection {
    session: Session,
    /// Clone of the transport socket, used for readiness polling.
    socket: TcpStream,
    closed: bool,
}

impl Ssh2Connection {
    /// Wraps an authenticated session and its socket.
    pub(crate) fn new(session: Session, socket: TcpStream) -> Self {
        Self {
            session,
            socket,
            closed: false,
        }
    }

    /// Returns the transport socket.
    #[must_use]
    pub fn socket(&self) -> &TcpStream {
        &self.socket
    }
}

impl std::fmt::Debug for Ssh2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Connection")
            .field("peer", &self.socket.peer_addr().ok())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Connection for Ssh2Connection {
    type Shell = Ssh2Shell;
    type Command = Ssh2Command;

    fn is_active(&self) -> bool {
        !self.closed && self.session.authenticated() && transport_open(&self.socket)
    }

    fn open_shell(&mut self, pty: &PtyRequest) -> Result<Ssh2Shell> {
        self.session.set_blocking(true);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| Error::Connection(format!("cannot open channel: {}", e)))?;
        channel
            .request_pty(
                &pty.term,
                None,
                Some((u32::from(pty.cols), u32::from(pty.rows), 0, 0)),
            )
            .map_err(|e| Error::Connection(format!("PTY request failed: {}", e)))?;
        channel
            .shell()
            .map_err(|e| Error::Connection(format!("cannot start shell: {}", e)))?;

        debug!("Shell opened ({} {}x{})", pty.term, pty.cols, pty.rows);
        Ok(Ssh2Shell {
            session: self.session.clone(),
            channel,
        })
    }

    fn open_command(&mut self) -> Result<Ssh2Command> {
        self.session.set_blocking(true);
        let channel = self
            .session
            .channel_session()
            .map_err(|e| Error::Connection(format!("cannot open channel: {}", e)))?;
        Ok(Ssh2Command { channel })
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.set_blocking(true);
        if let Err(e) = self.session.disconnect(None, "closed by client", None) {
            warn!("SSH disconnect failed: {}", e);
        }
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
    }
}

impl Drop for Ssh2Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Returns false once the peer has closed or reset the socket.
///
/// libssh2 keeps its authenticated flag after the transport drops, so
/// liveness is read from the socket itself. Unread data means the peer
/// was still talking and counts as open.
#[cfg(unix)]
fn transport_open(socket: &TcpStream) -> bool {
    use std::os::fd::AsFd;

    use nix::errno::Errno;
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    let mut fds = [PollFd::new(socket.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(0) | Err(Errno::EINTR) => true,
        Ok(_) => {
            let mut byte = [0u8; 1];
            matches!(socket.peek(&mut byte), Ok(n) if n > 0)
        }
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn transport_open(_socket: &TcpStream) -> bool {
    true
}

/// Interactive shell channel on an `ssh2` session.
pub struct Ssh2Shell {
    session: Session,
    channel: Channel,
}

impl RemoteChannel for Ssh2Shell {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.session.set_blocking(!nonblocking);
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        write_all_retrying(&mut self.channel, data)
    }
}

impl SplitChannel for Ssh2Shell {
    type Reader = RetryingStream;
    type Writer = ShellWriter;

    fn split(self) -> io::Result<(RetryingStream, ShellWriter)> {
        // A blocking read would hold the session lock and starve the
        // writer, so both halves run non-blocking and retry.
        self.session.set_blocking(false);
        let reader = RetryingStream {
            stream: self.channel.stream(0),
        };
        Ok((
            reader,
            ShellWriter {
                channel: self.channel,
            },
        ))
    }
}

/// Receive half of a split shell channel. Blocks by retrying on `WouldBlock`.
pub struct RetryingStream {
    stream: ssh2::Stream,
}

impl Read for RetryingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.stream.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_PAUSE),
                other => return other,
            }
        }
    }
}

/// Send half of a split shell channel.
pub struct ShellWriter {
    channel: Channel,
}

impl Write for ShellWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_all_retrying(&mut self.channel, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        loop {
            match self.channel.flush() {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_PAUSE),
                other => return other,
            }
        }
    }
}

impl ChannelWriter for ShellWriter {
    fn close(&mut self) -> io::Result<()> {
        let deadline = Instant::now() + CLOSE_WAIT;
        retry_until(deadline, || self.channel.send_eof())?;
        retry_until(deadline, || self.channel.close())?;
        debug!("Shell channel closed");
        Ok(())
    }
}

/// Retries a non-blocking libssh2 call until it completes or `deadline` passes.
fn retry_until<F>(deadline: Instant, mut op: F) -> io::Result<()>
where
    F: FnMut() -> std::result::Result<(), ssh2::Error>,
{
    loop {
        match op().map_err(io::Error::from) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "remote did not acknowledge channel close",
                    ));
                }
                thread::sleep(RETRY_PAUSE);
            }
            other => return other,
        }
    }
}

fn write_all_retrying<W: Write>(w: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match w.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_PAUSE),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// One-shot command channel on an `ssh2` session.
pub struct Ssh2Command {
    channel: Channel,
}

impl Read for Ssh2Command {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl CommandChannel for Ssh2Command {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        // Unread stderr fills the channel window and stalls stdout, so
        // libssh2 discards it as it arrives.
        self.channel
            .handle_extended_data(ExtendedData::Ignore)
            .map_err(io::Error::other)?;
        self.channel.exec(command).map_err(io::Error::other)
    }

    fn finish(&mut self) -> io::Result<Option<i32>> {
        self.channel.wait_close().map_err(io::Error::other)?;
        Ok(self.channel.exit_status().ok())
    }
}
