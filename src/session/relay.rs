//! Readiness-multiplexed relay between the local terminal and a remote
//! shell channel.
//!
//! One cooperative loop: wait until the remote channel or local input is
//! readable, service one side, repeat. The loop suspends only in the
//! readiness wait.
//!
//! ```text
//! Connected -> RawModeEngaged -> Relaying -> ClosedNormal | ClosedError
//!                                        \-> RawModeRestored (always last)
//! ```

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::terminal::{RawModeGuard, TerminalControl};
use crate::error::{Error, Result};
use crate::ssh::RemoteChannel;

/// Largest chunk read from the remote channel per iteration.
pub const CHUNK_SIZE: usize = 1024;

/// Written to local output when the remote side closes.
pub const EOF_MARKER: &[u8] = b"\r\n*** EOF\r\n";

/// Upper bound on one readiness wait, so cancellation is observed.
pub const WAIT_TICK: Duration = Duration::from_millis(100);

/// Which sources are readable after a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// The remote channel may have data.
    pub remote: bool,
    /// Local input has data.
    pub local: bool,
}

/// Waits until the remote channel or local input becomes readable.
pub trait ReadinessWait {
    /// Blocks for at most `timeout`. A timeout returns with nothing ready
    /// unless the implementation has reason to probe a source anyway.
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness>;
}

/// Why a relay ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The remote channel reached end of stream.
    RemoteEof,
    /// Local input reached end of stream.
    LocalEof,
    /// The cancel token was triggered.
    Cancelled,
}

/// Result of a relay that closed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// How the relay ended.
    pub exit: RelayExit,
    /// Whether the remote side was seen to close.
    pub remote_closed: bool,
    /// Bytes written to local output, excluding the EOF marker.
    pub bytes_from_remote: u64,
    /// Bytes forwarded to the remote channel.
    pub bytes_to_remote: u64,
}

/// Local endpoints of a multiplexed relay.
pub struct LocalIo<'a, T, W, I, O> {
    /// Controlling terminal whose mode is switched to raw.
    pub terminal: &'a mut T,
    /// Readiness source for the remote channel and `input`.
    pub waiter: &'a mut W,
    /// Keystroke source.
    pub input: &'a mut I,
    /// Display sink.
    pub output: &'a mut O,
}

/// Runs the relay until either side closes, cancellation, or an I/O error.
///
/// The terminal mode captured on entry is restored before this returns,
/// on every path. An I/O error from the loop takes precedence over a
/// restore error.
pub fn run<T, W, I, O, R>(
    local: LocalIo<'_, T, W, I, O>,
    remote: &mut R,
    cancel: &CancelToken,
) -> Result<RelayOutcome>
where
    T: TerminalControl,
    W: ReadinessWait,
    I: Read,
    O: Write,
    R: RemoteChannel,
{
    let LocalIo {
        terminal,
        waiter,
        input,
        output,
    } = local;

    let guard = RawModeGuard::engage(terminal)?;
    debug!("Raw mode engaged");

    let result = pump(remote, waiter, input, output, cancel);

    if let Err(e) = remote.set_nonblocking(false) {
        debug!("Could not reset channel to blocking: {}", e);
    }
    let restored = guard.restore();

    match (result, restored) {
        (Ok(outcome), Ok(())) => {
            info!(
                "Relay closed: {:?} ({} bytes in, {} bytes out)",
                outcome.exit, outcome.bytes_from_remote, outcome.bytes_to_remote
            );
            Ok(outcome)
        }
        (Ok(_), Err(e)) => Err(Error::Io(e)),
        (Err(e), restored) => {
            if let Err(re) = restored {
                warn!("Terminal restore also failed: {}", re);
            }
            warn!("Relay failed: {}", e);
            Err(e)
        }
    }
}

fn pump<R, W, I, O>(
    remote: &mut R,
    waiter: &mut W,
    input: &mut I,
    output: &mut O,
    cancel: &CancelToken,
) -> Result<RelayOutcome>
where
    R: RemoteChannel,
    W: ReadinessWait,
    I: Read,
    O: Write,
{
    remote.set_nonblocking(true)?;

    let mut chunk = [0u8; CHUNK_SIZE];
    let mut key = [0u8; 1];
    // The channel may hold data already pulled off the socket, which the
    // socket no longer signals. Until a read would block, don't sleep.
    let mut remote_pending = false;
    let mut outcome = RelayOutcome {
        exit: RelayExit::LocalEof,
        remote_closed: false,
        bytes_from_remote: 0,
        bytes_to_remote: 0,
    };

    loop {
        if cancel.is_cancelled() {
            outcome.exit = RelayExit::Cancelled;
            return Ok(outcome);
        }

        let timeout = if remote_pending {
            Duration::ZERO
        } else {
            WAIT_TICK
        };
        let ready = match waiter.wait(timeout) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if ready.remote {
            match remote.recv(&mut chunk) {
                Ok(0) => {
                    output.write_all(EOF_MARKER)?;
                    output.flush()?;
                    outcome.exit = RelayExit::RemoteEof;
                    outcome.remote_closed = true;
                    return Ok(outcome);
                }
                Ok(n) => {
                    output.write_all(&chunk[..n])?;
                    output.flush()?;
                    outcome.bytes_from_remote += n as u64;
                    remote_pending = true;
                    // One side per iteration.
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => remote_pending = false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        if ready.local {
            match input.read(&mut key) {
                Ok(0) => {
                    outcome.exit = RelayExit::LocalEof;
                    return Ok(outcome);
                }
                Ok(_) => {
                    remote.send(&key)?;
                    outcome.bytes_to_remote += 1;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct BothReady;

    impl ReadinessWait for BothReady {
        fn wait(&mut self, _timeout: Duration) -> io::Result<Readiness> {
            Ok(Readiness {
                remote: true,
                local: true,
            })
        }
    }

    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
        sent: Vec<u8>,
    }

    impl RemoteChannel for Scripted {
        fn set_nonblocking(&mut self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(data);
            Ok(())
        }
    }

    /// Reports the remote ready and records each requested timeout.
    #[derive(Default)]
    struct RecordingWait {
        timeouts: Vec<Duration>,
    }

    impl ReadinessWait for RecordingWait {
        fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
            self.timeouts.push(timeout);
            Ok(Readiness {
                remote: true,
                local: false,
            })
        }
    }

    #[derive(Default)]
    struct Term {
        raw: bool,
    }

    impl TerminalControl for Term {
        type Mode = bool;
        fn capture(&mut self) -> io::Result<bool> {
            Ok(self.raw)
        }
        fn enter_raw(&mut self) -> io::Result<()> {
            self.raw = true;
            Ok(())
        }
        fn restore(&mut self, mode: &bool) -> io::Result<()> {
            self.raw = *mode;
            Ok(())
        }
    }

    #[test]
    fn test_remote_data_is_serviced_before_local() {
        let mut remote = Scripted {
            reads: VecDeque::from(vec![Ok(b"abc".to_vec()), Ok(Vec::new())]),
            sent: Vec::new(),
        };
        let mut term = Term::default();
        let mut input: &[u8] = b"xyz";
        let mut output = Vec::new();

        let outcome = run(
            LocalIo {
                terminal: &mut term,
                waiter: &mut BothReady,
                input: &mut input,
                output: &mut output,
            },
            &mut remote,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.exit, RelayExit::RemoteEof);
        assert_eq!(outcome.bytes_from_remote, 3);
        assert!(remote.sent.is_empty());
        assert!(output.starts_with(b"abc"));
    }

    #[test]
    fn test_keystrokes_forwarded_one_at_a_time() {
        let mut remote = Scripted {
            reads: VecDeque::new(),
            sent: Vec::new(),
        };
        let mut term = Term::default();
        let mut input: &[u8] = b"ls\r";
        let mut output = Vec::new();

        let outcome = run(
            LocalIo {
                terminal: &mut term,
                waiter: &mut BothReady,
                input: &mut input,
                output: &mut output,
            },
            &mut remote,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.exit, RelayExit::LocalEof);
        assert_eq!(outcome.bytes_to_remote, 3);
        assert_eq!(remote.sent, b"ls\r");
        assert!(output.is_empty());
    }

    #[test]
    fn test_no_idle_wait_while_channel_has_data() {
        let mut remote = Scripted {
            reads: VecDeque::from(vec![
                Ok(vec![b'a'; CHUNK_SIZE]),
                Ok(vec![b'b'; CHUNK_SIZE]),
                Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Ok(Vec::new()),
            ]),
            sent: Vec::new(),
        };
        let mut term = Term::default();
        let mut waiter = RecordingWait::default();
        let mut input: &[u8] = b"";
        let mut output = Vec::new();

        let outcome = run(
            LocalIo {
                terminal: &mut term,
                waiter: &mut waiter,
                input: &mut input,
                output: &mut output,
            },
            &mut remote,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.exit, RelayExit::RemoteEof);
        assert_eq!(outcome.bytes_from_remote, 2 * CHUNK_SIZE as u64);
        assert_eq!(
            waiter.timeouts,
            vec![WAIT_TICK, Duration::ZERO, Duration::ZERO, WAIT_TICK]
        );
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut remote = Scripted {
            reads: VecDeque::from(vec![Ok(b"never".to_vec())]),
            sent: Vec::new(),
        };
        let mut term = Term::default();
        let mut input: &[u8] = b"";
        let mut output = Vec::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run(
            LocalIo {
                terminal: &mut term,
                waiter: &mut BothReady,
                input: &mut input,
                output: &mut output,
            },
            &mut remote,
            &cancel,
        )
        .unwrap();

        assert_eq!(outcome.exit, RelayExit::Cancelled);
        assert!(output.is_empty());
        assert!(!term.raw);
    }
}
