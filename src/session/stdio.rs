//! Real local endpoints: the process's stdin/stdout and, on Unix, a
//! `poll(2)` readiness wait over stdin and the SSH socket.

use std::fs::File;
use std::io;

/// Opens an unbuffered handle on stdin.
///
/// `io::Stdin` buffers internally, which would hide pending keystrokes
/// from the readiness wait.
#[cfg(unix)]
pub fn raw_stdin() -> io::Result<File> {
    use std::os::fd::AsFd;

    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(File::from(fd))
}

/// Returns true if stdin is an interactive terminal.
#[must_use]
pub fn stdin_is_terminal() -> bool {
    use std::io::IsTerminal;

    io::stdin().is_terminal()
}

#[cfg(unix)]
pub use self::unix::PollWait;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::fd::{AsFd, OwnedFd};
    use std::time::Duration;

    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    use crate::session::relay::{Readiness, ReadinessWait};

    /// `poll(2)` over the SSH socket and local input.
    pub struct PollWait {
        socket: OwnedFd,
        input: OwnedFd,
    }

    impl PollWait {
        /// Creates a waiter over duplicates of the given descriptors.
        pub fn new(socket: &impl AsFd, input: &impl AsFd) -> io::Result<Self> {
            Ok(Self {
                socket: socket.as_fd().try_clone_to_owned()?,
                input: input.as_fd().try_clone_to_owned()?,
            })
        }
    }

    fn readable(fd: &PollFd<'_>) -> bool {
        fd.revents().is_some_and(|r| {
            r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
        })
    }

    impl ReadinessWait for PollWait {
        fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
            let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
            let mut fds = [
                PollFd::new(self.socket.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.input.as_fd(), PollFlags::POLLIN),
            ];
            let n = poll(&mut fds, PollTimeout::from(millis)).map_err(io::Error::from)?;

            if n == 0 {
                // libssh2 may already hold decrypted data the socket no
                // longer signals, so probe the channel on every idle tick.
                return Ok(Readiness {
                    remote: true,
                    local: false,
                });
            }

            Ok(Readiness {
                remote: readable(&fds[0]),
                local: readable(&fds[1]),
            })
        }
    }

}
