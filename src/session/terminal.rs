//! Local terminal mode control.
//!
//! [`RawModeGuard`] captures the terminal mode, switches to raw mode and
//! puts the captured mode back when it is restored or dropped, whichever
//! comes first.

use std::fmt::Debug;
use std::io;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use tracing::{debug, warn};

/// Access to the local terminal's input mode.
pub trait TerminalControl {
    /// Opaque snapshot of the terminal mode.
    type Mode: Clone + PartialEq + Debug;

    /// Captures the current mode.
    fn capture(&mut self) -> io::Result<Self::Mode>;

    /// Switches to raw mode: no line buffering, no echo, no signal keys.
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Puts back a previously captured mode.
    fn restore(&mut self, mode: &Self::Mode) -> io::Result<()>;
}

/// The process's controlling terminal, driven through crossterm.
#[derive(Debug, Default)]
pub struct CrosstermTerminal;

impl TerminalControl for CrosstermTerminal {
    /// Whether raw mode was on.
    type Mode = bool;

    fn capture(&mut self) -> io::Result<bool> {
        is_raw_mode_enabled()
    }

    fn enter_raw(&mut self) -> io::Result<()> {
        enable_raw_mode()
    }

    fn restore(&mut self, mode: &bool) -> io::Result<()> {
        if *mode {
            enable_raw_mode()
        } else {
            disable_raw_mode()
        }
    }
}

/// Scoped raw mode. The captured mode is restored exactly once.
pub struct RawModeGuard<'a, T: TerminalControl> {
    terminal: &'a mut T,
    saved: Option<T::Mode>,
}

impl<'a, T: TerminalControl> RawModeGuard<'a, T> {
    /// Captures the current mode and enters raw mode.
    ///
    /// If entering raw mode fails the captured mode is restored before
    /// the error is returned.
    pub fn engage(terminal: &'a mut T) -> io::Result<Self> {
        let saved = terminal.capture()?;
        debug!("Captured terminal mode: {:?}", saved);
        let mut guard = Self {
            terminal,
            saved: Some(saved),
        };
        guard.terminal.enter_raw()?;
        Ok(guard)
    }

    /// Restores the captured mode and reports any failure.
    pub fn restore(mut self) -> io::Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> io::Result<()> {
        match self.saved.take() {
            Some(mode) => self.terminal.restore(&mode),
            None => Ok(()),
        }
    }
}

impl<T: TerminalControl> Drop for RawModeGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}
