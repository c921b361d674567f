//! sshelf
//!
//! Saved SSH server profiles, authenticated connections built from them,
//! and an interactive shell relay between the local terminal and a
//! remote PTY.
//!
//! # Architecture
//!
//! - **Store Module**: SQLite-backed CRUD for server profiles
//! - **SSH Module**: Authentication strategy, host keys and connection setup
//! - **Session Module**: Session lifecycle, raw-mode relay and threaded fallback
//! - **CLI Module**: Command-line grammar and dispatch
//!
//! # Usage
//!
//! ```no_run
//! use sshelf::{ConnectionFactory, CredentialStore, NewProfile};
//!
//! # fn main() -> sshelf::Result<()> {
//! let store = CredentialStore::open("servers.db")?;
//! let id = store.add(NewProfile::new("db1", 22, "admin").with_password("secret"))?;
//!
//! let profile = store.get(id)?;
//! let mut session = ConnectionFactory::new().connect(&profile)?;
//! let uptime = session.execute("uptime")?;
//! # let _ = uptime;
//! # Ok(())
//! # }
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod ssh;
pub mod store;

// Re-export main types
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use session::{CancelToken, RelayExit, RelayMode, RelayOptions, RelayOutcome, Session, SessionState};
pub use ssh::{AuthStrategy, ConnectionFactory, PtyRequest};
pub use store::{CredentialStore, NewProfile, ProfileUpdate, ServerProfile};
