//! SSH connection management module.
//!
//! Provides functionality for:
//! - Selecting an authentication strategy for a saved profile
//! - Connecting and authenticating with a bounded timeout
//! - Trust-on-first-use host key handling

pub mod auth;
pub mod connection;
pub mod factory;
pub mod known_hosts;

pub use auth::AuthStrategy;
pub use connection::{
    ChannelWriter, CommandChannel, Connection, PtyRequest, RemoteChannel, SplitChannel,
    Ssh2Connection,
};
pub use factory::{ConnectionFactory, DEFAULT_CONNECT_TIMEOUT};
pub use known_hosts::{HostKeyDecision, KnownHosts};
