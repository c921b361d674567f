//! Command-line interface for the `sshelf` binary.
//!
//! Argument grammar (clap derive) and dispatch onto the store, the
//! connection factory and sessions.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::session::{CancelToken, RelayMode, RelayOptions};
use crate::ssh::{ConnectionFactory, PtyRequest};
use crate::store::{CredentialStore, DEFAULT_PORT, NewProfile, ProfileUpdate, ServerProfile};

/// sshelf - saved SSH server profiles and interactive shells.
#[derive(Debug, Parser)]
#[command(name = "sshelf", version, about = "Saved SSH server profiles and interactive shells")]
pub struct Cli {
    /// Config file (default: ~/.sshelfrc)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save a new server profile
    Add {
        #[arg(short = 'H', long = "hostname")]
        hostname: String,
        #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(short = 'U', long = "username")]
        username: String,
        #[arg(short = 'P', long = "password")]
        password: Option<String>,
        /// Private key file
        #[arg(short = 'k', long = "key", value_name = "FILE")]
        key: Option<String>,
    },
    /// Show one profile
    Get {
        #[arg(short = 'i', long = "id")]
        id: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a profile (an empty value clears a credential)
    Update {
        #[arg(short = 'i', long = "id")]
        id: i64,
        #[arg(short = 'H', long = "hostname")]
        hostname: Option<String>,
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
        #[arg(short = 'U', long = "username")]
        username: Option<String>,
        #[arg(short = 'P', long = "password")]
        password: Option<String>,
        #[arg(short = 'k', long = "key", value_name = "FILE")]
        key: Option<String>,
    },
    /// Remove a profile
    Delete {
        #[arg(short = 'i', long = "id")]
        id: i64,
    },
    /// List all profiles
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open an interactive shell on a saved server
    Connect {
        #[arg(short = 'i', long = "id")]
        id: i64,
        /// Relay implementation (overrides relay_mode in the config file)
        #[arg(long, value_enum)]
        mode: Option<CliRelayMode>,
    },
    /// Run one command on a saved server and print its output
    Exec {
        #[arg(short = 'i', long = "id")]
        id: i64,
        /// Command line to run remotely
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Relay mode as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliRelayMode {
    Auto,
    Multiplexed,
    Threaded,
}

impl From<CliRelayMode> for RelayMode {
    fn from(mode: CliRelayMode) -> Self {
        match mode {
            CliRelayMode::Auto => RelayMode::Auto,
            CliRelayMode::Multiplexed => RelayMode::Multiplexed,
            CliRelayMode::Threaded => RelayMode::Threaded,
        }
    }
}

/// Everything a command needs.
pub struct Context {
    pub config: Config,
    pub store: CredentialStore,
    pub factory: ConnectionFactory,
}

impl Context {
    /// Builds the store and factory described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let store =
            CredentialStore::open(&config.database)?.strict_credentials(config.strict_credentials);
        let factory = ConnectionFactory::new()
            .with_timeout(config.connect_timeout)
            .with_known_hosts(config.known_hosts());
        Ok(Self {
            config,
            store,
            factory,
        })
    }
}

/// Runs one command, writing its report to `out`.
pub fn dispatch<W: Write>(command: Command, ctx: &Context, out: &mut W) -> Result<()> {
    match command {
        Command::Add {
            hostname,
            port,
            username,
            password,
            key,
        } => {
            let profile = NewProfile {
                hostname,
                port,
                username,
                password,
                private_key_path: key,
            };
            let id = ctx.store.add(profile)?;
            writeln!(out, "Added server {}", id)?;
        }
        Command::Get { id, json } => {
            let profile = ctx.store.get(id)?;
            if json {
                write_json(out, &profile)?;
            } else {
                write_profile(out, &profile)?;
            }
        }
        Command::Update {
            id,
            hostname,
            port,
            username,
            password,
            key,
        } => {
            let port = port.map(|p| p.to_string());
            let pairs = [
                ("hostname", hostname.as_deref()),
                ("port", port.as_deref()),
                ("username", username.as_deref()),
                ("password", password.as_deref()),
                ("private_key_path", key.as_deref()),
            ];
            let update = ProfileUpdate::from_pairs(
                pairs
                    .into_iter()
                    .filter_map(|(column, value)| value.map(|v| (column, v))),
            )?;
            ctx.store.update(id, &update)?;
            writeln!(out, "Updated server {}", id)?;
        }
        Command::Delete { id } => {
            ctx.store.delete(id)?;
            writeln!(out, "Deleted server {}", id)?;
        }
        Command::List { json } => {
            let profiles = ctx.store.list()?;
            if json {
                write_json(out, &profiles)?;
            } else if profiles.is_empty() {
                writeln!(out, "No servers saved")?;
            } else {
                for p in &profiles {
                    writeln!(
                        out,
                        "{:>4}  {:<40} {}",
                        p.id,
                        p.connection_string(),
                        p.auth_label()
                    )?;
                }
            }
        }
        Command::Connect { id, mode } => {
            let profile = ctx.store.get(id)?;
            let mut session = ctx.factory.connect(&profile)?;
            let options = RelayOptions {
                mode: mode.map_or(ctx.config.relay_mode, RelayMode::from),
                pty: PtyRequest::for_local_terminal(&ctx.config.term),
                cancel: CancelToken::new(),
            };
            let outcome = session.relay(&options)?;
            info!("Session to {} ended: {:?}", profile.connection_string(), outcome.exit);
            session.close();
        }
        Command::Exec { id, command } => {
            let profile = ctx.store.get(id)?;
            let mut session = ctx.factory.connect(&profile)?;
            let stdout = session.execute(&command.join(" "))?;
            out.write_all(&stdout)?;
            out.flush()?;
            session.close();
        }
    }
    Ok(())
}

fn write_profile<W: Write>(out: &mut W, p: &ServerProfile) -> io::Result<()> {
    writeln!(out, "id:        {}", p.id)?;
    writeln!(out, "hostname:  {}", p.hostname)?;
    writeln!(out, "port:      {}", p.port)?;
    writeln!(out, "username:  {}", p.username)?;
    writeln!(
        out,
        "password:  {}",
        if p.password.is_some() { "(set)" } else { "-" }
    )?;
    writeln!(
        out,
        "key:       {}",
        p.private_key_path.as_deref().unwrap_or("-")
    )?;
    writeln!(out, "auth:      {}", p.auth_label())
}

fn write_json<W: Write, T: serde::Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(io::Error::from)?;
    writeln!(out)
}
