//! Scoped SQLite access.
//!
//! Every store call opens its own connection, runs inside one
//! transaction and releases both on every exit path. Dropping an
//! uncommitted [`rusqlite::Transaction`] rolls it back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::debug;

use crate::error::Result;

/// Counter for unique in-memory database names.
static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where the profile database lives.
#[derive(Debug)]
enum Location {
    /// On-disk database file.
    File(PathBuf),
    /// Shared-cache in-memory database, kept alive by an anchor connection.
    Memory { uri: String, _anchor: Connection },
}

/// Handle to the profile database. Holds no open transaction between calls.
#[derive(Debug)]
pub struct Database {
    location: Location,
}

impl Database {
    /// Opens (or creates) an on-disk database.
    ///
    /// The parent directory is created if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self {
            location: Location::File(path),
        };
        // Fail early if the file cannot be opened.
        drop(db.connect()?);
        Ok(db)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!(
            "file:sshelf_mem_{}_{}?mode=memory&cache=shared",
            std::process::id(),
            n
        );
        let anchor = Connection::open_with_flags(&uri, Self::flags())?;
        Ok(Self {
            location: Location::Memory {
                uri,
                _anchor: anchor,
            },
        })
    }

    /// Returns the database file path, if on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory { .. } => None,
        }
    }

    fn flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }

    fn connect(&self) -> Result<Connection> {
        let conn = match &self.location {
            Location::File(path) => Connection::open_with_flags(path, Self::flags())?,
            Location::Memory { uri, .. } => Connection::open_with_flags(uri, Self::flags())?,
        };
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Runs `f` inside a fresh connection and transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise. The connection
    /// is closed before this returns either way.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!("Rolling back transaction: {}", e);
                // Drop would roll back too; an explicit rollback surfaces nothing new.
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}
