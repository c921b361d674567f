//! Durable table of SSH server profiles.
//!
//! Every operation is atomic: one connection, one transaction, commit on
//! success and rollback on any failure. Storage failures are returned as
//! [`crate::Error`] values and never terminate the process.

mod db;
pub mod profile;

use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

pub use db::Database;
pub use profile::{DEFAULT_PORT, NewProfile, ProfileUpdate, ServerProfile};

use crate::error::{Error, Result};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS ssh_servers (
    id INTEGER PRIMARY KEY,
    hostname TEXT NOT NULL,
    port INTEGER NOT NULL,
    username TEXT NOT NULL,
    password TEXT,
    private_key_path TEXT
)";

const SELECT_COLUMNS: &str =
    "SELECT id, hostname, port, username, password, private_key_path FROM ssh_servers";

/// CRUD access to saved server profiles.
#[derive(Debug)]
pub struct CredentialStore {
    db: Database,
    /// Reject profiles carrying both a password and a key path.
    strict_credentials: bool,
}

impl CredentialStore {
    /// Opens the store at `path`, creating the schema if needed.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::with_database(Database::open(path)?)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_database(Database::open_in_memory()?)
    }

    /// Wraps an existing database handle, creating the schema if needed.
    pub fn with_database(db: Database) -> Result<Self> {
        db.transaction(|tx| {
            tx.execute_batch(CREATE_TABLE)?;
            Ok(())
        })?;
        Ok(Self {
            db,
            strict_credentials: false,
        })
    }

    /// Enables or disables the single-credential write check.
    #[must_use]
    pub fn strict_credentials(mut self, strict: bool) -> Self {
        self.strict_credentials = strict;
        self
    }

    /// Inserts a profile and returns its new id.
    pub fn add(&self, profile: NewProfile) -> Result<i64> {
        let profile = profile.normalized();
        profile.validate(self.strict_credentials)?;

        let id = self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO ssh_servers (hostname, port, username, password, private_key_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    profile.hostname,
                    profile.port,
                    profile.username,
                    profile.password,
                    profile.private_key_path
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        info!(
            "Added server {} ({}@{}:{})",
            id, profile.username, profile.hostname, profile.port
        );
        Ok(id)
    }

    /// Returns the profile with `id`.
    pub fn get(&self, id: i64) -> Result<ServerProfile> {
        self.db.transaction(|tx| {
            tx.query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), [id], from_row)
                .optional()?
                .ok_or(Error::NotFound(id))
        })
    }

    /// Returns all profiles in id order.
    pub fn list(&self) -> Result<Vec<ServerProfile>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
            let rows = stmt.query_map([], from_row)?;
            let mut profiles = Vec::new();
            for row in rows {
                profiles.push(row?);
            }
            Ok(profiles)
        })
    }

    /// Applies a partial update to the profile with `id`.
    ///
    /// Fails with `Validation` if `update` sets no field, `NotFound` if
    /// the id is unknown. The id itself is never changed.
    pub fn update(&self, id: i64, update: &ProfileUpdate) -> Result<()> {
        if update.is_empty() {
            return Err(Error::Validation("no fields provided to update".to_string()));
        }

        self.db.transaction(|tx| {
            let current = tx
                .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), [id], from_row)
                .optional()?
                .ok_or(Error::NotFound(id))?;

            let merged = update.merge(&current, self.strict_credentials)?;
            tx.execute(
                "UPDATE ssh_servers SET hostname = ?1, port = ?2, username = ?3, \
                 password = ?4, private_key_path = ?5 WHERE id = ?6",
                params![
                    merged.hostname,
                    merged.port,
                    merged.username,
                    merged.password,
                    merged.private_key_path,
                    id
                ],
            )?;
            Ok(())
        })?;

        debug!("Updated server {}", id);
        Ok(())
    }

    /// Removes the profile with `id`.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM ssh_servers WHERE id = ?1", [id])?;
            if removed == 0 {
                return Err(Error::NotFound(id));
            }
            Ok(())
        })?;

        info!("Deleted server {}", id);
        Ok(())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ServerProfile> {
    Ok(ServerProfile {
        id: row.get(0)?,
        hostname: row.get(1)?,
        port: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        private_key_path: row.get(5)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn store() -> CredentialStore {
        CredentialStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let store = store();
        let id = store
            .add(NewProfile::new("db1", 22, "admin").with_password("secret"))
            .unwrap();
        assert_eq!(id, 1);

        let p = store.get(id).unwrap();
        assert_eq!(p.hostname, "db1");
        assert_eq!(p.port, 22);
        assert_eq!(p.username, "admin");
        assert_eq!(p.password.as_deref(), Some("secret"));
        assert!(p.private_key_path.is_none());
    }

    #[test]
    fn test_add_rejects_invalid() {
        let store = store();
        let err = store.add(NewProfile::new("", 22, "admin")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_get_unknown() {
        assert_eq!(store().get(9).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_hostname_only() {
        let store = store();
        let id = store
            .add(NewProfile::new("db1", 22, "admin").with_password("secret"))
            .unwrap();

        let update = ProfileUpdate {
            hostname: Some("db1.local".to_string()),
            ..Default::default()
        };
        store.update(id, &update).unwrap();

        let p = store.get(id).unwrap();
        assert_eq!(p.hostname, "db1.local");
        assert_eq!(p.port, 22);
        assert_eq!(p.username, "admin");
        assert_eq!(p.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_update_empty_fails() {
        let store = store();
        let id = store.add(NewProfile::new("h", 22, "u")).unwrap();
        let err = store.update(id, &ProfileUpdate::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_update_unknown_fails() {
        let update = ProfileUpdate {
            port: Some(2222),
            ..Default::default()
        };
        let err = store().update(5, &update).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_update_invalid_leaves_row_untouched() {
        let store = store();
        let id = store.add(NewProfile::new("h", 22, "u")).unwrap();
        let update = ProfileUpdate {
            port: Some(0),
            hostname: Some("other".to_string()),
            ..Default::default()
        };
        assert!(store.update(id, &update).is_err());
        assert_eq!(store.get(id).unwrap().hostname, "h");
    }

    #[test]
    fn test_update_clears_password() {
        let store = store();
        let id = store
            .add(NewProfile::new("h", 22, "u").with_password("p").with_key("/k"))
            .unwrap();
        let update = ProfileUpdate {
            password: Some(None),
            ..Default::default()
        };
        store.update(id, &update).unwrap();
        let p = store.get(id).unwrap();
        assert!(p.password.is_none());
        assert_eq!(p.private_key_path.as_deref(), Some("/k"));
    }

    #[test]
    fn test_strict_store_rejects_dual_update() {
        let store = store().strict_credentials(true);
        let id = store.add(NewProfile::new("h", 22, "u").with_key("/k")).unwrap();
        let update = ProfileUpdate {
            password: Some(Some("p".to_string())),
            ..Default::default()
        };
        let err = store.update(id, &update).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_delete() {
        let store = store();
        let id = store.add(NewProfile::new("h", 22, "u")).unwrap();
        store.delete(id).unwrap();
        assert_eq!(store.get(id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.delete(id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_in_id_order() {
        let store = store();
        let a = store.add(NewProfile::new("a", 22, "u")).unwrap();
        let b = store.add(NewProfile::new("b", 22, "u")).unwrap();
        let c = store.add(NewProfile::new("c", 22, "u")).unwrap();
        store.delete(b).unwrap();

        let ids: Vec<i64> = store.list().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a, c]);
    }
}
