//! Durable user credential storage.
//!
//! One SQLite row per user: digest, salt, permission flags, and the home
//! directory the sandbox is rooted at. The schema is versioned through
//! `PRAGMA user_version` so it can grow later without breaking existing
//! databases.
//!
//! The store is read-mostly: sessions only ever call [`UserStore::verify`],
//! and records are created or removed exclusively by the provisioning CLI.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::password::{self, PasswordError};

/// Errors that can occur during user store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database path could not be prepared.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// A stored digest or salt could not be interpreted.
    #[error("stored credential is corrupt: {0}")]
    Credential(#[from] PasswordError),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("user store lock poisoned")]
    LockPoisoned,
}

/// Result type for user store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-user capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Allowed to list directories and download files.
    pub can_read: bool,
    /// Allowed to upload files.
    pub can_write: bool,
    /// Allowed to delete files.
    pub can_delete: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            can_read: true,
            can_write: true,
            can_delete: false,
        }
    }
}

/// One provisioned user.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Unique login name.
    pub username: String,
    /// Hex-encoded PBKDF2 digest.
    pub password_hash: String,
    /// Hex-encoded per-user salt.
    pub salt: String,
    /// Capability flags.
    pub permissions: Permissions,
    /// Absolute path of the user's home directory.
    pub home_dir: PathBuf,
}

/// SQLite-backed store of user records.
///
/// The connection sits behind a mutex; every call takes it for the
/// duration of one statement. Sessions never share cursor state.
pub struct UserStore {
    conn: Mutex<Connection>,
    iterations: u32,
}

impl UserStore {
    /// Open or create a user database at the given path.
    ///
    /// Pending schema migrations are applied. `iterations` is the PBKDF2
    /// work factor used for newly provisioned passwords and verification.
    pub fn open<P: AsRef<Path>>(path: P, iterations: u32) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::InvalidPath(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, iterations)
    }

    /// Open an in-memory store (useful for testing).
    #[cfg(test)]
    pub fn open_in_memory(iterations: u32) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, iterations)
    }

    fn from_connection(conn: Connection, iterations: u32) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            iterations,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run all pending schema migrations.
    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    username      TEXT PRIMARY KEY,
                    password_hash TEXT NOT NULL,
                    salt          TEXT NOT NULL,
                    can_read      INTEGER NOT NULL DEFAULT 1,
                    can_write     INTEGER NOT NULL DEFAULT 1,
                    can_delete    INTEGER NOT NULL DEFAULT 0,
                    home_dir      TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute("PRAGMA user_version = 1", [])?;
        }

        Ok(())
    }

    /// Create or replace a user.
    ///
    /// The password is hashed with a fresh salt; `home_dir` is made
    /// absolute before storing. The directory itself is created lazily on
    /// the user's first successful login.
    pub fn add_user(
        &self,
        username: &str,
        password: &str,
        home_dir: &Path,
        permissions: Permissions,
    ) -> StoreResult<()> {
        let home = std::path::absolute(home_dir)
            .map_err(|e| StoreError::InvalidPath(format!("{}: {}", home_dir.display(), e)))?;
        let (digest, salt) = password::hash_password(password, self.iterations);

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO users
                (username, password_hash, salt, can_read, can_write, can_delete, home_dir)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                username,
                digest,
                salt,
                permissions.can_read,
                permissions.can_write,
                permissions.can_delete,
                home.to_string_lossy().into_owned(),
            ],
        )?;

        Ok(())
    }

    /// Remove a user. Returns whether a record existed.
    pub fn remove_user(&self, username: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        Ok(affected > 0)
    }

    /// Fetch one user record.
    pub fn get_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                r#"
                SELECT username, password_hash, salt, can_read, can_write, can_delete, home_dir
                FROM users WHERE username = ?1
                "#,
                params![username],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// List all users, ordered by name.
    pub fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT username, password_hash, salt, can_read, can_write, can_delete, home_dir
            FROM users ORDER BY username
            "#,
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Check credentials and return the matching record.
    ///
    /// `Ok(None)` covers both an unknown username and a wrong password;
    /// callers must not distinguish the two on the wire. This recomputes
    /// a PBKDF2 digest and should run on a blocking thread when called
    /// from async code.
    pub fn verify(&self, username: &str, candidate: &str) -> StoreResult<Option<UserRecord>> {
        let record = match self.get_user(username)? {
            Some(record) => record,
            None => {
                debug!(user = username, "login attempt for unknown user");
                return Ok(None);
            }
        };

        if password::verify_password(
            &record.password_hash,
            &record.salt,
            candidate,
            self.iterations,
        )? {
            Ok(Some(record))
        } else {
            debug!(user = username, "password mismatch");
            Ok(None)
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        username: row.get(0)?,
        password_hash: row.get(1)?,
        salt: row.get(2)?,
        permissions: Permissions {
            can_read: row.get(3)?,
            can_write: row.get(4)?,
            can_delete: row.get(5)?,
        },
        home_dir: PathBuf::from(row.get::<_, String>(6)?),
    })
}
