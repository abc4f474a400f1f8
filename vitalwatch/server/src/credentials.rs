use std::path::Path;

use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SALT_LEN: usize = 16;

/// Credential store failures.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A record with this email already exists.
    #[error("Email already registered")]
    DuplicateEmail,
    /// Unknown email or wrong password; the two are not distinguished.
    #[error("Invalid email or password")]
    InvalidCredentials,
    /// The store was closed.
    #[error("credential store is closed")]
    Closed,
    /// Any other database failure.
    #[error("{0}")]
    Storage(#[from] rusqlite::Error),
}

/// Registration and login against persisted credentials.
pub trait CredentialStore: Send + Sync {
    /// Creates a credential record.
    fn register(&self, email: &str, password: &str, name: &str) -> Result<(), CredentialError>;

    /// Returns the display name when email and password match.
    fn login(&self, email: &str, password: &str) -> Result<String, CredentialError>;

    /// Releases the underlying connection. Later calls fail with [`CredentialError::Closed`].
    fn close(&self) -> Result<(), CredentialError>;
}

/// SQLite-backed credential store.
///
/// Passwords are kept as `sha256(salt || password)` with a per-user random
/// salt; both are hex encoded. Emails are matched byte for byte.
pub struct SqliteCredentialStore {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for SqliteCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCredentialStore")
            .field("open", &self.conn.lock().is_some())
            .finish()
    }
}

impl SqliteCredentialStore {
    /// Opens (or creates) the database file and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, CredentialError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CredentialError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                email TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                name TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CredentialError>,
    ) -> Result<T, CredentialError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(CredentialError::Closed)?;
        f(conn)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn register(&self, email: &str, password: &str, name: &str) -> Result<(), CredentialError> {
        let salt = new_salt();
        let hash = hash_password(&salt, password);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, password_hash, salt, name) VALUES (?1, ?2, ?3, ?4)",
                params![email, hash, salt, name],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(ref failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    CredentialError::DuplicateEmail
                }
                other => CredentialError::Storage(other),
            })?;
            Ok(())
        })
    }

    fn login(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT password_hash, salt, name FROM users WHERE email = ?1",
                    params![email],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?)
        })?;
        match row {
            Some((stored, salt, name)) if hash_password(&salt, password) == stored => Ok(name),
            _ => Err(CredentialError::InvalidCredentials),
        }
    }

    fn close(&self) -> Result<(), CredentialError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, err)| CredentialError::Storage(err))?;
        }
        Ok(())
    }
}

fn new_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
