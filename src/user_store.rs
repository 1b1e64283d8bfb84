//! User Directory
//!
//! Durable user records backing registration, login, and the people listing.
//! Passwords are stored as bcrypt hashes only.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at_ms: u64,
}

/// User directory failures.
#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("username already taken")]
    UsernameTaken,
    #[error("user database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Trait for user directory backends.
pub trait UserStore: Send + Sync {
    /// Creates a user, assigning its id. Fails if the username exists.
    fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, UserStoreError>;

    /// Looks a user up by username.
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserStoreError>;

    /// Lists all known users as (id, username) pairs.
    fn list(&self) -> Result<Vec<(String, String)>, UserStoreError>;
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// In-memory user directory (for testing and development).
pub struct MemoryUserStore {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        MemoryUserStore {
            users: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, UserStoreError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == username) {
            return Err(UserStoreError::UsernameTaken);
        }
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at_ms: unix_now_ms(),
        };
        users.push(record.clone());
        Ok(record)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserStoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    fn list(&self) -> Result<Vec<(String, String)>, UserStoreError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .map(|u| (u.id.clone(), u.username.clone()))
            .collect())
    }
}

/// SQLite-backed user directory.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(SqliteUserStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

impl UserStore for SqliteUserStore {
    fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, UserStoreError> {
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at_ms: unix_now_ms(),
        };

        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.username,
                record.password_hash,
                record.created_at_ms as i64
            ],
        );

        match result {
            Ok(_) => Ok(record),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(UserStoreError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, password_hash, created_at_ms
             FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                    created_at_ms: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()
        .map_err(UserStoreError::from)
    }

    fn list(&self) -> Result<Vec<(String, String)>, UserStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, username FROM users ORDER BY created_at_ms ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(UserStoreError::from)
    }
}

/// Creates a user store based on the backend type.
pub fn create_user_store(
    backend: crate::message_store::StorageBackend,
    data_dir: Option<&Path>,
) -> Box<dyn UserStore> {
    use crate::message_store::StorageBackend;
    match backend {
        StorageBackend::Memory => Box::new(MemoryUserStore::new()),
        StorageBackend::Sqlite => {
            let path = data_dir
                .map(|d| d.join("users.db"))
                .unwrap_or_else(|| std::path::PathBuf::from("users.db"));

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            Box::new(SqliteUserStore::open(&path).expect("Failed to open user database"))
        }
    }
}
