//! Message Storage
//!
//! Durable storage for chat messages. Supports both in-memory (for testing)
//! and SQLite (for production).
//!
//! Every message is persisted before it is fanned out; conversation history
//! is a query view over the stored records, ordered by creation time with an
//! insertion sequence as tie-breaker so back-to-back messages from one
//! sender never reorder.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use thiserror::Error;

/// A message accepted for persistence. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment: Option<String>,
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Server-assigned unique id.
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    /// Attachment reference name, if the message carried a file.
    pub attachment: Option<String>,
    /// Creation time, Unix milliseconds.
    pub created_at_ms: u64,
}

/// Message persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Trait for message storage backends.
pub trait MessageStore: Send + Sync {
    /// Persists a message, assigning its id and timestamp.
    fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Returns every message between the two users, both directions,
    /// ordered by creation time ascending.
    fn conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Returns the total number of stored messages.
    fn message_count(&self) -> usize;
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// In-Memory Storage (for testing and development)
// ============================================================================

/// In-memory message storage. Insertion order doubles as the sequence.
pub struct MemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        MemoryMessageStore {
            messages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryMessageStore {
    fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender: message.sender,
            recipient: message.recipient,
            text: message.text,
            attachment: message.attachment,
            created_at_ms: unix_now_ms(),
        };
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    fn conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| {
                (m.sender == user_a && m.recipient == user_b)
                    || (m.sender == user_b && m.recipient == user_a)
            })
            .cloned()
            .collect())
    }

    fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

// ============================================================================
// SQLite Storage (for production)
// ============================================================================

/// SQLite-backed persistent message storage.
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        // WAL allows readers and writers to operate concurrently
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        // seq totally orders messages even within one millisecond
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                text TEXT,
                attachment TEXT,
                created_at_ms INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender, recipient)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient, sender)",
            [],
        )?;

        Ok(SqliteMessageStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender: message.sender,
            recipient: message.recipient,
            text: message.text,
            attachment: message.attachment,
            created_at_ms: unix_now_ms(),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, text, attachment, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stored.id,
                stored.sender,
                stored.recipient,
                stored.text,
                stored.attachment,
                stored.created_at_ms as i64
            ],
        )?;

        Ok(stored)
    }

    fn conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, text, attachment, created_at_ms
             FROM messages
             WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
             ORDER BY created_at_ms ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![user_a, user_b], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                sender: row.get(1)?,
                recipient: row.get(2)?,
                text: row.get(3)?,
                attachment: row.get(4)?,
                created_at_ms: row.get::<_, i64>(5)? as u64,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn message_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory storage (lost on restart).
    Memory,
    /// SQLite persistent storage.
    #[default]
    Sqlite,
}

/// Creates a message store based on the backend type.
pub fn create_message_store(
    backend: StorageBackend,
    data_dir: Option<&Path>,
) -> Box<dyn MessageStore> {
    match backend {
        StorageBackend::Memory => Box::new(MemoryMessageStore::new()),
        StorageBackend::Sqlite => {
            let path = data_dir
                .map(|d| d.join("messages.db"))
                .unwrap_or_else(|| std::path::PathBuf::from("messages.db"));

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            Box::new(SqliteMessageStore::open(&path).expect("Failed to open message database"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(sender: &str, recipient: &str, text: &str) -> NewMessage {
        NewMessage {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            text: Some(text.to_string()),
            attachment: None,
        }
    }

    fn test_append_impl(store: &dyn MessageStore) {
        let stored = store.append(text_message("user-a", "user-b", "hi")).unwrap();

        assert!(!stored.id.is_empty());
        assert_eq!(stored.sender, "user-a");
        assert_eq!(stored.recipient, "user-b");
        assert_eq!(stored.text.as_deref(), Some("hi"));
        assert!(stored.attachment.is_none());
        assert!(stored.created_at_ms > 0);
        assert_eq!(store.message_count(), 1);
    }

    fn test_conversation_both_directions_impl(store: &dyn MessageStore) {
        store.append(text_message("user-a", "user-b", "one")).unwrap();
        store.append(text_message("user-b", "user-a", "two")).unwrap();
        store.append(text_message("user-a", "user-c", "other pair")).unwrap();

        let conversation = store.conversation("user-a", "user-b").unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].text.as_deref(), Some("one"));
        assert_eq!(conversation[1].text.as_deref(), Some("two"));

        // Same view from either end of the pair.
        let reversed = store.conversation("user-b", "user-a").unwrap();
        assert_eq!(conversation, reversed);
    }

    fn test_order_preserved_impl(store: &dyn MessageStore) {
        // Appended back-to-back, likely within one millisecond; the
        // conversation view must preserve append order regardless.
        for i in 0..20 {
            store
                .append(text_message("user-a", "user-b", &format!("m{}", i)))
                .unwrap();
        }

        let conversation = store.conversation("user-a", "user-b").unwrap();
        let texts: Vec<&str> = conversation
            .iter()
            .map(|m| m.text.as_deref().unwrap())
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
        assert_eq!(texts, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    fn test_unique_ids_impl(store: &dyn MessageStore) {
        let first = store.append(text_message("user-a", "user-b", "x")).unwrap();
        let second = store.append(text_message("user-a", "user-b", "x")).unwrap();
        assert_ne!(first.id, second.id);
    }

    fn test_attachment_field_impl(store: &dyn MessageStore) {
        let stored = store
            .append(NewMessage {
                sender: "user-a".to_string(),
                recipient: "user-b".to_string(),
                text: None,
                attachment: Some("1712345.png".to_string()),
            })
            .unwrap();
        assert!(stored.text.is_none());
        assert_eq!(stored.attachment.as_deref(), Some("1712345.png"));

        let conversation = store.conversation("user-a", "user-b").unwrap();
        assert_eq!(conversation[0].attachment.as_deref(), Some("1712345.png"));
    }

    // Memory backend tests
    #[test]
    fn test_memory_append() {
        test_append_impl(&MemoryMessageStore::new());
    }

    #[test]
    fn test_memory_conversation_both_directions() {
        test_conversation_both_directions_impl(&MemoryMessageStore::new());
    }

    #[test]
    fn test_memory_order_preserved() {
        test_order_preserved_impl(&MemoryMessageStore::new());
    }

    #[test]
    fn test_memory_unique_ids() {
        test_unique_ids_impl(&MemoryMessageStore::new());
    }

    #[test]
    fn test_memory_attachment_field() {
        test_attachment_field_impl(&MemoryMessageStore::new());
    }

    // SQLite backend tests
    #[test]
    fn test_sqlite_append() {
        test_append_impl(&SqliteMessageStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_conversation_both_directions() {
        test_conversation_both_directions_impl(&SqliteMessageStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_order_preserved() {
        test_order_preserved_impl(&SqliteMessageStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_unique_ids() {
        test_unique_ids_impl(&SqliteMessageStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_attachment_field() {
        test_attachment_field_impl(&SqliteMessageStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let store = SqliteMessageStore::open(&db_path).unwrap();
            store.append(text_message("user-a", "user-b", "survives")).unwrap();
            assert_eq!(store.message_count(), 1);
        }

        {
            let store = SqliteMessageStore::open(&db_path).unwrap();
            assert_eq!(store.message_count(), 1);
            let conversation = store.conversation("user-a", "user-b").unwrap();
            assert_eq!(conversation[0].text.as_deref(), Some("survives"));
        }
    }

    #[test]
    fn test_empty_conversation() {
        let store = MemoryMessageStore::new();
        assert!(store.conversation("user-a", "user-b").unwrap().is_empty());
    }
}
