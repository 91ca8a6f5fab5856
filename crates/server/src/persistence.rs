//! Persistence layer - conversations and messages in SQLite
//!
//! Uses `spawn_blocking` for async-safe SQLite access. Each call opens its
//! own connection; WAL mode keeps concurrent readers and the writer apart.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tandem_protocol::{ConversationRecord, MessageRecord, Role};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Unknown role stored: {0}")]
    BadRole(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    model TEXT NOT NULL DEFAULT '',
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, id);
";

/// A message about to be stored
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

impl NewMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            model: String::new(),
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

/// Handle to the database file (cheap to Clone).
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let path = store.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = connect(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await??;

        info!(
            component = "persistence",
            event = "persistence.opened",
            db_path = %store.db_path.display(),
            "Database ready"
        );
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&path)?;
            f(&conn)
        })
        .await?
    }

    pub async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, StoreError> {
        let title = title.trim().to_string();
        self.with_conn(move |conn| {
            let now = chrono_now();
            conn.execute(
                "INSERT INTO conversations (title, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![title, now],
            )?;
            Ok(ConversationRecord {
                id: conn.last_insert_rowid(),
                title,
                created_at: now.clone(),
                updated_at: now,
            })
        })
        .await
    }

    pub async fn get_conversation(
        &self,
        id: i64,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(ConversationRecord {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            created_at: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM conversations
                 ORDER BY updated_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ConversationRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Messages of a conversation in insertion order.
    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<MessageRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, content, model, prompt_tokens, completion_tokens, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (id, role, content, model, prompt_tokens, completion_tokens, created_at) = row?;
                let role = Role::parse(&role).ok_or(StoreError::BadRole(role))?;
                messages.push(MessageRecord {
                    id,
                    role,
                    content,
                    model,
                    prompt_tokens,
                    completion_tokens,
                    created_at,
                });
            }
            Ok(messages)
        })
        .await
    }

    /// Store a message and bump the conversation's `updated_at`.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        message: NewMessage,
    ) -> Result<MessageRecord, StoreError> {
        self.with_conn(move |conn| {
            let now = chrono_now();
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO messages
                    (conversation_id, role, content, model, prompt_tokens, completion_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation_id,
                    message.role.as_str(),
                    message.content,
                    message.model,
                    message.prompt_tokens,
                    message.completion_tokens,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            tx.commit()?;

            debug!(
                component = "persistence",
                event = "persistence.message.appended",
                conversation_id,
                message_id = id,
                role = message.role.as_str(),
                "Message stored"
            );
            Ok(MessageRecord {
                id,
                role: message.role,
                content: message.content,
                model: message.model,
                prompt_tokens: message.prompt_tokens,
                completion_tokens: message.completion_tokens,
                created_at: now,
            })
        })
        .await
    }
}

fn connect(db_path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

/// Get current time as ISO 8601 string
fn chrono_now() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    time_to_iso8601(duration.as_secs())
}

/// Convert Unix timestamp to ISO 8601 string
fn time_to_iso8601(secs: u64) -> String {
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;

    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let days_in_months = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };
    let mut month = 1;
    for days_in_month in days_in_months {
        if days < days_in_month {
            break;
        }
        days -= days_in_month;
        month += 1;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        days + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_time_to_iso8601() {
        assert_eq!(time_to_iso8601(0), "1970-01-01T00:00:00Z");
        assert_eq!(time_to_iso8601(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(time_to_iso8601(1_700_000_000), "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn messages_come_back_in_order() {
        let (_dir, store) = test_store().await;
        let convo = store.create_conversation("  First chat ").await.unwrap();
        assert_eq!(convo.title, "First chat");

        let user = store
            .append_message(convo.id, NewMessage::user("Hello"))
            .await
            .unwrap();
        let assistant = store
            .append_message(
                convo.id,
                NewMessage {
                    role: Role::Assistant,
                    content: "Hello".to_string(),
                    model: "echo".to_string(),
                    prompt_tokens: Some(3),
                    completion_tokens: Some(1),
                },
            )
            .await
            .unwrap();
        assert!(assistant.id > user.id);

        let messages = store.list_messages(convo.id).await.unwrap();
        assert_eq!(messages, vec![user, assistant]);
    }

    #[tokio::test]
    async fn unknown_conversation_is_none() {
        let (_dir, store) = test_store().await;
        assert!(store.get_conversation(99).await.unwrap().is_none());
        assert!(store.list_messages(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path).await.unwrap();
        let convo = store.create_conversation("").await.unwrap();

        let reopened = Store::open(&path).await.unwrap();
        let listed = reopened.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, convo.id);
    }
}
