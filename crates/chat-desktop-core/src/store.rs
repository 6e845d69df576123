//! Chat history store (SQLite)
//!
//! One connection, opened at startup and shared behind a mutex by every
//! capability call. If opening fails the error is kept and every operation
//! reports it instead of the process exiting.
//!
//! Ids come from an injected [`IdSource`]. Uniqueness is enforced by the
//! primary key: insert, and on a primary-key conflict draw a new id and try
//! again, up to [`MAX_ID_ATTEMPTS`] times.

use crate::error::StoreError;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const MAX_ID_ATTEMPTS: usize = 8;

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Argument of `messages.append`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub chat_id: String,
    pub role: Role,
    pub content: String,
}

// =============================================================================
// Id generation
// =============================================================================

pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUID v4 ids
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSource;

impl IdSource for UuidSource {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_primary_key_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

// =============================================================================
// Store
// =============================================================================

pub struct Store {
    conn: Result<Mutex<Connection>, String>,
    ids: Arc<dyn IdSource>,
    default_model: String,
}

impl Store {
    /// Open (or create) the database file. Never fails; see [`Store::open_error`].
    pub fn open(path: &Path, default_model: &str) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(
                    op = "store.create_dir_failed",
                    path = %parent.display(),
                    error = %e,
                    "Could not create database directory"
                );
            }
        }
        let conn = Connection::open(path).and_then(|c| init(c, default_model));
        match &conn {
            Ok(_) => tracing::info!(
                op = "store.open",
                path = %path.display(),
                "Database ready"
            ),
            Err(e) => tracing::error!(
                op = "store.open_failed",
                path = %path.display(),
                error = %e,
                "Database unavailable"
            ),
        }
        Self::from_connection(conn, default_model)
    }

    pub fn open_in_memory(default_model: &str) -> Self {
        let conn = Connection::open_in_memory().and_then(|c| init(c, default_model));
        Self::from_connection(conn, default_model)
    }

    fn from_connection(conn: rusqlite::Result<Connection>, default_model: &str) -> Self {
        Self {
            conn: conn.map(Mutex::new).map_err(|e| e.to_string()),
            ids: Arc::new(UuidSource),
            default_model: default_model.to_string(),
        }
    }

    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn open_error(&self) -> Option<&str> {
        self.conn.as_ref().err().map(String::as_str)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        match &self.conn {
            Ok(m) => m.lock().map_err(|_| StoreError::Poisoned),
            Err(e) => Err(StoreError::Unavailable(e.clone())),
        }
    }

    /// Draw an id from the configured source.
    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// Run `insert` with fresh ids until one does not collide.
    ///
    /// `preferred` is tried first, then ids from the source.
    fn insert_fresh<F>(&self, conn: &Connection, what: &str, preferred: Option<&str>, insert: F) -> Result<String, StoreError>
    where
        F: Fn(&Connection, &str) -> rusqlite::Result<usize>,
    {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = match (attempt, preferred) {
                (1, Some(id)) => id.to_string(),
                _ => self.ids.next_id(),
            };
            match insert(conn, &id) {
                Ok(_) => return Ok(id),
                Err(e) if is_primary_key_conflict(&e) => {
                    tracing::warn!(
                        op = "store.id_collision",
                        table = %what,
                        id = %id,
                        attempt,
                        "Id already taken, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    // -------------------------------------------------------------------------
    // Chats
    // -------------------------------------------------------------------------

    /// All chats, newest first
    pub fn list_chats(&self) -> Result<Vec<Chat>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, model, created_at FROM chats ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Chat {
                id: row.get(0)?,
                title: row.get(1)?,
                model: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Insert a chat titled "New Chat" and return its id.
    pub fn create_chat(&self, model: Option<&str>) -> Result<String, StoreError> {
        let conn = self.conn()?;
        let model = model.unwrap_or(&self.default_model);
        let created_at = now();
        let id = self.insert_fresh(&conn, "chats", None, |c, id| {
            c.execute(
                "INSERT INTO chats (id, title, model, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, DEFAULT_TITLE, model, created_at],
            )
        })?;
        tracing::info!(op = "store.chat_created", chat_id = %id, model = %model, "Chat created");
        Ok(id)
    }

    /// Delete a chat and (by cascade) its messages. Returns false if absent.
    pub fn delete_chat(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        tracing::info!(op = "store.chat_deleted", chat_id = %id, removed, "Chat delete");
        Ok(removed > 0)
    }

    pub fn chat_model(&self, id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let model = conn
            .query_row("SELECT model FROM chats WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(model)
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// Messages of a chat, oldest first
    pub fn history(&self, chat_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM chats WHERE id = ?1", params![chat_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::ChatNotFound(chat_id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, created_at FROM messages \
             WHERE chat_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn append_message(&self, message: &NewMessage) -> Result<String, StoreError> {
        let conn = self.conn()?;
        insert_message(self, &conn, &message.chat_id, message.role, &message.content, None)
    }

    /// Store a prompt and its response as two rows in one transaction.
    ///
    /// The response row gets `response_id` unless that id is already taken.
    /// Returns `(user_message_id, assistant_message_id)`.
    pub fn record_exchange(
        &self,
        chat_id: &str,
        prompt: &str,
        response: &str,
        response_id: Option<&str>,
    ) -> Result<(String, String), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let user_id = insert_message(self, &tx, chat_id, Role::User, prompt, None)?;
        let assistant_id = insert_message(self, &tx, chat_id, Role::Assistant, response, response_id)?;
        tx.commit()?;

        tracing::info!(
            op = "store.exchange_recorded",
            chat_id = %chat_id,
            prompt_len = prompt.len(),
            response_len = response.len(),
            "Exchange stored"
        );
        Ok((user_id, assistant_id))
    }
}

fn insert_message(
    store: &Store,
    conn: &Connection,
    chat_id: &str,
    role: Role,
    content: &str,
    preferred: Option<&str>,
) -> Result<String, StoreError> {
    let created_at = now();
    let result = store.insert_fresh(conn, "messages", preferred, |c, id| {
        c.execute(
            "INSERT INTO messages (id, chat_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, chat_id, role, content, created_at],
        )
    });
    match result {
        Err(StoreError::Sqlite(e)) if is_foreign_key_violation(&e) => Err(StoreError::ChatNotFound(chat_id.to_string())),
        other => other,
    }
}

fn init(conn: Connection, default_model: &str) -> rusqlite::Result<Connection> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // DDL cannot take parameters; the model name is quoted as an SQL literal.
    let model_literal = default_model.replace('\'', "''");
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS chats (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            model TEXT NOT NULL DEFAULT '{model}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'system')),
            content TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
        "#,
        model = model_literal
    ))?;
    Ok(conn)
}
