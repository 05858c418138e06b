use crate::error::{Error, Result};
use crate::logging;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const ID_TAG_OPEN: &str = "<<id:";
const ID_TAG_CLOSE: &str = ">>";

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversation {
    pub user: String,
    pub conversation_id: String,
    pub persona: String,
    pub name: Option<String>,
    pub transcript: Vec<HistoryEntry>,
    pub created_at: String,
    pub last_modified: String,
}

/// Input for `insert_conversation`. `loaded` marks a conversation that was
/// opened from history and is being written back.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user: String,
    pub conversation_id: String,
    pub persona: String,
    pub transcript: Vec<HistoryEntry>,
    pub loaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub user: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FunctionCall {
    pub id: i64,
    pub message_id: i64,
    pub user: String,
    pub conversation_id: String,
    pub function_name: String,
    pub arguments: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FunctionResponse {
    pub id: i64,
    pub function_call_id: i64,
    pub user: String,
    pub conversation_id: String,
    pub response: String,
    pub timestamp: String,
}

// ============ Embedded Identifiers ============

/// Append the store-assigned id to a content string
pub fn embed_id(content: &str, id: i64) -> String {
    format!("{}{}{}{}", content, ID_TAG_OPEN, id, ID_TAG_CLOSE)
}

/// Remove a trailing id tag, returning the bare content and the id if one
/// was present. Anything that is not a well-formed trailing tag is left alone.
pub fn strip_id(content: &str) -> (&str, Option<i64>) {
    let Some(without_close) = content.strip_suffix(ID_TAG_CLOSE) else {
        return (content, None);
    };
    let Some(open) = without_close.rfind(ID_TAG_OPEN) else {
        return (content, None);
    };
    let digits = &without_close[open + ID_TAG_OPEN.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return (content, None);
    }
    match digits.parse::<i64>() {
        Ok(id) => (&content[..open], Some(id)),
        Err(_) => (content, None),
    }
}

fn stripped(content: String) -> String {
    strip_id(&content).0.to_string()
}

fn validate_role(role: &str) -> Result<()> {
    match role {
        ROLE_USER | ROLE_ASSISTANT | ROLE_SYSTEM => Ok(()),
        other => Err(Error::InvalidInput(format!("unknown role '{}'", other))),
    }
}

// ============ Store ============

/// One persona's conversation database. Every call goes through the mutex,
/// which makes it the single serialization point for writes.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))
    }

    /// Run a read against the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn).map_err(|e| {
            if matches!(e, Error::Store(_)) {
                logging::log_error(None, &format!("Store read failed: {}", e));
            }
            e
        })
    }

    /// Run `f` inside a transaction. Commits when `f` returns `Ok`; an `Err`
    /// (or a panic) drops the transaction, which rolls it back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    logging::log_error(None, &format!("Commit failed: {}", e));
                    Error::from(e)
                })?;
                Ok(value)
            }
            Err(e) => {
                logging::log_error(None, &format!("Transaction rolled back: {}", e));
                Err(e)
            }
        }
    }

    // ============ Conversations ============

    pub fn new_conversation_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn conversation_exists(&self, user: &str, conversation_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE user = ?1 AND conversation_id = ?2",
                params![user, conversation_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Insert a conversation. An existing row is left alone unless the
    /// conversation was loaded from history, in which case the old row is
    /// deleted and replaced (keeping its creation time).
    pub fn insert_conversation(&self, new: &NewConversation) -> Result<InsertOutcome> {
        let transcript = serde_json::to_string(&new.transcript)?;
        let now = Utc::now().to_rfc3339();

        let outcome = self.with_transaction(|tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT created_at FROM conversations WHERE user = ?1 AND conversation_id = ?2",
                    params![new.user, new.conversation_id],
                    |row| row.get(0),
                )
                .optional()?;

            let (created_at, outcome) = match existing {
                None => (now.clone(), InsertOutcome::Inserted),
                Some(_) if !new.loaded => return Ok(InsertOutcome::Unchanged),
                Some(created_at) => {
                    tx.execute(
                        "DELETE FROM conversations WHERE user = ?1 AND conversation_id = ?2",
                        params![new.user, new.conversation_id],
                    )?;
                    (created_at, InsertOutcome::Replaced)
                }
            };

            tx.execute(
                "INSERT INTO conversations (user, conversation_id, transcript, persona, name, created_at, last_modified)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
                params![new.user, new.conversation_id, transcript, new.persona, created_at, now],
            )?;
            Ok(outcome)
        })?;

        logging::log_conversation(Some(&new.conversation_id), &format!(
            "Insert conversation for user={}: {:?}", new.user, outcome
        ));
        Ok(outcome)
    }

    pub fn get_conversation(&self, user: &str, conversation_id: &str) -> Result<Option<Conversation>> {
        let raw = self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT user, conversation_id, persona, name, transcript, created_at, last_modified
                     FROM conversations WHERE user = ?1 AND conversation_id = ?2",
                    params![user, conversation_id],
                    read_conversation_row,
                )
                .optional()?)
        })?;
        raw.map(RawConversation::into_conversation).transpose()
    }

    /// Conversations for one user, most recently modified first
    pub fn list_conversations(&self, user: &str, limit: usize) -> Result<Vec<Conversation>> {
        let rows = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user, conversation_id, persona, name, transcript, created_at, last_modified
                 FROM conversations
                 WHERE user = ?1
                 ORDER BY last_modified DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user, limit as i64], read_conversation_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RawConversation::into_conversation).collect()
    }

    pub fn update_conversation_name(&self, user: &str, conversation_id: &str, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.with_transaction(|tx| {
            Ok(tx.execute(
                "UPDATE conversations SET name = ?1, last_modified = ?2 WHERE user = ?3 AND conversation_id = ?4",
                params![name, now, user, conversation_id],
            )?)
        })?;
        if changed == 0 {
            return Err(Error::NotFound(format!("conversation {}", conversation_id)));
        }
        logging::log_conversation(Some(conversation_id), &format!("Named conversation \"{}\"", name));
        Ok(())
    }

    /// Rewrite the denormalized transcript
    pub fn update_transcript(&self, user: &str, conversation_id: &str, transcript: &[HistoryEntry]) -> Result<()> {
        let json = serde_json::to_string(transcript)?;
        let now = Utc::now().to_rfc3339();
        let changed = self.with_transaction(|tx| {
            Ok(tx.execute(
                "UPDATE conversations SET transcript = ?1, last_modified = ?2 WHERE user = ?3 AND conversation_id = ?4",
                params![json, now, user, conversation_id],
            )?)
        })?;
        if changed == 0 {
            return Err(Error::NotFound(format!("conversation {}", conversation_id)));
        }
        Ok(())
    }

    /// Delete a conversation and everything hanging off it. Returns whether
    /// the conversation row existed.
    pub fn delete_conversation(&self, user: &str, conversation_id: &str) -> Result<bool> {
        let deleted = self.with_transaction(|tx| {
            delete_children(tx, user, conversation_id)?;
            Ok(tx.execute(
                "DELETE FROM conversations WHERE user = ?1 AND conversation_id = ?2",
                params![user, conversation_id],
            )?)
        })?;
        logging::log_conversation(Some(conversation_id), &format!(
            "Deleted conversation for user={} (existed: {})", user, deleted > 0
        ));
        Ok(deleted > 0)
    }

    /// Remove messages, function calls and responses but keep the conversation row
    pub fn clear_messages(&self, user: &str, conversation_id: &str) -> Result<()> {
        self.with_transaction(|tx| delete_children(tx, user, conversation_id))
    }

    /// Remove every conversation belonging to `user`
    pub fn reset_user(&self, user: &str) -> Result<usize> {
        let removed = self.with_transaction(|tx| {
            tx.execute("DELETE FROM responses WHERE user = ?1", params![user])?;
            tx.execute("DELETE FROM function_calls WHERE user = ?1", params![user])?;
            tx.execute("DELETE FROM messages WHERE user = ?1", params![user])?;
            Ok(tx.execute("DELETE FROM conversations WHERE user = ?1", params![user])?)
        })?;
        logging::log_store(None, &format!("Reset {} conversations for user={}", removed, user));
        Ok(removed)
    }

    // ============ Messages ============

    /// Store a message and patch its id into the content. Returns the id.
    pub fn add_message(&self, user: &str, conversation_id: &str, role: &str, content: &str) -> Result<i64> {
        validate_role(role)?;
        let now = Utc::now().to_rfc3339();
        let id = self.with_transaction(|tx| insert_message(tx, user, conversation_id, role, content, &now))?;
        logging::log_store(Some(conversation_id), &format!("Stored {} message #{}", role, id));
        Ok(id)
    }

    /// Store a user message and the assistant reply to it in one transaction.
    /// Returns `(user_message_id, reply_message_id)`.
    pub fn add_exchange(&self, user: &str, conversation_id: &str, user_text: &str, reply: &str) -> Result<(i64, i64)> {
        let now = Utc::now().to_rfc3339();
        let ids = self.with_transaction(|tx| {
            let asked = insert_message(tx, user, conversation_id, ROLE_USER, user_text, &now)?;
            let answered = insert_message(tx, user, conversation_id, ROLE_ASSISTANT, reply, &now)?;
            Ok((asked, answered))
        })?;
        logging::log_store(Some(conversation_id), &format!(
            "Stored exchange: user #{}, assistant #{}", ids.0, ids.1
        ));
        Ok(ids)
    }

    /// Messages in insertion order with id tags removed
    pub fn get_messages(&self, user: &str, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user, conversation_id, role, content, timestamp
                 FROM messages
                 WHERE user = ?1 AND conversation_id = ?2
                 ORDER BY id ASC",
            )?;
            let messages = stmt
                .query_map(params![user, conversation_id], |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        user: row.get(1)?,
                        conversation_id: row.get(2)?,
                        role: row.get(3)?,
                        content: stripped(row.get(4)?),
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }

    /// Role/content/timestamp sequence for a conversation
    pub fn get_history(&self, user: &str, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .get_messages(user, conversation_id)?
            .into_iter()
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content,
                timestamp: m.timestamp,
            })
            .collect())
    }

    pub fn count_messages(&self, user: &str, conversation_id: &str) -> Result<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user = ?1 AND conversation_id = ?2",
                params![user, conversation_id],
                |row| row.get(0),
            )?)
        })
    }

    // ============ Function Calls ============

    pub fn add_function_call(
        &self,
        user: &str,
        conversation_id: &str,
        message_id: i64,
        function_name: &str,
        arguments: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let id = self.with_transaction(|tx| {
            let owned: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1 AND user = ?2 AND conversation_id = ?3",
                params![message_id, user, conversation_id],
                |row| row.get(0),
            )?;
            if owned == 0 {
                return Err(Error::NotFound(format!("message {}", message_id)));
            }

            tx.execute(
                "INSERT INTO function_calls (message_id, user, conversation_id, function_name, arguments, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![message_id, user, conversation_id, function_name, arguments, now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE function_calls SET arguments = ?1 WHERE id = ?2",
                params![embed_id(arguments, id), id],
            )?;
            Ok(id)
        })?;
        logging::log_store(Some(conversation_id), &format!(
            "Stored function call #{} ({}) on message #{}", id, function_name, message_id
        ));
        Ok(id)
    }

    pub fn get_function_calls(&self, user: &str, conversation_id: &str, message_id: i64) -> Result<Vec<FunctionCall>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user, conversation_id, function_name, arguments, timestamp
                 FROM function_calls
                 WHERE user = ?1 AND conversation_id = ?2 AND message_id = ?3
                 ORDER BY id ASC",
            )?;
            let calls = stmt
                .query_map(params![user, conversation_id, message_id], |row| {
                    Ok(FunctionCall {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user: row.get(2)?,
                        conversation_id: row.get(3)?,
                        function_name: row.get(4)?,
                        arguments: stripped(row.get(5)?),
                        timestamp: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(calls)
        })
    }

    // ============ Responses ============

    pub fn add_response(&self, user: &str, conversation_id: &str, function_call_id: i64, response: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let id = self.with_transaction(|tx| {
            let owned: i64 = tx.query_row(
                "SELECT COUNT(*) FROM function_calls WHERE id = ?1 AND user = ?2 AND conversation_id = ?3",
                params![function_call_id, user, conversation_id],
                |row| row.get(0),
            )?;
            if owned == 0 {
                return Err(Error::NotFound(format!("function call {}", function_call_id)));
            }

            tx.execute(
                "INSERT INTO responses (function_call_id, user, conversation_id, response, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![function_call_id, user, conversation_id, response, now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE responses SET response = ?1 WHERE id = ?2",
                params![embed_id(response, id), id],
            )?;
            Ok(id)
        })?;
        logging::log_store(Some(conversation_id), &format!(
            "Stored response #{} for function call #{}", id, function_call_id
        ));
        Ok(id)
    }

    pub fn get_responses(&self, user: &str, conversation_id: &str, function_call_id: i64) -> Result<Vec<FunctionResponse>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, function_call_id, user, conversation_id, response, timestamp
                 FROM responses
                 WHERE user = ?1 AND conversation_id = ?2 AND function_call_id = ?3
                 ORDER BY id ASC",
            )?;
            let responses = stmt
                .query_map(params![user, conversation_id, function_call_id], |row| {
                    Ok(FunctionResponse {
                        id: row.get(0)?,
                        function_call_id: row.get(1)?,
                        user: row.get(2)?,
                        conversation_id: row.get(3)?,
                        response: stripped(row.get(4)?),
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(responses)
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- One row per (user, conversation_id); transcript is a JSON array
        CREATE TABLE IF NOT EXISTS conversations (
            user TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            transcript TEXT NOT NULL DEFAULT '[]',
            persona TEXT NOT NULL,
            name TEXT,
            created_at TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            PRIMARY KEY (user, conversation_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS function_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id INTEGER NOT NULL,
            user TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            function_name TEXT NOT NULL,
            arguments TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            function_call_id INTEGER NOT NULL,
            user TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            response TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(user, conversation_id);
        CREATE INDEX IF NOT EXISTS idx_function_calls_conversation ON function_calls(user, conversation_id);
        CREATE INDEX IF NOT EXISTS idx_responses_conversation ON responses(user, conversation_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_modified ON conversations(user, last_modified);
        ",
    )?;
    logging::log_store(None, "Conversation schema ready");
    Ok(())
}

fn delete_children(tx: &Transaction, user: &str, conversation_id: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM responses WHERE user = ?1 AND conversation_id = ?2",
        params![user, conversation_id],
    )?;
    tx.execute(
        "DELETE FROM function_calls WHERE user = ?1 AND conversation_id = ?2",
        params![user, conversation_id],
    )?;
    tx.execute(
        "DELETE FROM messages WHERE user = ?1 AND conversation_id = ?2",
        params![user, conversation_id],
    )?;
    Ok(())
}

struct RawConversation {
    user: String,
    conversation_id: String,
    persona: String,
    name: Option<String>,
    transcript: String,
    created_at: String,
    last_modified: String,
}

impl RawConversation {
    fn into_conversation(self) -> Result<Conversation> {
        let transcript: Vec<HistoryEntry> = serde_json::from_str(&self.transcript)?;
        Ok(Conversation {
            user: self.user,
            conversation_id: self.conversation_id,
            persona: self.persona,
            name: self.name,
            transcript,
            created_at: self.created_at,
            last_modified: self.last_modified,
        })
    }
}

fn insert_message(
    tx: &Transaction,
    user: &str,
    conversation_id: &str,
    role: &str,
    content: &str,
    now: &str,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO messages (user, conversation_id, role, content, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user, conversation_id, role, content, now],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE messages SET content = ?1 WHERE id = ?2",
        params![embed_id(content, id), id],
    )?;
    tx.execute(
        "UPDATE conversations SET last_modified = ?1 WHERE user = ?2 AND conversation_id = ?3",
        params![now, user, conversation_id],
    )?;
    Ok(id)
}

fn read_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<RawConversation> {
    Ok(RawConversation {
        user: row.get(0)?,
        conversation_id: row.get(1)?,
        persona: row.get(2)?,
        name: row.get(3)?,
        transcript: row.get(4)?,
        created_at: row.get(5)?,
        last_modified: row.get(6)?,
    })
}
