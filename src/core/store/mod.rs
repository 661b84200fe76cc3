//! Durable, self-repairing storage for threads and their messages.
//!
//! Everything lives in a single SQLite file. Before every operation the
//! store checks that the file still exists and answers a trivial query; if
//! it does not, the file is deleted and the schema recreated. Losing the
//! stored history is accepted in exchange for always having a usable store.
//! Each rebuild is recorded as a [`RepairNotice`] so callers can tell the
//! user about it.
//!
//! One connection is shared behind a mutex, so concurrent callers are
//! serialized here rather than by the caller.

mod error;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::core::message::{ConversationThread, Message, Role};

pub use error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    thread_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_time ON messages (thread_id, timestamp);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sidecar files SQLite may leave next to the database.
const SIDECAR_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// Recorded whenever the backing file had to be deleted and recreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairNotice {
    pub reason: String,
    pub at: DateTime<Utc>,
}

pub struct ThreadStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    repairs: Mutex<Vec<RepairNotice>>,
}

impl ThreadStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            conn: Mutex::new(None),
            repairs: Mutex::new(Vec::new()),
        };
        store.ensure_database()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the repairs performed since the last call.
    pub fn drain_repairs(&self) -> Vec<RepairNotice> {
        std::mem::take(&mut *self.repairs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Verify the backing file is present and readable, rebuilding it if not.
    pub fn ensure_database(&self) -> Result<(), StoreError> {
        let mut slot = self.lock();
        self.ensure_connection(&mut slot).map(|_| ())
    }

    /// Load every thread, most recently updated first, each with its
    /// messages in chronological order.
    ///
    /// Never fails: a read error triggers one rebuild and an empty result.
    pub fn load_all_threads(&self) -> Vec<ConversationThread> {
        let mut slot = self.lock();
        let conn = match self.ensure_connection(&mut slot) {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "Thread store unavailable; starting empty");
                return Vec::new();
            }
        };

        match read_all_threads(conn) {
            Ok(threads) => {
                debug!(count = threads.len(), "Loaded threads from store");
                threads
            }
            Err(err) => {
                warn!(error = %err, "Failed to read threads; rebuilding store");
                if let Err(repair_err) = self.rebuild(&mut slot, format!("read failed: {err}")) {
                    warn!(error = %repair_err, "Store rebuild failed");
                }
                Vec::new()
            }
        }
    }

    /// Insert or replace thread metadata. Messages are not touched.
    pub fn save_thread(&self, thread: &ConversationThread) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO threads (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    thread.id,
                    thread.title,
                    encode_time(&thread.created_at),
                    encode_time(&thread.updated_at)
                ],
            )
            .map_err(StoreError::sqlite("save thread"))?;
            Ok(())
        })
    }

    /// Delete a thread's messages, then the thread row.
    ///
    /// The second statement runs even if the first fails; the first error
    /// is reported.
    pub fn delete_thread(&self, thread: &ConversationThread) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            let messages = conn
                .execute("DELETE FROM messages WHERE thread_id = ?1", [&thread.id])
                .map_err(StoreError::sqlite("delete thread messages"));
            let row = conn
                .execute("DELETE FROM threads WHERE id = ?1", [&thread.id])
                .map_err(StoreError::sqlite("delete thread"));
            messages.and(row).map(|_| ())
        })
    }

    /// Insert or replace a finalized message.
    pub fn save_message(&self, message: &Message, thread_id: &str) -> Result<(), StoreError> {
        reject_streaming(message)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO messages (id, thread_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    thread_id,
                    message.role.as_str(),
                    message.content,
                    encode_time(&message.timestamp)
                ],
            )
            .map_err(StoreError::sqlite("save message"))?;
            Ok(())
        })
    }

    /// Rewrite the content of an existing message row.
    ///
    /// Returns whether a row was changed.
    pub fn update_message(&self, message: &Message, thread_id: &str) -> Result<bool, StoreError> {
        reject_streaming(message)?;
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE messages SET content = ?1 WHERE id = ?2 AND thread_id = ?3",
                    params![message.content, message.id, thread_id],
                )
                .map_err(StoreError::sqlite("update message"))?;
            if changed == 0 {
                debug!(message_id = %message.id, "No stored row to update");
            }
            Ok(changed > 0)
        })
    }

    pub fn delete_message(&self, message_id: &str) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])
                .map_err(StoreError::sqlite("delete message"))?;
            Ok(())
        })
    }

    /// Remove every message of a thread, keeping the thread row.
    pub fn delete_messages(&self, thread_id: &str) -> Result<usize, StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM messages WHERE thread_id = ?1", [thread_id])
                .map_err(StoreError::sqlite("delete messages"))
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut slot = self.lock();
        let conn = self.ensure_connection(&mut slot)?;
        op(conn)
    }

    fn ensure_connection<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> Result<&'a Connection, StoreError> {
        if let Some(reason) = self.health_problem(slot) {
            self.rebuild(slot, reason)?;
        }
        if slot.is_none() {
            info!(path = %self.path.display(), "Creating thread store");
            *slot = Some(initialize(&self.path)?);
        }
        slot.as_ref().ok_or_else(|| StoreError::Corrupt {
            detail: "connection unavailable after initialization".to_string(),
        })
    }

    /// `None` when the store is healthy or simply has not been created yet.
    fn health_problem(&self, slot: &mut Option<Connection>) -> Option<String> {
        if !self.path.exists() {
            return slot
                .take()
                .map(|_| "database file was removed".to_string());
        }

        if let Some(conn) = slot.as_ref() {
            return check_schema(conn)
                .err()
                .map(|err| format!("health check failed: {err}"));
        }

        match Connection::open(&self.path) {
            Ok(conn) => match check_schema(&conn) {
                Ok(()) => {
                    *slot = Some(conn);
                    None
                }
                Err(err) => Some(format!("existing database is unreadable: {err}")),
            },
            Err(err) => Some(format!("existing database cannot be opened: {err}")),
        }
    }

    fn rebuild(&self, slot: &mut Option<Connection>, reason: String) -> Result<(), StoreError> {
        warn!(path = %self.path.display(), %reason, "Rebuilding thread store");
        drop(slot.take());

        remove_if_present(&self.path)?;
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = self.path.clone().into_os_string();
            sidecar.push(suffix);
            remove_if_present(Path::new(&sidecar))?;
        }

        *slot = Some(initialize(&self.path)?);
        self.repairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RepairNotice {
                reason,
                at: Utc::now(),
            });
        Ok(())
    }
}

fn reject_streaming(message: &Message) -> Result<(), StoreError> {
    if message.streaming {
        return Err(StoreError::StreamingMessage {
            message_id: message.id.clone(),
        });
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn initialize(path: &Path) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path).map_err(StoreError::sqlite("open"))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(StoreError::sqlite("configure"))?;
    conn.execute_batch(SCHEMA)
        .map_err(StoreError::sqlite("create schema"))?;
    Ok(conn)
}

/// Touch both tables without scanning them; fails if the schema is gone.
fn check_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    for sql in [
        "SELECT 1 FROM threads LIMIT 1",
        "SELECT 1 FROM messages LIMIT 1",
    ] {
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query([])?;
        rows.next()?;
    }
    Ok(())
}

fn encode_time(time: &DateTime<Utc>) -> String {
    // Fixed-width UTC text sorts chronologically
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt {
            detail: format!("bad timestamp '{raw}': {err}"),
        })
}

fn read_all_threads(conn: &Connection) -> Result<Vec<ConversationThread>, StoreError> {
    let mut thread_stmt = conn
        .prepare("SELECT id, title, created_at, updated_at FROM threads ORDER BY updated_at DESC")
        .map_err(StoreError::sqlite("load threads"))?;
    let thread_rows = thread_stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::sqlite("load threads"))?;

    let mut message_stmt = conn
        .prepare(
            "SELECT id, role, content, timestamp FROM messages
             WHERE thread_id = ?1 ORDER BY timestamp ASC, rowid ASC",
        )
        .map_err(StoreError::sqlite("load messages"))?;

    let mut threads = Vec::with_capacity(thread_rows.len());
    for (id, title, created_at, updated_at) in thread_rows {
        let message_rows = message_stmt
            .query_map([&id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::sqlite("load messages"))?;

        let mut messages = Vec::with_capacity(message_rows.len());
        for (message_id, role, content, timestamp) in message_rows {
            let role = Role::try_from(role).map_err(|detail| StoreError::Corrupt { detail })?;
            messages.push(Message {
                id: message_id,
                role,
                content,
                timestamp: decode_time(&timestamp)?,
                streaming: false,
            });
        }

        threads.push(ConversationThread {
            id,
            title,
            messages,
            created_at: decode_time(&created_at)?,
            updated_at: decode_time(&updated_at)?,
        });
    }
    Ok(threads)
}
