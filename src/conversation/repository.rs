//! Durable session storage.
//!
//! The repository is the source of truth for sessions and messages. It is
//! synchronous: every operation is a short SQLite statement (or transaction)
//! under a connection lock.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::schema::{configure_connection, initialize_schema, is_initialized};
use super::types::{Message, Role, Session, SessionStatus};
use crate::error::{Error, Result};

/// Durable contract for sessions and their messages.
pub trait SessionRepository: Send + Sync {
    fn create_session(&self, session: &Session) -> Result<()>;

    fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Append a message to an active session and bump its count atomically.
    ///
    /// The new message's position is the session's updated message count.
    fn append_message(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message>;

    /// The last `limit` messages in chronological order.
    fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<Message>>;

    fn all_messages(&self, session_id: Uuid) -> Result<Vec<Message>>;

    /// Close an active session, fixing its end time and duration.
    fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Session>;

    fn mark_abandoned(&self, id: Uuid) -> Result<Session>;

    /// Remove a session and its messages. Returns whether it existed.
    fn delete_session(&self, id: Uuid) -> Result<bool>;
}

/// SQLite-backed [`SessionRepository`].
#[derive(Clone)]
pub struct SqliteSessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionRepository {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if is_initialized(&conn) {
            configure_connection(&conn)?;
        } else {
            initialize_schema(&conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn)
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, topic, started_at, completed_at, message_count, duration_seconds, status";

const MESSAGE_COLUMNS: &str = "id, session_id, position, role, content, timestamp";

fn load_session(conn: &Connection, id: Uuid) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            params![id.to_string()],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn require_active(conn: &Connection, id: Uuid) -> Result<Session> {
    let session = load_session(conn, id)?.ok_or(Error::SessionNotFound(id))?;
    if !session.is_active() {
        return Err(Error::SessionNotActive {
            id,
            status: session.status.to_string(),
        });
    }
    Ok(session)
}

impl SessionRepository for SqliteSessionRepository {
    fn create_session(&self, session: &Session) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, topic, started_at, completed_at,
                                       message_count, duration_seconds, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id.to_string(),
                    session.user_id.to_string(),
                    session.topic,
                    session.started_at.to_rfc3339(),
                    session.completed_at.map(|t| t.to_rfc3339()),
                    session.message_count,
                    session.duration_seconds,
                    session.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        self.with_conn(|conn| load_session(conn, id))
    }

    fn append_message(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Message> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let session = require_active(&tx, session_id)?;
            let position = session.message_count + 1;
            let message = Message {
                id: Uuid::new_v4(),
                session_id,
                position,
                role,
                content: content.to_string(),
                timestamp: at,
            };

            tx.execute(
                "INSERT INTO messages (id, session_id, position, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    session_id.to_string(),
                    position,
                    role.as_str(),
                    content,
                    at.to_rfc3339(),
                ],
            )?;
            tx.execute(
                "UPDATE sessions SET message_count = ?1 WHERE id = ?2",
                params![position, session_id.to_string()],
            )?;

            tx.commit()?;
            Ok(message)
        })
    }

    fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2",
                MESSAGE_COLUMNS
            ))?;
            let mut messages = stmt
                .query_map(params![session_id.to_string(), limit as i64], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    fn all_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
                MESSAGE_COLUMNS
            ))?;
            let messages = stmt
                .query_map(params![session_id.to_string()], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }

    fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Session> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let mut session = require_active(&tx, id)?;
            session.status = SessionStatus::Completed;
            session.completed_at = Some(at);
            session.duration_seconds = (at - session.started_at).num_seconds().max(0);

            tx.execute(
                "UPDATE sessions SET status = ?1, completed_at = ?2, duration_seconds = ?3
                 WHERE id = ?4",
                params![
                    session.status.as_str(),
                    at.to_rfc3339(),
                    session.duration_seconds,
                    id.to_string(),
                ],
            )?;

            tx.commit()?;
            Ok(session)
        })
    }

    fn mark_abandoned(&self, id: Uuid) -> Result<Session> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let mut session = require_active(&tx, id)?;
            session.status = SessionStatus::Abandoned;
            tx.execute(
                "UPDATE sessions SET status = ?1 WHERE id = ?2",
                params![session.status.as_str(), id.to_string()],
            )?;

            tx.commit()?;
            Ok(session)
        })
    }

    fn delete_session(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM sessions WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get(7)?;
    Ok(Session {
        id: parse_uuid(row, 0)?,
        user_id: parse_uuid(row, 1)?,
        topic: row.get(2)?,
        started_at: parse_datetime(row, 3)?,
        completed_at: match row.get::<_, Option<String>>(4)? {
            Some(_) => Some(parse_datetime(row, 4)?),
            None => None,
        },
        message_count: row.get(5)?,
        duration_seconds: row.get(6)?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| conversion_error(7, format!("unknown session status '{}'", status)))?,
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    Ok(Message {
        id: parse_uuid(row, 0)?,
        session_id: parse_uuid(row, 1)?,
        position: row.get(2)?,
        role: role.parse().map_err(|e: Error| conversion_error(3, e.to_string()))?,
        content: row.get(4)?,
        timestamp: parse_datetime(row, 5)?,
    })
}

fn parse_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
