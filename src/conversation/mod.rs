//! Conversation state: sessions and their message logs.
//!
//! The SQLite repository is the source of truth. [`ConversationStore`] keeps a
//! cached mirror of each session's recent messages in front of it.

pub mod repository;
pub mod schema;
pub mod store;
pub mod types;

pub use repository::{SessionRepository, SqliteSessionRepository};
pub use store::ConversationStore;
pub use types::{
    CachedMessage, CompletedSession, ContextMessage, Message, Role, Session, SessionStatus,
};
