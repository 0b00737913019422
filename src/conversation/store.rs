//! Cache-aside conversation log.
//!
//! Writes land in the durable repository first; the cached list under
//! `session:<id>:messages` mirrors a suffix of the log. Cache failures never
//! fail an operation; the next read rebuilds the list from the repository.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::repository::SessionRepository;
use super::types::{CachedMessage, CompletedSession, ContextMessage, Message, Role, Session};
use crate::cache::{CacheKey, CacheStore};
use crate::error::{Error, Result};

/// Sessions and messages, durable with a cached mirror.
#[derive(Clone)]
pub struct ConversationStore {
    repo: Arc<dyn SessionRepository>,
    cache: CacheStore,
}

impl ConversationStore {
    pub fn new(repo: Arc<dyn SessionRepository>, cache: CacheStore) -> Self {
        Self { repo, cache }
    }

    pub fn repository(&self) -> &Arc<dyn SessionRepository> {
        &self.repo
    }

    /// Start an active session with an empty cached message list.
    pub async fn create_session(&self, user_id: Uuid, topic: &str) -> Result<Session> {
        let session = Session::new(user_id, topic, Utc::now());
        self.repo.create_session(&session)?;

        self.write_list(session.id, &[]).await;
        info!(session_id = %session.id, topic, "session created");
        Ok(session)
    }

    pub fn get_session(&self, id: Uuid) -> Result<Session> {
        self.repo.get_session(id)?.ok_or(Error::SessionNotFound(id))
    }

    /// Append to the durable log, then to the cached list.
    ///
    /// The cached list is extended only when it ends right before the new
    /// message; otherwise it is dropped so the next read rebuilds it. An absent
    /// list is left absent.
    pub async fn append_message(&self, session_id: Uuid, role: Role, content: &str) -> Result<Message> {
        let message = self
            .repo
            .append_message(session_id, role, content, Utc::now())?;

        let key = CacheKey::session_messages(session_id);
        if let Some(mut cached) = self.cache.get::<Vec<CachedMessage>>(&key).await {
            let last = cached.last().map(|m| m.position).unwrap_or(0);
            if last + 1 == message.position {
                cached.push(CachedMessage::from(&message));
                self.write_list(session_id, &cached).await;
            } else {
                debug!(
                    session_id = %session_id,
                    cached_last = last,
                    position = message.position,
                    "cached list out of step, dropping"
                );
                self.cache.delete(&key).await;
            }
        }

        Ok(message)
    }

    /// Up to `max_messages` of the most recent messages, oldest first.
    ///
    /// Fails with [`Error::SessionNotFound`] for an unknown session.
    pub async fn get_context(&self, session_id: Uuid, max_messages: usize) -> Result<Vec<ContextMessage>> {
        Ok(self
            .recent(session_id, max_messages)
            .await?
            .iter()
            .map(ContextMessage::from)
            .collect())
    }

    /// Every message of the session, from the durable store.
    pub fn all_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        self.repo.all_messages(session_id)
    }

    /// Close an active session and drop its cached list.
    ///
    /// Completing a session that is not active fails with
    /// [`Error::SessionNotActive`].
    pub async fn complete_session(&self, session_id: Uuid) -> Result<CompletedSession> {
        let session = self.repo.mark_completed(session_id, Utc::now())?;
        let messages = self.repo.all_messages(session_id)?;
        self.invalidate_session(session_id).await;

        info!(
            session_id = %session_id,
            duration_seconds = session.duration_seconds,
            message_count = session.message_count,
            "session completed"
        );
        Ok(CompletedSession { session, messages })
    }

    pub async fn abandon_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self.repo.mark_abandoned(session_id)?;
        self.invalidate_session(session_id).await;
        info!(session_id = %session_id, "session abandoned");
        Ok(session)
    }

    /// Delete a session and its messages. Returns whether it existed.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let existed = self.repo.delete_session(session_id)?;
        self.invalidate_session(session_id).await;
        Ok(existed)
    }

    /// Drop the cached list for a session.
    pub async fn invalidate_session(&self, session_id: Uuid) -> bool {
        self.cache
            .delete(&CacheKey::session_messages(session_id))
            .await
    }

    async fn recent(&self, session_id: Uuid, max_messages: usize) -> Result<Vec<CachedMessage>> {
        let key = CacheKey::session_messages(session_id);
        if let Some(cached) = self.cache.get::<Vec<CachedMessage>>(&key).await {
            if !cached.is_empty() {
                let start = cached.len().saturating_sub(max_messages);
                return Ok(cached[start..].to_vec());
            }
        }

        let rows: Vec<CachedMessage> = self
            .repo
            .recent_messages(session_id, max_messages)?
            .iter()
            .map(CachedMessage::from)
            .collect();

        if rows.is_empty() {
            self.get_session(session_id)?;
        } else {
            debug!(session_id = %session_id, count = rows.len(), "rebuilt cached list");
            self.write_list(session_id, &rows).await;
        }
        Ok(rows)
    }

    async fn write_list(&self, session_id: Uuid, messages: &[CachedMessage]) {
        let ttl = self.cache.ttls().session;
        self.cache
            .set(&CacheKey::session_messages(session_id), messages, Some(ttl))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::config::CacheTtls;
    use crate::conversation::SqliteSessionRepository;
    use crate::test_support::FailingBackend;
    use pretty_assertions::assert_eq;

    fn store() -> (ConversationStore, CacheStore) {
        let repo = Arc::new(SqliteSessionRepository::in_memory().unwrap());
        let cache = CacheStore::in_memory(CacheTtls::default());
        (ConversationStore::new(repo, cache.clone()), cache)
    }

    async fn cached(cache: &CacheStore, id: Uuid) -> Option<Vec<CachedMessage>> {
        cache.get(&CacheKey::session_messages(id)).await
    }

    fn contents(messages: &[ContextMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_initializes_empty_list() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Algebra").await.unwrap();

        assert_eq!(cached(&cache, session.id).await, Some(Vec::new()));
        assert!(store.get_session(session.id).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_append_mirrors_into_cache() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Algebra").await.unwrap();

        store.append_message(session.id, Role::User, "hi").await.unwrap();
        store
            .append_message(session.id, Role::Assistant, "hello")
            .await
            .unwrap();

        let list = cached(&cache, session.id).await.unwrap();
        assert_eq!(list.iter().map(|m| m.position).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(list[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_cold_read_rebuilds_from_durable_store() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Physics").await.unwrap();
        for i in 1..=5 {
            store
                .append_message(session.id, Role::User, &format!("m{}", i))
                .await
                .unwrap();
        }
        store.invalidate_session(session.id).await;

        let context = store.get_context(session.id, 20).await.unwrap();
        assert_eq!(contents(&context), vec!["m1", "m2", "m3", "m4", "m5"]);

        let rebuilt = cached(&cache, session.id).await.unwrap();
        assert_eq!(rebuilt.len(), 5);
        assert_eq!(rebuilt[0].content, "m1");
    }

    #[tokio::test]
    async fn test_context_limit_applies_to_both_paths() {
        let (store, _cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Physics").await.unwrap();
        for i in 1..=6 {
            store
                .append_message(session.id, Role::User, &format!("m{}", i))
                .await
                .unwrap();
        }

        let warm = store.get_context(session.id, 3).await.unwrap();
        assert_eq!(contents(&warm), vec!["m4", "m5", "m6"]);

        store.invalidate_session(session.id).await;
        let cold = store.get_context(session.id, 3).await.unwrap();
        assert_eq!(contents(&cold), vec!["m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn test_append_does_not_recreate_absent_list() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Chemistry").await.unwrap();
        store.invalidate_session(session.id).await;

        store.append_message(session.id, Role::User, "hi").await.unwrap();
        assert_eq!(cached(&cache, session.id).await, None);
    }

    #[tokio::test]
    async fn test_gap_drops_cached_list() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Chemistry").await.unwrap();
        store.append_message(session.id, Role::User, "one").await.unwrap();

        // A write that missed the cache leaves it one behind
        store
            .repository()
            .append_message(session.id, Role::Assistant, "two", Utc::now())
            .unwrap();
        store.append_message(session.id, Role::User, "three").await.unwrap();
        assert_eq!(cached(&cache, session.id).await, None);

        let context = store.get_context(session.id, 20).await.unwrap();
        assert_eq!(contents(&context), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_order() {
        let (store, _cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Chemistry").await.unwrap();

        let appends = (0..10).map(|i| {
            let store = store.clone();
            async move {
                store
                    .append_message(session.id, Role::User, &format!("m{}", i))
                    .await
            }
        });
        let results = futures::future::join_all(appends).await;

        let mut positions: Vec<u32> = results.into_iter().map(|r| r.unwrap().position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (1..=10).collect::<Vec<_>>());

        assert_eq!(store.all_messages(session.id).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_cache_failures_do_not_fail_operations() {
        let repo = Arc::new(SqliteSessionRepository::in_memory().unwrap());
        let backend: Arc<dyn CacheBackend> = Arc::new(FailingBackend);
        let store = ConversationStore::new(repo, CacheStore::new(backend, CacheTtls::default()));

        let session = store.create_session(Uuid::new_v4(), "History").await.unwrap();
        store.append_message(session.id, Role::User, "hi").await.unwrap();

        let context = store.get_context(session.id, 20).await.unwrap();
        assert_eq!(contents(&context), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_complete_drops_cache_and_rejects_repeat() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Biology").await.unwrap();
        store.append_message(session.id, Role::User, "hi").await.unwrap();

        let completed = store.complete_session(session.id).await.unwrap();
        assert_eq!(completed.messages.len(), 1);
        assert!(completed.session.completed_at.is_some());
        assert_eq!(cached(&cache, session.id).await, None);

        assert!(matches!(
            store.complete_session(session.id).await,
            Err(Error::SessionNotActive { .. })
        ));
        assert!(matches!(
            store.append_message(session.id, Role::User, "late").await,
            Err(Error::SessionNotActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_and_abandon() {
        let (store, cache) = store();
        let session = store.create_session(Uuid::new_v4(), "Art").await.unwrap();
        store.append_message(session.id, Role::User, "hi").await.unwrap();

        assert!(store.delete_session(session.id).await.unwrap());
        assert_eq!(cached(&cache, session.id).await, None);
        assert!(matches!(
            store.get_session(session.id),
            Err(Error::SessionNotFound(_))
        ));

        let other = store.create_session(Uuid::new_v4(), "Music").await.unwrap();
        let abandoned = store.abandon_session(other.id).await.unwrap();
        assert!(!abandoned.is_active());
    }

    #[tokio::test]
    async fn test_context_of_unknown_session_fails() {
        let (store, cache) = store();
        assert!(matches!(
            store.get_context(Uuid::new_v4(), 20).await,
            Err(Error::SessionNotFound(_))
        ));

        let session = store.create_session(Uuid::new_v4(), "Dance").await.unwrap();
        store.append_message(session.id, Role::User, "hi").await.unwrap();
        assert!(store.delete_session(session.id).await.unwrap());
        assert!(matches!(
            store.get_context(session.id, 20).await,
            Err(Error::SessionNotFound(_))
        ));

        // A known session with no messages still reads as empty
        let empty = store.create_session(Uuid::new_v4(), "Drama").await.unwrap();
        store.invalidate_session(empty.id).await;
        assert_eq!(store.get_context(empty.id, 20).await.unwrap(), Vec::new());
        assert_eq!(cached(&cache, empty.id).await, None);
    }
}
