//! The tutoring exchange flow.
//!
//! [`TutorService`] sits between an endpoint and the core: it persists each
//! exchange through the [`ConversationStore`] and asks the [`Coordinator`] for
//! replies. Upstream trouble never fails an exchange; storage errors and
//! session state errors do.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::{ContextMessage, ConversationStore, Message, Role, Session};
use crate::error::Result;
use crate::routing::{Coordinator, ExplanationStyle, HybridResponse};

/// A freshly started session and the tutor's opening reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session: Session,
    pub opening: HybridResponse,
}

/// One student message and the reply it got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorReply {
    pub user_message: Message,
    pub assistant_message: Message,
    pub response: HybridResponse,
}

/// A completed session with its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    /// Empty when the session had no messages
    pub summary: String,
}

pub struct TutorService {
    coordinator: Coordinator,
    conversations: ConversationStore,
    context_max_messages: usize,
}

impl TutorService {
    pub fn new(
        coordinator: Coordinator,
        conversations: ConversationStore,
        context_max_messages: usize,
    ) -> Self {
        Self {
            coordinator,
            conversations,
            context_max_messages,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Create a session and record an opening exchange about `topic`.
    pub async fn start_session(&self, user_id: Uuid, topic: &str) -> Result<StartedSession> {
        let session = self.conversations.create_session(user_id, topic).await?;

        let opener = format!("I want to learn about {}", topic);
        let opening = self
            .coordinator
            .respond(&opener, &[], Some(topic), false)
            .await;

        self.conversations
            .append_message(session.id, Role::User, &opener)
            .await?;
        self.conversations
            .append_message(session.id, Role::Assistant, opening.message())
            .await?;

        let session = self.conversations.get_session(session.id)?;
        Ok(StartedSession { session, opening })
    }

    /// Record a student message, get the tutor's reply and record that too.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        content: &str,
        force_computational: bool,
    ) -> Result<TutorReply> {
        let session = self.conversations.get_session(session_id)?;
        let user_message = self
            .conversations
            .append_message(session_id, Role::User, content)
            .await?;

        let context = self.prior_context(&user_message).await?;
        let response = self
            .coordinator
            .respond(content, &context, Some(&session.topic), force_computational)
            .await;
        info!(
            session_id = %session_id,
            source = ?response.source(),
            context_len = context.len(),
            "tutor replied"
        );

        let assistant_message = self
            .conversations
            .append_message(session_id, Role::Assistant, response.message())
            .await?;

        Ok(TutorReply {
            user_message,
            assistant_message,
            response,
        })
    }

    /// Explain a concept in the context of the session's topic. Nothing is
    /// recorded in the conversation.
    pub async fn explain(
        &self,
        session_id: Uuid,
        concept: &str,
        style: ExplanationStyle,
    ) -> Result<HybridResponse> {
        let session = self.conversations.get_session(session_id)?;
        Ok(self
            .coordinator
            .explain(concept, style, Some(&session.topic))
            .await)
    }

    /// Complete a session and summarize it.
    ///
    /// A failed summary degrades to a one-line description of the session.
    pub async fn complete_session(&self, session_id: Uuid) -> Result<SessionSummary> {
        let completed = self.conversations.complete_session(session_id).await?;
        let session = completed.session;

        if completed.messages.is_empty() {
            return Ok(SessionSummary {
                session,
                summary: String::new(),
            });
        }

        let messages: Vec<ContextMessage> = completed
            .messages
            .iter()
            .map(|m| ContextMessage::new(m.role, m.content.clone()))
            .collect();
        let duration_minutes = (session.duration_seconds / 60).max(1);

        let summary = match self
            .coordinator
            .summarize(&session.topic, &messages, duration_minutes)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "summary generation failed");
                format!(
                    "Completed learning session on {} with {} messages exchanged.",
                    session.topic,
                    messages.len()
                )
            }
        };

        Ok(SessionSummary { session, summary })
    }

    /// Context before `appended`, the message just recorded.
    ///
    /// A cached list that has not caught up with `appended` yet is used as is,
    /// trimmed to the context limit.
    async fn prior_context(&self, appended: &Message) -> Result<Vec<ContextMessage>> {
        let mut context = self
            .conversations
            .get_context(appended.session_id, self.context_max_messages + 1)
            .await?;

        let ends_with_appended = context
            .last()
            .is_some_and(|m| m.role == appended.role && m.content == appended.content);
        if ends_with_appended {
            context.pop();
        } else {
            debug!(
                session_id = %appended.session_id,
                position = appended.position,
                "context does not end with the new message"
            );
            let excess = context.len().saturating_sub(self.context_max_messages);
            context.drain(..excess);
        }
        Ok(context)
    }
}
