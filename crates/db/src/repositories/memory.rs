//! In-memory repository implementations for orchestrator and adapter tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use majordome_core::{
    Conversation, ConversationId, Message, RefreshErrorEntry, TokenSet, UserIntegration,
    REFRESH_ERROR_TRAIL_LIMIT,
};

use crate::repositories::{ConversationRepository, RepositoryError, UserIntegrationRepository};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: Mutex<ConversationState>,
}

#[derive(Default)]
struct ConversationState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message, across conversations, in append order. Used by
    /// tests asserting the one-assistant-message-per-utterance law.
    pub fn all_messages(&self) -> Vec<Message> {
        self.state.lock().expect("conversation state lock").messages.clone()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.lock().expect("conversation state lock");
        for existing in state.conversations.iter_mut().filter(|c| c.user_id == user_id) {
            existing.active = false;
        }
        let conversation = Conversation {
            id: ConversationId::generate(),
            user_id: user_id.to_string(),
            active: true,
            created_at: now,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.lock().expect("conversation state lock");
        Ok(state.conversations.iter().find(|c| &c.id == id).cloned())
    }

    async fn find_active(&self, user_id: &str) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.lock().expect("conversation state lock");
        Ok(state.conversations.iter().find(|c| c.user_id == user_id && c.active).cloned())
    }

    async fn activate(&self, user_id: &str, id: &ConversationId) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("conversation state lock");
        if !state.conversations.iter().any(|c| &c.id == id && c.user_id == user_id) {
            return Err(RepositoryError::ConversationNotFound(id.0.clone()));
        }
        for conversation in state.conversations.iter_mut().filter(|c| c.user_id == user_id) {
            conversation.active = &conversation.id == id;
        }
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("conversation state lock");
        state.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.lock().expect("conversation state lock");
        let mut messages: Vec<Message> =
            state.messages.iter().filter(|m| &m.conversation_id == id).cloned().collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages.truncate(limit as usize);
        Ok(messages)
    }
}

#[derive(Default)]
pub struct InMemoryUserIntegrationRepository {
    records: Mutex<HashMap<(String, String), UserIntegration>>,
}

impl InMemoryUserIntegrationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<UserIntegration>) -> Self {
        let map = records
            .into_iter()
            .map(|record| ((record.user_id.clone(), record.service.clone()), record))
            .collect();
        Self { records: Mutex::new(map) }
    }
}

#[async_trait]
impl UserIntegrationRepository for InMemoryUserIntegrationRepository {
    async fn find(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<UserIntegration>, RepositoryError> {
        let records = self.records.lock().expect("records lock");
        Ok(records.get(&(user_id.to_string(), service.to_string())).cloned())
    }

    async fn list_enabled(&self) -> Result<Vec<UserIntegration>, RepositoryError> {
        let records = self.records.lock().expect("records lock");
        let mut enabled: Vec<UserIntegration> =
            records.values().filter(|record| record.enabled).cloned().collect();
        enabled.sort_by(|a, b| {
            (a.user_id.as_str(), a.service.as_str()).cmp(&(b.user_id.as_str(), b.service.as_str()))
        });
        Ok(enabled)
    }

    async fn list_enabled_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserIntegration>, RepositoryError> {
        Ok(self
            .list_enabled()
            .await?
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .collect())
    }

    async fn upsert(&self, record: &UserIntegration) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().expect("records lock");
        records.insert((record.user_id.clone(), record.service.clone()), record.clone());
        Ok(())
    }

    async fn store_tokens(
        &self,
        user_id: &str,
        service: &str,
        tokens: &TokenSet,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().expect("records lock");
        if let Some(record) = records.get_mut(&(user_id.to_string(), service.to_string())) {
            record.apply_token_set(tokens, now);
        }
        Ok(())
    }

    async fn record_refresh_failure(
        &self,
        user_id: &str,
        service: &str,
        message: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().expect("records lock");
        if let Some(record) = records.get_mut(&(user_id.to_string(), service.to_string())) {
            record.refresh_errors.insert(
                0,
                RefreshErrorEntry { at: now, message: message.to_string() },
            );
            record.refresh_errors.truncate(REFRESH_ERROR_TRAIL_LIMIT);
            if permanent {
                record.needs_reauthorize = true;
            }
            record.updated_at = now;
        }
        Ok(())
    }

    async fn set_scratch(
        &self,
        user_id: &str,
        service: &str,
        scratch: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().expect("records lock");
        if let Some(record) = records.get_mut(&(user_id.to_string(), service.to_string())) {
            record.scratch = scratch.clone();
            record.updated_at = now;
        }
        Ok(())
    }
}
