use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use majordome_core::{Conversation, ConversationId, Message, TokenSet, UserIntegration};

pub mod conversation;
pub mod memory;
pub mod user_integration;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryUserIntegrationRepository};
pub use user_integration::SqlUserIntegrationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
}

/// Durable conversation log. Messages are append-only; activation of one
/// conversation deactivates the user's others in the same transaction.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, user_id: &str, now: DateTime<Utc>)
        -> Result<Conversation, RepositoryError>;
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn find_active(&self, user_id: &str) -> Result<Option<Conversation>, RepositoryError>;
    async fn activate(&self, user_id: &str, id: &ConversationId) -> Result<(), RepositoryError>;
    async fn append_message(&self, message: &Message) -> Result<(), RepositoryError>;
    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
}

/// Per-user credential and config records. Token writes are transactional:
/// a successful refresh rotates the trio and clears the error trail, a
/// failure appends one bounded trail entry and keeps the old token.
#[async_trait]
pub trait UserIntegrationRepository: Send + Sync {
    async fn find(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<UserIntegration>, RepositoryError>;
    async fn list_enabled(&self) -> Result<Vec<UserIntegration>, RepositoryError>;
    async fn list_enabled_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserIntegration>, RepositoryError>;
    async fn upsert(&self, record: &UserIntegration) -> Result<(), RepositoryError>;
    async fn store_tokens(
        &self,
        user_id: &str,
        service: &str,
        tokens: &TokenSet,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn record_refresh_failure(
        &self,
        user_id: &str,
        service: &str,
        message: &str,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn set_scratch(
        &self,
        user_id: &str,
        service: &str,
        scratch: &serde_json::Map<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
