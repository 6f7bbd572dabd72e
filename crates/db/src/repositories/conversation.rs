use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use majordome_core::{Conversation, ConversationId, Message, MessageId, MessageRole};

use crate::repositories::{ConversationRepository, RepositoryError};
use crate::DbPool;

#[derive(Clone)]
pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{raw}`: {error}")))
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role,
        content: row.try_get("content")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn create(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let conversation = Conversation {
            id: ConversationId::generate(),
            user_id: user_id.to_string(),
            active: true,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE conversations SET active = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversations (id, user_id, active, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(&conversation.id.0)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(conversation)
    }

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, active, created_at FROM conversations WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn find_active(&self, user_id: &str) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, active, created_at FROM conversations\n             WHERE user_id = ? AND active = 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn activate(&self, user_id: &str, id: &ConversationId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE conversations SET active = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query(
            "UPDATE conversations SET active = 1 WHERE id = ? AND user_id = ?",
        )
        .bind(&id.0)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::ConversationNotFound(id.0.clone()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)\n             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages\n             WHERE conversation_id = ?\n             ORDER BY created_at ASC, id ASC\n             LIMIT ?",
        )
        .bind(&id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use majordome_core::{Message, MessageRole};

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlConversationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query("INSERT INTO users (id, display_name, created_at) VALUES ('u-1', 'Jean', ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .expect("seed user");
        SqlConversationRepository::new(pool)
    }

    #[tokio::test]
    async fn creating_a_conversation_deactivates_previous_ones() {
        let repo = repository().await;
        let now = Utc::now();

        let first = repo.create("u-1", now).await.expect("first conversation");
        let second = repo.create("u-1", now).await.expect("second conversation");

        let active = repo.find_active("u-1").await.expect("query").expect("active exists");
        assert_eq!(active.id, second.id);

        let first_reloaded = repo.find(&first.id).await.expect("query").expect("exists");
        assert!(!first_reloaded.active);
    }

    #[tokio::test]
    async fn activate_switches_the_active_conversation() {
        let repo = repository().await;
        let now = Utc::now();
        let first = repo.create("u-1", now).await.expect("first");
        let _second = repo.create("u-1", now).await.expect("second");

        repo.activate("u-1", &first.id).await.expect("activate");
        let active = repo.find_active("u-1").await.expect("query").expect("active");
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn activating_an_unknown_conversation_fails() {
        let repo = repository().await;
        let result = repo
            .activate("u-1", &majordome_core::ConversationId("missing".to_string()))
            .await;
        assert!(matches!(result, Err(RepositoryError::ConversationNotFound(_))));
    }

    #[tokio::test]
    async fn messages_are_returned_in_timestamp_order() {
        let repo = repository().await;
        let now = Utc::now();
        let conversation = repo.create("u-1", now).await.expect("conversation");

        let user_message = Message::new(
            conversation.id.clone(),
            MessageRole::User,
            "Bonjour",
            now,
        );
        let assistant_message = Message::new(
            conversation.id.clone(),
            MessageRole::Assistant,
            "Bonjour ! Comment puis-je vous aider ?",
            now + Duration::seconds(1),
        );

        repo.append_message(&user_message).await.expect("append user");
        repo.append_message(&assistant_message).await.expect("append assistant");

        let messages = repo.list_messages(&conversation.id, 10).await.expect("list");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(messages[0].created_at <= messages[1].created_at);
    }
}
