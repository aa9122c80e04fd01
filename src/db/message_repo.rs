use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::error::{AppError, AppResult};
use crate::models::{ConversationId, Message, MessageStatus, NewMessage};
use crate::services::MessageStore;

#[derive(Clone)]
pub struct PgMessageStore {
    pool: Pool,
}

impl PgMessageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let status: String = row.get("status");
    let status = MessageStatus::from_db(&status)
        .ok_or_else(|| AppError::Database(format!("unknown message status {status}")))?;

    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        sender_name: row.get("sender_name"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        status,
    })
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> AppResult<Message> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                WITH inserted AS (
                    INSERT INTO messages (conversation_id, sender_id, content, status, created_at)
                    VALUES ($1, $2, $3, $4, clock_timestamp())
                    RETURNING id, conversation_id, sender_id, content, status, created_at
                )
                SELECT i.id, i.conversation_id, i.sender_id, i.content, i.status, i.created_at,
                       u.name AS sender_name
                FROM inserted i
                LEFT JOIN users u ON u.id = i.sender_id
                "#,
                &[
                    &message.conversation_id,
                    &message.sender_id,
                    &message.content,
                    &message.status.to_db(),
                ],
            )
            .await?;

        message_from_row(&row)
    }

    async fn list(&self, conversation_id: ConversationId) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT m.id, m.conversation_id, m.sender_id, m.content, m.status, m.created_at,
                       u.name AS sender_name
                FROM messages m
                LEFT JOIN users u ON u.id = m.sender_id
                WHERE m.conversation_id = $1
                ORDER BY m.created_at ASC, m.id ASC
                "#,
                &[&conversation_id],
            )
            .await?;

        rows.iter().map(message_from_row).collect()
    }
}
