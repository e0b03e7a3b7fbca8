//! Conversation transcript rows backing the chat context window.

use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ConversationMessage, MessageRole};

use super::{Store, parse_column};

fn map_message(row: &Row) -> Result<ConversationMessage, StoreError> {
    let role: MessageRole = parse_column("conversation_messages", "role", row.get("role"))?;
    Ok(ConversationMessage {
        id: row.get("id"),
        user_id: row.get("user_id"),
        role,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

impl Store {
    pub async fn append_message(
        &self,
        user_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO conversation_messages (id, user_id, role, content)
             VALUES ($1, $2, $3, $4)",
            &[&Uuid::new_v4(), &user_id, &role.as_str(), &content],
        )
        .await?;
        Ok(())
    }

    /// The most recent `limit` messages in chronological order.
    pub async fn recent_messages(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, user_id, role, content, created_at
                 FROM conversation_messages
                 WHERE user_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2",
                &[&user_id, &limit],
            )
            .await?;
        let mut messages = rows
            .iter()
            .map(map_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
