use chrono::{DateTime, Utc};

use super::{Store, StoreResult};
use crate::core::models::Message;

impl Store {
    pub async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at, read_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&message.id)
            .bind(&message.sender_id)
            .bind(&message.receiver_id)
            .bind(&message.content)
            .bind(message.created_at)
            .bind(message.read_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// `(sender_id, receiver_id)` of every message `user_id` sent or received.
    pub async fn message_parties(&self, user_id: &str) -> StoreResult<Vec<(String, String)>> {
        self.run(
            sqlx::query_as::<_, (String, String)>(
                "SELECT sender_id, receiver_id FROM messages WHERE sender_id = ? OR receiver_id = ?",
            )
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool),
        )
        .await
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> StoreResult<Vec<Message>> {
        self.run(
            sqlx::query_as::<_, Message>(
                r#"
                SELECT id, sender_id, receiver_id, content, created_at, read_at
                FROM messages
                WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
                ORDER BY julianday(created_at) ASC, rowid ASC
                "#,
            )
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn delete_conversation(&self, a: &str, b: &str) -> StoreResult<u64> {
        let result = self
            .run(
                sqlx::query(
                    "DELETE FROM messages WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)",
                )
                .bind(a)
                .bind(b)
                .bind(b)
                .bind(a)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    /// Stamps every unread message from `sender_id` to `receiver_id` and
    /// returns the ids that actually changed.
    pub async fn mark_read(
        &self,
        sender_id: &str,
        receiver_id: &str,
        read_at: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        self.run(
            sqlx::query_scalar::<_, String>(
                r#"
                UPDATE messages SET read_at = ?
                WHERE sender_id = ? AND receiver_id = ? AND read_at IS NULL
                RETURNING id
                "#,
            )
            .bind(read_at)
            .bind(sender_id)
            .bind(receiver_id)
            .fetch_all(&self.pool),
        )
        .await
    }
}
