use chrono::Utc;
use sqlx::Row;

use servyy_core::domain::conversation::{recent_window, truncate_to_newest, Turn, UserId};

use super::{decode_turns, encode_turns, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn append_turn(
        &self,
        user_id: &UserId,
        turn: Turn,
        max_stored_turns: usize,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Opening with a write takes the writer lock before the read below.
        sqlx::query(
            "INSERT INTO conversations (user_id, messages, updated_at)
             VALUES (?, '[]', ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let raw: String = sqlx::query("SELECT messages FROM conversations WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_one(&mut *tx)
            .await?
            .try_get("messages")?;

        let mut turns = decode_turns(&raw)?;
        turns.push(turn);
        truncate_to_newest(&mut turns, max_stored_turns);
        let encoded = encode_turns(&turns)?;

        sqlx::query("UPDATE conversations SET messages = ?, updated_at = ? WHERE user_id = ?")
            .bind(encoded)
            .bind(&now)
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            event_name = "db.conversation.turn_appended",
            user_id = %user_id,
            stored_turns = turns.len(),
            "conversation turn appended"
        );

        Ok(())
    }

    async fn load_recent_turns(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let row = sqlx::query("SELECT messages FROM conversations WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let raw: String = row.try_get("messages")?;
        let turns = decode_turns(&raw)?;
        Ok(recent_window(&turns, limit).to_vec())
    }
}
