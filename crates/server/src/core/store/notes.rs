use super::{Store, StoreResult};
use crate::core::models::Note;

const NOTE_COLUMNS: &str = "id, user_id, title, description, tag, created_at, updated_at";

impl Store {
    pub async fn insert_note(&self, note: &Note) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "INSERT INTO notes (id, user_id, title, description, tag, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&note.id)
            .bind(&note.user_id)
            .bind(&note.title)
            .bind(&note.description)
            .bind(&note.tag)
            .bind(note.created_at)
            .bind(note.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn notes_for_owner(&self, user_id: &str) -> StoreResult<Vec<Note>> {
        let sql = format!(
            "SELECT {} FROM notes WHERE user_id = ? ORDER BY julianday(created_at) ASC, rowid ASC",
            NOTE_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, Note>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn note_by_id(&self, id: &str) -> StoreResult<Option<Note>> {
        let sql = format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS);
        self.run(
            sqlx::query_as::<_, Note>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Writes the mutable columns of `note` back to its row.
    pub async fn update_note(&self, note: &Note) -> StoreResult<Option<Note>> {
        let sql = format!(
            "UPDATE notes SET title = ?, description = ?, tag = ?, updated_at = ? WHERE id = ? RETURNING {}",
            NOTE_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, Note>(&sql)
                .bind(&note.title)
                .bind(&note.description)
                .bind(&note.tag)
                .bind(note.updated_at)
                .bind(&note.id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn delete_note(&self, id: &str) -> StoreResult<Option<Note>> {
        let sql = format!("DELETE FROM notes WHERE id = ? RETURNING {}", NOTE_COLUMNS);
        self.run(
            sqlx::query_as::<_, Note>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Deletes every note of `user_id`, returning the affected-row count.
    pub async fn delete_notes_for_owner(&self, user_id: &str) -> StoreResult<u64> {
        let result = self
            .run(
                sqlx::query("DELETE FROM notes WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}
