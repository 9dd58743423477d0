use sqlx::{QueryBuilder, Sqlite};

use super::{Store, StoreResult};
use crate::core::models::{User, UserSummary};

impl Store {
    pub async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "INSERT INTO users (id, name, uname, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.uname)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        self.run(
            sqlx::query_as::<_, User>(
                "SELECT id, name, uname, email, password_hash, created_at FROM users WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.run(
            sqlx::query_as::<_, User>(
                "SELECT id, name, uname, email, password_hash, created_at FROM users WHERE email = ?",
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn summary_by_email(&self, email: &str) -> StoreResult<Option<UserSummary>> {
        self.run(
            sqlx::query_as::<_, UserSummary>("SELECT id, email, uname FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Summaries for every id in `ids` that still exists, ordered by display name.
    pub async fn summaries(&self, ids: &[String]) -> StoreResult<Vec<UserSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT id, email, uname FROM users WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(") ORDER BY uname");

        self.run(query.build_query_as::<UserSummary>().fetch_all(&self.pool))
            .await
    }

    pub async fn all_summaries(&self) -> StoreResult<Vec<UserSummary>> {
        self.run(
            sqlx::query_as::<_, UserSummary>("SELECT id, email, uname FROM users ORDER BY uname")
                .fetch_all(&self.pool),
        )
        .await
    }

    /// Returns `true` when a row was removed.
    pub async fn delete_user(&self, id: &str) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
