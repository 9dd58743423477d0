use chrono::{DateTime, Utc};

use super::{Store, StoreResult};

impl Store {
    /// Replaces any previous code for `email` and resets its miss count.
    pub async fn upsert_otp(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                INSERT INTO email_otps (email, code, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(email) DO UPDATE SET code = excluded.code, expires_at = excluded.expires_at, attempts = 0
                "#,
            )
            .bind(email)
            .bind(code)
            .bind(expires_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn otp_for(&self, email: &str) -> StoreResult<Option<(String, DateTime<Utc>)>> {
        self.run(
            sqlx::query_as::<_, (String, DateTime<Utc>)>(
                "SELECT code, expires_at FROM email_otps WHERE email = ?",
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await
    }

    /// Deletes the record only when the code matches, it is still live at
    /// `now` and fewer than `max_attempts` wrong guesses were made; `true`
    /// means this call consumed it.
    pub async fn consume_otp(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
        max_attempts: i64,
    ) -> StoreResult<bool> {
        let consumed = self
            .run(
                sqlx::query_scalar::<_, String>(
                    r#"
                    DELETE FROM email_otps
                    WHERE email = ? AND code = ? AND attempts < ?
                      AND julianday(expires_at) > julianday(?)
                    RETURNING email
                    "#,
                )
                .bind(email)
                .bind(code)
                .bind(max_attempts)
                .bind(now)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(consumed.is_some())
    }

    /// Count a wrong guess; `None` when there is no record.
    pub async fn record_otp_miss(&self, email: &str) -> StoreResult<Option<i64>> {
        self.run(
            sqlx::query_scalar::<_, i64>(
                "UPDATE email_otps SET attempts = attempts + 1 WHERE email = ? RETURNING attempts",
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn delete_otp(&self, email: &str) -> StoreResult<()> {
        self.run(
            sqlx::query("DELETE FROM email_otps WHERE email = ?")
                .bind(email)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
