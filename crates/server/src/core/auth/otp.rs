//! One-time email codes.
//!
//! Records live in the shared store so every server instance sees the same
//! codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::core::store::{Store, StoreResult};

/// Wrong guesses allowed before a code is thrown away
pub const MAX_OTP_ATTEMPTS: i64 = 5;

/// Why a verification attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Verified,
    Missing,
    Expired,
    Mismatch,
    TooManyAttempts,
}

impl OtpCheck {
    pub fn message(self) -> &'static str {
        match self {
            OtpCheck::Verified => "OTP verified",
            OtpCheck::Missing => "No OTP sent to this email",
            OtpCheck::Expired => "OTP expired",
            OtpCheck::Mismatch => "Invalid OTP",
            OtpCheck::TooManyAttempts => "Too many attempts; request a new OTP",
        }
    }
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store `code` for `email`, replacing any earlier one.
    async fn put(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Check `code` and consume the record on success.
    async fn check(&self, email: &str, code: &str, now: DateTime<Utc>) -> StoreResult<OtpCheck>;
}

pub struct SqlOtpStore {
    store: Store,
}

impl SqlOtpStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OtpStore for SqlOtpStore {
    async fn put(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.store.upsert_otp(email, code, expires_at).await
    }

    async fn check(&self, email: &str, code: &str, now: DateTime<Utc>) -> StoreResult<OtpCheck> {
        // Only the conditional delete consumes; racing verifies see one winner.
        if self.store.consume_otp(email, code, now, MAX_OTP_ATTEMPTS).await? {
            return Ok(OtpCheck::Verified);
        }

        match self.store.otp_for(email).await? {
            None => Ok(OtpCheck::Missing),
            Some((_, expires_at)) if expires_at <= now => {
                self.store.delete_otp(email).await?;
                Ok(OtpCheck::Expired)
            }
            Some(_) => match self.store.record_otp_miss(email).await? {
                None => Ok(OtpCheck::Missing),
                Some(misses) if misses >= MAX_OTP_ATTEMPTS => {
                    self.store.delete_otp(email).await?;
                    Ok(OtpCheck::TooManyAttempts)
                }
                Some(_) => Ok(OtpCheck::Mismatch),
            },
        }
    }
}

/// Six random digits, leading zeros allowed.
pub fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", code)
}
