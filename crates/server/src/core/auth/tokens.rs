//! Bearer token issue and verification.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

/// Resolves a bearer credential to the user id it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String>;
}

/// HS256 tokens signed with a process-wide secret
pub struct LocalTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

/// Longest lifetime a local token may be issued with
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 86_400);

impl LocalTokens {
    pub fn new(secret: &str, ttl: Duration) -> anyhow::Result<Self> {
        if secret.trim().is_empty() {
            anyhow::bail!("token secret must not be empty");
        }
        if ttl > MAX_TTL {
            anyhow::bail!("token lifetime of {:?} exceeds {:?}", ttl, MAX_TTL);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: i64::try_from(ttl.as_secs())?,
        })
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_owned(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Token error: {}", e)))
    }
}

#[async_trait]
impl TokenVerifier for LocalTokens {
    async fn verify(&self, token: &str) -> Result<String> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims.sub)
            .map_err(|e| {
                debug!("[Auth] Token rejected: {}", e);
                Error::Unauthorized("Invalid token")
            })
    }
}
