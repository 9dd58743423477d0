//! Verification of provider-issued tokens against a remote JWK set.
//!
//! Keys are cached by `kid` for the configured TTL. An unknown `kid`
//! triggers at most one refetch per `MIN_REFRESH_INTERVAL`, counted from the
//! last attempt whether or not it succeeded. Only one refetch runs at a time
//! and a failed one leaves the cached keys in place.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, DecodingKey, Validation};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::tokens::{Claims, TokenVerifier};
use crate::core::error::{Error, Result};

const MAX_CACHED_KEYS: usize = 64;
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    /// Last successful fetch
    fetched_at: Option<Instant>,
    /// Last fetch attempt, successful or not
    attempted_at: Option<Instant>,
}

impl KeyCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    fn may_refresh(&self) -> bool {
        self.attempted_at
            .map_or(true, |at| at.elapsed() >= MIN_REFRESH_INTERVAL)
    }

    fn replace(&mut self, set: &JwkSet) {
        let now = Instant::now();
        self.keys = decoding_keys(set);
        self.fetched_at = Some(now);
        self.attempted_at = Some(now);
    }
}

/// Keys of `set` that carry a `kid`, capped at `MAX_CACHED_KEYS`.
fn decoding_keys(set: &JwkSet) -> HashMap<String, DecodingKey> {
    set.keys
        .iter()
        .filter_map(|jwk| {
            let kid = jwk.common.key_id.clone()?;
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some((kid, key)),
                Err(e) => {
                    warn!("[Auth] Skipping unusable JWK {}: {}", kid, e);
                    None
                }
            }
        })
        .take(MAX_CACHED_KEYS)
        .collect()
}

pub struct JwksVerifier {
    url: String,
    issuer: Option<String>,
    audience: Option<String>,
    ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<KeyCache>,
    refresh: Mutex<()>,
}

impl JwksVerifier {
    pub fn new(
        url: String,
        issuer: Option<String>,
        audience: Option<String>,
        ttl: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            url,
            issuer,
            audience,
            ttl,
            client,
            cache: RwLock::new(KeyCache {
                keys: HashMap::new(),
                fetched_at: None,
                attempted_at: None,
            }),
            refresh: Mutex::new(()),
        })
    }

    /// Seed the cache directly, as if `set` had just been fetched.
    pub fn with_keys(self, set: &JwkSet) -> Self {
        self.cache.write().replace(set);
        self
    }

    async fn fetch(&self) -> Result<JwkSet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::ServiceUnavailable(format!("JWK fetch failed: {}", e)))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("JWK set malformed: {}", e)))
    }

    fn cached_key(&self, kid: &str, require_fresh: bool) -> Option<DecodingKey> {
        let cache = self.cache.read();
        if require_fresh && !cache.is_fresh(self.ttl) {
            return None;
        }
        cache.keys.get(kid).cloned()
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.cached_key(kid, true) {
            return Ok(key);
        }

        // Single flight; whoever waited here re-checks what the winner fetched.
        let _refresh = self.refresh.lock().await;

        {
            let mut cache = self.cache.write();
            if cache.is_fresh(self.ttl) {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
            if !cache.may_refresh() {
                return cache
                    .keys
                    .get(kid)
                    .cloned()
                    .ok_or(Error::Unauthorized("Invalid token"));
            }
            cache.attempted_at = Some(Instant::now());
        }

        match self.fetch().await {
            Ok(set) => {
                let mut cache = self.cache.write();
                cache.replace(&set);
                info!("[Auth] Refreshed JWK set ({} keys)", cache.keys.len());

                cache
                    .keys
                    .get(kid)
                    .cloned()
                    .ok_or(Error::Unauthorized("Invalid token"))
            }
            Err(e) => {
                warn!("[Auth] JWK refresh failed, keeping cached keys: {}", e);
                self.cached_key(kid, false).ok_or(e)
            }
        }
    }

    fn validation(&self, header: &jsonwebtoken::Header) -> Validation {
        let mut validation = Validation::new(header.alg);
        let mut required = vec!["exp", "sub"];
        match &self.audience {
            Some(aud) => {
                validation.set_audience(&[aud]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
            required.push("iss");
        }
        // A configured check must not be skipped by leaving the claim out.
        validation.set_required_spec_claims(&required);
        validation
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        let header = decode_header(token).map_err(|_| Error::Unauthorized("Invalid token"))?;
        let kid = header
            .kid
            .clone()
            .ok_or(Error::Unauthorized("Invalid token"))?;

        let key = self.key_for(&kid).await?;

        decode::<Claims>(token, &key, &self.validation(&header))
            .map(|data| data.claims.sub)
            .map_err(|e| {
                debug!("[Auth] Provider token rejected: {}", e);
                Error::Unauthorized("Invalid token")
            })
    }
}
