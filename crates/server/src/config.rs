//! Server configuration
//!
//! Everything is read from the environment (a `.env` file is loaded first
//! when present):
//!
//! ```bash
//! PORT=5001
//! DATABASE_URL=sqlite://notechat.sqlite
//! JWT_SECRET=...                 # required unless JWKS_URL is set
//! JWKS_URL=https://idp/.well-known/jwks.json
//! EMAIL_HOST=smtp.example.com
//! EMAIL_PORT=587
//! EMAIL_USER=noreply@example.com
//! EMAIL_PASS=...
//! ALLOWED_ORIGINS=http://localhost:3000,https://notechat.vercel.app
//! ```

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::chat::ChatManager;
use crate::core::auth::jwks::JwksVerifier;
use crate::core::auth::otp::{OtpStore, SqlOtpStore};
use crate::core::auth::tokens::{LocalTokens, TokenVerifier};
use crate::core::auth::AuthManager;
use crate::core::mail::Mailer;
use crate::core::store::Store;
use crate::notes::NotesManager;
use crate::realtime::ChannelHub;

/// Variables whose presence the health endpoint reports.
pub const REPORTED_VARS: [&str; 6] = [
    "DATABASE_URL",
    "JWT_SECRET",
    "JWKS_URL",
    "EMAIL_HOST",
    "EMAIL_USER",
    "EMAIL_PASS",
];

/// How bearer credentials are issued and checked
#[derive(Clone, Debug)]
pub enum TokenMode {
    /// HS256 tokens signed and verified with a shared secret
    Local { secret: String, ttl: Duration },
    /// Tokens issued by an external identity provider
    External {
        jwks_url: String,
        issuer: Option<String>,
        audience: Option<String>,
        cache_ttl: Duration,
    },
}

/// SMTP transport settings
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub use_tls: bool,
}

/// Configuration for the NoteChat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub tokens: TokenMode,
    pub smtp: Option<SmtpConfig>,
    pub otp_ttl: Duration,
    pub bcrypt_cost: u32,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_requests: usize,
    pub max_sockets: usize,
    pub store_timeout: Duration,
    pub request_timeout: Duration,
    /// How long a socket may stay open without joining a channel
    pub socket_join_timeout: Duration,
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    ///
    /// Fails when no token secret is available in local mode; there is no
    /// built-in fallback secret.
    pub fn from_env() -> anyhow::Result<Self> {
        let tokens = match var("JWKS_URL") {
            Some(jwks_url) => TokenMode::External {
                jwks_url,
                issuer: var("JWT_ISSUER"),
                audience: var("JWT_AUDIENCE"),
                cache_ttl: Duration::from_secs(parse_or("JWKS_CACHE_TTL_SECS", 600)?),
            },
            None => {
                let Some(secret) = var("JWT_SECRET") else {
                    bail!("JWT_SECRET must be set (or JWKS_URL for provider-issued tokens)");
                };
                TokenMode::Local {
                    secret,
                    ttl: token_ttl(parse_or("TOKEN_TTL_HOURS", 720)?)?,
                }
            }
        };

        let smtp = match var("EMAIL_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("EMAIL_PORT", 587)?,
                username: var("EMAIL_USER"),
                password: var("EMAIL_PASS"),
                from: var("EMAIL_FROM"),
                use_tls: parse_or("EMAIL_TLS", true)?,
            }),
            None => None,
        };

        let allowed_origins = parse_origins(var("ALLOWED_ORIGINS"))?;

        Ok(Self {
            port: parse_or("PORT", 5001)?,
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://notechat.sqlite".to_string()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            tokens,
            smtp,
            otp_ttl: Duration::from_secs(parse_or("OTP_TTL_SECS", 600)?),
            bcrypt_cost: parse_or("BCRYPT_COST", 10)?,
            allowed_origins,
            max_concurrent_requests: parse_or("MAX_CONCURRENT_REQUESTS", 512)?,
            max_sockets: parse_or("MAX_SOCKETS", 1024)?,
            store_timeout: Duration::from_secs(parse_or("STORE_TIMEOUT_SECS", 5)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 30)?),
            socket_join_timeout: Duration::from_secs(parse_or("SOCKET_JOIN_TIMEOUT_SECS", 10)?),
        })
    }

    /// Which of the reported variables are set, never their values.
    pub fn presence() -> BTreeMap<&'static str, bool> {
        REPORTED_VARS
            .iter()
            .map(|name| (*name, var(name).is_some()))
            .collect()
    }
}

/// Non-empty environment variable
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value", name)),
        None => Ok(default),
    }
}

fn token_ttl(hours: u64) -> anyhow::Result<Duration> {
    match hours.checked_mul(3600) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("TOKEN_TTL_HOURS is too large"),
    }
}

/// Comma-separated origin list. Credentials are allowed cross-origin, so a
/// wildcard is refused rather than echoed.
fn parse_origins(raw: Option<String>) -> anyhow::Result<Vec<String>> {
    let Some(list) = raw else {
        return Ok(vec![
            "http://localhost:3000".to_string(),
            "http://localhost:3010".to_string(),
        ]);
    };

    let origins: Vec<String> = list
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.iter().any(|o| o == "*") {
        bail!("ALLOWED_ORIGINS must list explicit origins, not *");
    }
    Ok(origins)
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Store,
    pub tokens: Arc<dyn TokenVerifier>,
    pub auth: Arc<AuthManager>,
    pub notes: Arc<NotesManager>,
    pub chat: Arc<ChatManager>,
    pub hub: Arc<ChannelHub>,
}

impl AppState {
    /// Connect the store and wire every manager together.
    pub async fn build(
        config: ServerConfig,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let store = Store::connect(
            &config.database_url,
            config.database_max_connections,
            config.store_timeout,
        )
        .await
        .context("Failed to open the database")?;

        let (tokens, issuer): (Arc<dyn TokenVerifier>, Option<Arc<LocalTokens>>) =
            match &config.tokens {
                TokenMode::Local { secret, ttl } => {
                    let local = Arc::new(LocalTokens::new(secret, *ttl)?);
                    (local.clone(), Some(local))
                }
                TokenMode::External {
                    jwks_url,
                    issuer,
                    audience,
                    cache_ttl,
                } => (
                    Arc::new(JwksVerifier::new(
                        jwks_url.clone(),
                        issuer.clone(),
                        audience.clone(),
                        *cache_ttl,
                    )?),
                    None,
                ),
            };

        let otps: Arc<dyn OtpStore> = Arc::new(SqlOtpStore::new(store.clone()));

        let hub = Arc::new(ChannelHub::new(config.max_sockets));
        let auth = Arc::new(AuthManager::new(
            store.clone(),
            issuer,
            otps,
            mailer,
            config.otp_ttl,
            config.bcrypt_cost,
        )?);
        let notes = Arc::new(NotesManager::new(store.clone()));
        let chat = Arc::new(ChatManager::new(store.clone(), hub.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            auth,
            notes,
            chat,
            hub,
        })
    }
}
