//! Authentication Module
//!
//! Handles registration, login, account lookup and deletion, and email
//! one-time codes. User rows live in the shared store; credentials are
//! bcrypt hashes and requests carry JWT bearer tokens.

pub mod handlers;
pub mod jwks;
pub mod middleware;
pub mod otp;
pub mod tokens;

use std::sync::Arc;
use std::time::Duration;

use bcrypt::{hash, verify};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::error::{Error, FieldError, Result};
use crate::core::mail::Mailer;
use crate::core::models::{User, UserSummary};
use crate::core::policy::{authorize, Capability};
use crate::core::store::Store;
use otp::{generate_code, OtpCheck, OtpStore};
use tokens::LocalTokens;

const MIN_PASSWORD_LEN: usize = 5;

/// Stored for provider-managed accounts; bcrypt never accepts it.
const NO_PASSWORD: &str = "!";

/// Input for a new account
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub uname: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    fn validate(&self, require_password: bool) -> Result<()> {
        let mut fields = Vec::new();
        if self.name.trim().is_empty() {
            fields.push(FieldError::new("name", "Name is required"));
        }
        if self.uname.trim().is_empty() {
            fields.push(FieldError::new("uname", "Username is required"));
        }
        if !is_valid_email(&self.email) {
            fields.push(FieldError::new("email", "Enter a valid email"));
        }
        if require_password && self.password.chars().count() < MIN_PASSWORD_LEN {
            fields.push(FieldError::new(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_fields(fields))
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    email.parse::<lettre::Address>().is_ok()
}

/// Auth manager handles all authentication
pub struct AuthManager {
    store: Store,
    /// `None` when tokens come from an external identity provider
    issuer: Option<Arc<LocalTokens>>,
    otps: Arc<dyn OtpStore>,
    mailer: Arc<dyn Mailer>,
    otp_ttl: Duration,
    hash_cost: u32,
    /// Compared against when the email is unknown so both failure paths cost a bcrypt check.
    dummy_hash: String,
}

impl AuthManager {
    pub fn new(
        store: Store,
        issuer: Option<Arc<LocalTokens>>,
        otps: Arc<dyn OtpStore>,
        mailer: Arc<dyn Mailer>,
        otp_ttl: Duration,
        hash_cost: u32,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hash(Uuid::new_v4().to_string(), hash_cost)?;
        info!("[Auth] Initialized (local tokens: {})", issuer.is_some());

        Ok(Self {
            store,
            issuer,
            otps,
            mailer,
            otp_ttl,
            hash_cost,
            dummy_hash,
        })
    }

    fn issuer(&self) -> Result<&LocalTokens> {
        self.issuer.as_deref().ok_or(Error::Disabled(
            "Local sign-in is disabled; sign in with the identity provider",
        ))
    }

    /// Whether this server signs its own tokens
    pub fn issues_tokens(&self) -> bool {
        self.issuer.is_some()
    }

    /// Register a new user and return a token for them
    pub async fn register(&self, registration: Registration) -> Result<(User, String)> {
        registration.validate(true)?;
        let issuer = self.issuer()?;

        if self.store.user_by_email(&registration.email).await?.is_some() {
            return Err(Error::validation("Email already exists"));
        }

        let password = registration.password;
        let cost = self.hash_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: registration.name.trim().to_string(),
            uname: registration.uname.trim().to_string(),
            email: registration.email,
            password_hash,
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;

        let token = issuer.issue(&user.id)?;
        info!("[Auth] User registered: {} ({})", user.uname, user.email);
        Ok((user, token))
    }

    /// Create the account row for an identity-provider subject.
    ///
    /// The row id is the token's `sub`, so every later lookup by the verified
    /// id finds it. No password is stored.
    pub async fn provision(&self, subject: &str, profile: Registration) -> Result<User> {
        profile.validate(false)?;

        if self.store.user_by_id(subject).await?.is_some() {
            return Err(Error::validation("Account already exists"));
        }
        if self.store.user_by_email(&profile.email).await?.is_some() {
            return Err(Error::validation("Email already exists"));
        }

        let user = User {
            id: subject.to_string(),
            name: profile.name.trim().to_string(),
            uname: profile.uname.trim().to_string(),
            email: profile.email,
            password_hash: NO_PASSWORD.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;

        info!("[Auth] Provider account provisioned: {} ({})", user.uname, user.email);
        Ok(user)
    }

    /// Check credentials; unknown email and wrong password fail identically
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let issuer = self.issuer()?;
        let user = self.store.user_by_email(email).await?;

        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify(password, &stored_hash))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .unwrap_or(false);

        match user {
            Some(user) if matches => {
                let token = issuer.issue(&user.id)?;
                info!("[Auth] User logged in: {}", user.uname);
                Ok((user, token))
            }
            _ => {
                warn!("[Auth] Failed login attempt");
                Err(Error::validation("Invalid credentials"))
            }
        }
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound("User not found"))
    }

    /// Delete the account `target_id`; only its owner may do so
    pub async fn delete_user(&self, actor_id: &str, target_id: &str) -> Result<User> {
        let user = self.get_user(target_id).await?;
        authorize(actor_id, &user, Capability::Delete)?;

        if !self.store.delete_user(target_id).await? {
            return Err(Error::NotFound("User not found"));
        }
        info!("[Auth] User deleted: {}", user.uname);
        Ok(user)
    }

    /// User directory for starting a new conversation
    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        Ok(self.store.all_summaries().await?)
    }

    /// Generate, store and mail a fresh code for `email`
    pub async fn send_otp(&self, email: &str) -> Result<()> {
        if !is_valid_email(email) {
            return Err(Error::validation("A valid email is required"));
        }

        let code = generate_code();
        let ttl = chrono::Duration::from_std(self.otp_ttl)
            .map_err(|e| Error::Internal(e.to_string()))?;
        self.otps.put(email, &code, Utc::now() + ttl).await?;

        self.mailer
            .send_otp(email, &code, ttl.num_minutes())
            .await
            .map_err(|e| {
                error!("[Auth] Error sending OTP email: {}", e);
                Error::Internal("Failed to send OTP".into())
            })?;

        info!("[Auth] OTP sent to {}", email);
        Ok(())
    }

    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<()> {
        if email.trim().is_empty() || code.trim().is_empty() {
            return Err(Error::validation("Email and OTP required"));
        }

        match self.otps.check(email, code.trim(), Utc::now()).await? {
            OtpCheck::Verified => {
                info!("[Auth] OTP verified for {}", email);
                Ok(())
            }
            failed => Err(Error::validation(failed.message())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::tokens::TokenVerifier;
    use super::*;
    use crate::core::mail::DisabledMailer;
    use crate::core::store::test_support::temp_store;

    #[tokio::test]
    async fn second_registration_with_same_email_fails() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));

        auth.register(registration("alice", "alice@test.com")).await.unwrap();
        let err = auth
            .register(registration("alice2", "alice@test.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref message, .. } if message == "Email already exists"));
    }

    #[tokio::test]
    async fn duplicate_username_is_a_validation_error() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));

        auth.register(registration("alice", "a1@test.com")).await.unwrap();
        let err = auth.register(registration("alice", "a2@test.com")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn registration_fields_are_validated_before_store_access() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));

        let err = auth
            .register(Registration {
                name: "".into(),
                uname: "x".into(),
                email: "not-an-email".into(),
                password: "123".into(),
            })
            .await
            .unwrap_err();
        match err {
            Error::Validation { fields, .. } => {
                let names: Vec<_> = fields.iter().map(|f| f.field).collect();
                assert_eq!(names, vec!["name", "email", "password"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn login_token_resolves_to_authenticated_user() {
        let (_dir, store) = temp_store().await;
        let tokens = Arc::new(LocalTokens::new("test-secret", Duration::from_secs(3600)).unwrap());
        let auth = manager(store, Arc::new(DisabledMailer));

        let (registered, _) = auth.register(registration("bob", "bob@test.com")).await.unwrap();
        let (user, token) = auth.login("bob@test.com", "hunter22").await.unwrap();

        assert_eq!(user.id, registered.id);
        assert_eq!(tokens.verify(&token).await.unwrap(), registered.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_fail_the_same_way() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));
        auth.register(registration("bob", "bob@test.com")).await.unwrap();

        let wrong_password = auth.login("bob@test.com", "nope!").await.unwrap_err();
        let unknown_email = auth.login("ghost@test.com", "hunter22").await.unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.status(), unknown_email.status());
    }

    #[tokio::test]
    async fn only_owner_deletes_account() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));
        let (alice, _) = auth.register(registration("alice", "a@test.com")).await.unwrap();
        let (bob, _) = auth.register(registration("bob", "b@test.com")).await.unwrap();

        assert!(matches!(
            auth.delete_user(&bob.id, &alice.id).await,
            Err(Error::Forbidden(_))
        ));
        auth.delete_user(&alice.id, &alice.id).await.unwrap();
        assert!(matches!(auth.get_user(&alice.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn otp_round_trip_through_mailer() {
        let (_dir, store) = temp_store().await;
        let mailer = Arc::new(RecordingMailer::default());
        let auth = manager(store, mailer.clone());

        auth.send_otp("c@test.com").await.unwrap();
        let (to, code) = mailer.sent.lock()[0].clone();
        assert_eq!(to, "c@test.com");

        auth.verify_otp("c@test.com", &code).await.unwrap();
        let reuse = auth.verify_otp("c@test.com", &code).await.unwrap_err();
        assert_eq!(reuse.to_string(), "No OTP sent to this email");
    }

    #[tokio::test]
    async fn otp_send_failure_is_reported() {
        let (_dir, store) = temp_store().await;
        let auth = manager(store, Arc::new(DisabledMailer));
        assert!(matches!(
            auth.send_otp("c@test.com").await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn provider_mode_refuses_local_sign_in() {
        let (_dir, store) = temp_store().await;
        let auth = AuthManager::new(
            store.clone(),
            None,
            Arc::new(otp::SqlOtpStore::new(store)),
            Arc::new(DisabledMailer),
            Duration::from_secs(600),
            4,
        )
        .unwrap();

        assert!(matches!(
            auth.register(registration("x", "x@test.com")).await,
            Err(Error::Disabled(_))
        ));
        assert!(matches!(
            auth.login("x@test.com", "hunter22").await,
            Err(Error::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn provider_subject_becomes_the_user_id() {
        let (_dir, store) = temp_store().await;
        let auth = AuthManager::new(
            store.clone(),
            None,
            Arc::new(otp::SqlOtpStore::new(store)),
            Arc::new(DisabledMailer),
            Duration::from_secs(600),
            4,
        )
        .unwrap();
        assert!(!auth.issues_tokens());

        let mut profile = registration("pat", "pat@test.com");
        profile.password.clear();
        let user = auth.provision("idp|123", profile.clone()).await.unwrap();
        assert_eq!(user.id, "idp|123");
        assert_eq!(auth.get_user("idp|123").await.unwrap().email, "pat@test.com");

        let again = auth.provision("idp|123", profile).await.unwrap_err();
        assert_eq!(again.to_string(), "Account already exists");
        let taken = auth
            .provision("idp|456", registration("pat2", "pat@test.com"))
            .await
            .unwrap_err();
        assert_eq!(taken.to_string(), "Email already exists");
    }
}
