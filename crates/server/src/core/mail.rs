//! Outbound mail for one-time codes.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport is not configured")]
    NotConfigured,

    #[error("invalid mail configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to send mail: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to: &str, code: &str, valid_minutes: i64) -> Result<(), MailError>;
}

/// SMTP delivery through lettre's tokio transport
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    /// `send_timeout` bounds each SMTP exchange.
    pub fn new(config: &SmtpConfig, send_timeout: Duration) -> Result<Self, MailError> {
        let mut builder = if config.use_tls {
            let tls = TlsParameters::new(config.host.clone())
                .map_err(|e| MailError::InvalidConfig(format!("TLS configuration error: {}", e)))?;

            // 465 is implicit TLS, everything else negotiates STARTTLS
            if config.port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                    .map_err(|e| MailError::InvalidConfig(e.to_string()))?
                    .port(config.port)
                    .tls(Tls::Wrapper(tls))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| MailError::InvalidConfig(e.to_string()))?
                    .port(config.port)
                    .tls(Tls::Required(tls))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        builder = builder.timeout(Some(send_timeout));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = config
            .from
            .clone()
            .or_else(|| config.username.clone())
            .ok_or_else(|| MailError::InvalidConfig("no sender address (EMAIL_FROM)".into()))?;

        info!("[Mail] SMTP transport configured for {}:{}", config.host, config.port);

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_otp(&self, to: &str, code: &str, valid_minutes: i64) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| MailError::InvalidConfig(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailError::SendFailed(format!("Invalid recipient: {}", e)))?)
            .subject("Your NoteChat OTP")
            .header(ContentType::TEXT_PLAIN)
            .body(otp_body(code, valid_minutes))
            .map_err(|e| MailError::SendFailed(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

/// Used when no SMTP host is configured; every send fails.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send_otp(&self, _to: &str, _code: &str, _valid_minutes: i64) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

fn otp_body(code: &str, valid_minutes: i64) -> String {
    format!(
        "Your OTP is: {}\n\nIt expires in {} minutes. If you did not ask for it, ignore this email.",
        code, valid_minutes
    )
}
