//! NoteChat Server Library
//!
//! Accounts, notes and direct messages over a JSON API, with realtime
//! delivery of chat events over WebSocket.

pub mod chat;
pub mod config;
pub mod core;
pub mod notes;
pub mod realtime;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppState, ServerConfig};
use crate::core::mail::{DisabledMailer, Mailer, SmtpMailer};

pub use crate::core::router::router as app;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        // Already set, ignore
    }

    info!("=== NoteChat Server ===");

    let config = ServerConfig::from_env()?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpMailer::new(smtp, config.store_timeout * 2).context("Invalid SMTP configuration")?,
        ),
        None => {
            warn!("EMAIL_HOST not set; OTP mail is disabled");
            Arc::new(DisabledMailer)
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::build(config, mailer).await?;
    let app = app(state);

    info!("NoteChat server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
