//! Core Service Layer
//!
//! Shared infrastructure for the NoteChat server: accounts and tokens,
//! errors, models, the access policy, mail and storage.

pub mod auth;
pub mod ctx;
pub mod error;
pub mod json;
pub mod mail;
pub mod models;
pub mod policy;
pub mod router;
pub mod store;

// Re-exports for convenience
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use router::router;
