//! HTTP Router
//!
//! Mounts the auth, notes and chat APIs plus the health and socket
//! endpoints, and wraps everything in the shared middleware stack.

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

use crate::chat::handlers as chat_handlers;
use crate::config::{AppState, ServerConfig};
use crate::core::auth::handlers as auth_handlers;
use crate::core::auth::middleware::{mw_require_auth, AUTH_TOKEN_HEADER};
use crate::notes::handlers as notes_handlers;
use crate::realtime::socket::ws_handler;

pub fn router(state: AppState) -> Router {
    let require_auth = middleware::from_fn_with_state(state.clone(), mw_require_auth);

    let auth_public = Router::new()
        .route("/createuser", post(auth_handlers::create_user))
        .route("/login", post(auth_handlers::login))
        .route("/send-email-otp", post(auth_handlers::send_email_otp))
        .route("/verify-email-otp", post(auth_handlers::verify_email_otp));

    let auth_private = Router::new()
        .route("/getuser", post(auth_handlers::get_user))
        .route("/deleteuser/{id}", delete(auth_handlers::delete_user))
        .route("/getallusers", get(auth_handlers::list_users))
        .route_layer(require_auth.clone());

    let notes = Router::new()
        .route("/fetchallnotes", get(notes_handlers::fetch_all_notes))
        .route("/addnote", post(notes_handlers::add_note))
        .route("/updatenote/{id}", put(notes_handlers::update_note))
        .route("/deletenote/{id}", delete(notes_handlers::delete_note))
        .route("/clearallnotes", delete(notes_handlers::clear_all_notes))
        .route_layer(require_auth.clone());

    let chat = Router::new()
        .route("/chats", get(chat_handlers::list_contacts))
        .route("/messages", post(chat_handlers::send_message))
        .route(
            "/messages/{email}",
            get(chat_handlers::list_messages).delete(chat_handlers::delete_conversation),
        )
        .route("/messages/read/{email}", patch(chat_handlers::mark_read))
        .route_layer(require_auth);

    let config = state.config.clone();

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/socket", get(ws_handler))
        .nest("/api/auth", auth_public.merge(auth_private))
        .nest("/api/notes", notes)
        .nest("/api/chat", chat)
        .with_state(state)
        .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(cors(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "NoteChat server is running",
        "timestamp": Utc::now().to_rfc3339(),
        "config": ServerConfig::presence(),
    }))
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(AUTH_TOKEN_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}
