//! Chat handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::core::json::ValidJson;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendMessageRequest {
    pub receiver_email: String,
    pub content: String,
}

pub async fn list_contacts(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Value>> {
    info!("GET /api/chat/chats - {}", ctx.user_id());

    let contacts = state.chat.list_contacts(ctx.user_id()).await?;
    Ok(Json(json!({ "contacts": contacts })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(email): Path<String>,
) -> Result<Json<Value>> {
    info!("GET /api/chat/messages/{}", email);

    let messages = state.chat.list_messages(ctx.user_id(), &email).await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    ValidJson(req): ValidJson<SendMessageRequest>,
) -> Result<Json<Value>> {
    info!("POST /api/chat/messages - to {}", req.receiver_email);

    let message = state
        .chat
        .send_message(ctx.user_id(), &req.receiver_email, &req.content)
        .await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(email): Path<String>,
) -> Result<Json<Value>> {
    info!("DELETE /api/chat/messages/{}", email);

    let deleted = state.chat.delete_conversation(ctx.user_id(), &email).await?;
    Ok(Json(json!({ "success": true, "deletedCount": deleted })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(email): Path<String>,
) -> Result<Json<Value>> {
    info!("PATCH /api/chat/messages/read/{}", email);

    let updated = state.chat.mark_read(ctx.user_id(), &email).await?;
    Ok(Json(json!({ "success": true, "updatedCount": updated })))
}
