//! Notes handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::NewNote;
use crate::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::core::json::ValidJson;
use crate::core::models::{Note, NoteChanges};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddNoteRequest {
    pub title: String,
    pub description: String,
    pub tag: Option<String>,
}

pub async fn fetch_all_notes(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<Note>>> {
    info!("GET /api/notes/fetchallnotes - {}", ctx.user_id());
    Ok(Json(state.notes.list(ctx.user_id()).await?))
}

pub async fn add_note(
    State(state): State<AppState>,
    ctx: Ctx,
    ValidJson(req): ValidJson<AddNoteRequest>,
) -> Result<Json<Note>> {
    info!("POST /api/notes/addnote - {}", ctx.user_id());

    let note = state
        .notes
        .add(
            ctx.user_id(),
            NewNote {
                title: req.title,
                description: req.description,
                tag: req.tag,
            },
        )
        .await?;
    Ok(Json(note))
}

pub async fn update_note(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
    ValidJson(changes): ValidJson<NoteChanges>,
) -> Result<Json<Note>> {
    info!("PUT /api/notes/updatenote/{}", id);
    Ok(Json(state.notes.update(ctx.user_id(), &id, changes).await?))
}

pub async fn delete_note(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    info!("DELETE /api/notes/deletenote/{}", id);

    let note = state.notes.delete(ctx.user_id(), &id).await?;
    Ok(Json(json!({ "success": true, "note": note })))
}

pub async fn clear_all_notes(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Value>> {
    info!("DELETE /api/notes/clearallnotes - {}", ctx.user_id());

    let deleted = state.notes.clear(ctx.user_id()).await?;
    Ok(Json(json!({ "success": true, "deletedCount": deleted })))
}
