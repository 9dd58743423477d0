//! Notes
//!
//! Per-user note CRUD. Every note has exactly one owner and only that owner
//! may change or remove it.

pub mod handlers;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::core::error::{Error, FieldError, Result};
use crate::core::models::{Note, NoteChanges};
use crate::core::policy::{authorize, Capability};
use crate::core::store::Store;

/// Input for a new note
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub description: String,
    pub tag: Option<String>,
}

pub struct NotesManager {
    store: Store,
}

impl NotesManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Notes of `owner_id`, oldest first
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Note>> {
        Ok(self.store.notes_for_owner(owner_id).await?)
    }

    pub async fn add(&self, owner_id: &str, new: NewNote) -> Result<Note> {
        let mut fields = Vec::new();
        if new.title.trim().is_empty() {
            fields.push(FieldError::new("title", "Enter a valid title"));
        }
        if new.description.trim().is_empty() {
            fields.push(FieldError::new("description", "Description cannot be blank"));
        }
        if !fields.is_empty() {
            return Err(Error::invalid_fields(fields));
        }

        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            user_id: owner_id.to_string(),
            title: new.title,
            description: new.description,
            tag: normalize_tag(new.tag),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_note(&note).await?;

        info!("[Notes] Created {} for {}", note.id, owner_id);
        Ok(note)
    }

    /// Merge the provided fields into the note; unset fields stay as stored.
    pub async fn update(&self, owner_id: &str, note_id: &str, changes: NoteChanges) -> Result<Note> {
        let mut fields = Vec::new();
        if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            fields.push(FieldError::new("title", "Title cannot be blank"));
        }
        if changes
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            fields.push(FieldError::new("description", "Description cannot be blank"));
        }
        if !fields.is_empty() {
            return Err(Error::invalid_fields(fields));
        }

        let mut note = self.find(note_id).await?;
        authorize(owner_id, &note, Capability::Write)?;

        if let Some(title) = changes.title {
            note.title = title;
        }
        if let Some(description) = changes.description {
            note.description = description;
        }
        if changes.tag.is_some() {
            note.tag = normalize_tag(changes.tag);
        }
        note.updated_at = Utc::now();

        let updated = self
            .store
            .update_note(&note)
            .await?
            .ok_or(Error::NotFound("Note not found"))?;

        info!("[Notes] Updated {}", note_id);
        Ok(updated)
    }

    pub async fn delete(&self, owner_id: &str, note_id: &str) -> Result<Note> {
        let note = self.find(note_id).await?;
        authorize(owner_id, &note, Capability::Delete)?;

        let deleted = self
            .store
            .delete_note(note_id)
            .await?
            .ok_or(Error::NotFound("Note not found"))?;

        info!("[Notes] Deleted {}", note_id);
        Ok(deleted)
    }

    /// Remove every note of `owner_id`; returns how many rows went away.
    pub async fn clear(&self, owner_id: &str) -> Result<u64> {
        let count = self.store.delete_notes_for_owner(owner_id).await?;
        info!("[Notes] Cleared {} notes for {}", count, owner_id);
        Ok(count)
    }

    async fn find(&self, note_id: &str) -> Result<Note> {
        self.store
            .note_by_id(note_id)
            .await?
            .ok_or(Error::NotFound("Note not found"))
    }
}

/// Blank tags are stored as absent
fn normalize_tag(tag: Option<String>) -> Option<String> {
    tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
