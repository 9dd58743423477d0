//! Direct messages
//!
//! Two-party conversations addressed by the counterpart's email. Contacts
//! are derived from message history. After a successful write the service
//! pushes an event to the participants' realtime channels; push failures are
//! logged and never fail the request.

pub mod handlers;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::models::{Message, MessageWithUsers, UserSummary};
use crate::core::store::Store;
use crate::realtime::{ChannelEvent, Notifier};

pub struct ChatManager {
    store: Store,
    notifier: Arc<dyn Notifier>,
}

impl ChatManager {
    pub fn new(store: Store, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Everyone `user_id` has exchanged messages with, sorted by username
    pub async fn list_contacts(&self, user_id: &str) -> Result<Vec<UserSummary>> {
        let counterparts: BTreeSet<String> = self
            .store
            .message_parties(user_id)
            .await?
            .into_iter()
            .map(|(sender, receiver)| if sender == user_id { receiver } else { sender })
            .filter(|id| id != user_id)
            .collect();

        if counterparts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = counterparts.into_iter().collect();
        Ok(self.store.summaries(&ids).await?)
    }

    /// Both directions of the conversation with `other_email`, oldest first
    pub async fn list_messages(
        &self,
        user_id: &str,
        other_email: &str,
    ) -> Result<Vec<MessageWithUsers>> {
        let other = self.user_by_email(other_email, "User not found").await?;
        let me = self.store.user_by_id(user_id).await?.map(UserSummary::from);

        let messages = self
            .store
            .conversation(user_id, &other.id)
            .await?
            .into_iter()
            .map(|message| {
                let party = |id: &str| {
                    if id == other.id {
                        Some(other.clone())
                    } else {
                        me.clone()
                    }
                };
                MessageWithUsers {
                    sender: party(&message.sender_id),
                    receiver: party(&message.receiver_id),
                    message,
                }
            })
            .collect();

        Ok(messages)
    }

    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_email: &str,
        content: &str,
    ) -> Result<Message> {
        if receiver_email.trim().is_empty() || content.trim().is_empty() {
            return Err(Error::validation("receiver_email and content are required"));
        }

        let receiver = self.user_by_email(receiver_email.trim(), "Receiver not found").await?;
        let sender = self.me(sender_id).await?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.id.clone(),
            receiver_id: receiver.id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            read_at: None,
        };
        self.store.insert_message(&message).await?;
        info!("[Chat] {} -> {}: message {}", sender.uname, receiver.uname, message.id);

        self.notify(&receiver.email, ChannelEvent::MessageNew(message.clone()));
        if sender.email != receiver.email {
            self.notify(&sender.email, ChannelEvent::MessageNew(message.clone()));
        }

        Ok(message)
    }

    /// Remove the conversation in both directions; returns the deleted-row count.
    pub async fn delete_conversation(&self, user_id: &str, other_email: &str) -> Result<u64> {
        let other = self.user_by_email(other_email, "User not found").await?;
        let deleted = self.store.delete_conversation(user_id, &other.id).await?;

        info!("[Chat] Deleted {} messages between {} and {}", deleted, user_id, other.uname);
        Ok(deleted)
    }

    /// Stamp unread messages from `sender_email` to `user_id` as read.
    ///
    /// Returns how many rows changed; a second call returns 0. The sender is
    /// told which ids were read.
    pub async fn mark_read(&self, user_id: &str, sender_email: &str) -> Result<usize> {
        let sender = self.user_by_email(sender_email, "Sender not found").await?;
        let me = self.me(user_id).await?;

        let ids = self.store.mark_read(&sender.id, user_id, Utc::now()).await?;
        if !ids.is_empty() {
            info!("[Chat] {} read {} messages from {}", me.uname, ids.len(), sender.uname);
            let count = ids.len();
            self.notify(
                &sender.email,
                ChannelEvent::MessageRead {
                    message_ids: ids,
                    receiver_email: me.email,
                },
            );
            return Ok(count);
        }

        Ok(0)
    }

    async fn user_by_email(&self, email: &str, missing: &'static str) -> Result<UserSummary> {
        self.store
            .summary_by_email(email)
            .await?
            .ok_or(Error::NotFound(missing))
    }

    async fn me(&self, user_id: &str) -> Result<UserSummary> {
        self.store
            .user_by_id(user_id)
            .await?
            .map(UserSummary::from)
            .ok_or(Error::NotFound("User not found"))
    }

    fn notify(&self, channel: &str, event: ChannelEvent) {
        match self.notifier.emit(channel, event) {
            Ok(delivered) => debug!("[Chat] Event for {} reached {} sockets", channel, delivered),
            Err(e) => warn!("[Chat] Failed to notify {}: {}", channel, e),
        }
    }
}
