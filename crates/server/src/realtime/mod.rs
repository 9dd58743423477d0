//! Realtime push
//!
//! Every user has one broadcast channel, named by their email. The chat
//! service emits into it after successful writes and each joined WebSocket
//! forwards what it receives. Delivery is at-most-once: an emit to a channel
//! nobody listens on is dropped.

pub mod socket;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::core::models::Message;

/// Buffered events per channel before slow subscribers start lagging
pub const CHANNEL_CAPACITY: usize = 64;

/// Frames the server pushes, as `{"event": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ChannelEvent {
    #[serde(rename = "joined")]
    Joined { email: String },

    #[serde(rename = "message:new")]
    MessageNew(Message),

    #[serde(rename = "message:read")]
    MessageRead {
        #[serde(rename = "messageIds")]
        message_ids: Vec<String>,
        #[serde(rename = "receiverEmail")]
        receiver_email: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Push seam used by the chat service
pub trait Notifier: Send + Sync {
    /// Returns how many live subscribers received the event.
    fn emit(&self, channel: &str, event: ChannelEvent) -> Result<usize, NotifyError>;
}

/// In-process broadcast channels keyed by email
pub struct ChannelHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ChannelEvent>>>,
    sockets: Arc<Semaphore>,
}

impl ChannelHub {
    pub fn new(max_sockets: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            sockets: Arc::new(Semaphore::new(max_sockets)),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop `channel` once its last subscriber is gone.
    pub fn prune(&self, channel: &str) {
        let mut channels = self.channels.write();
        if channels
            .get(channel)
            .map_or(false, |tx| tx.receiver_count() == 0)
        {
            channels.remove(channel);
            debug!("[Realtime] Pruned channel {}", channel);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Reserve a live-socket slot; `None` when the cap is reached.
    pub fn try_acquire_socket(&self) -> Option<OwnedSemaphorePermit> {
        self.sockets.clone().try_acquire_owned().ok()
    }
}

impl Notifier for ChannelHub {
    fn emit(&self, channel: &str, event: ChannelEvent) -> Result<usize, NotifyError> {
        let sent = match self.channels.read().get(channel) {
            Some(tx) => tx.send(event),
            None => return Ok(0),
        };

        match sent {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                self.prune(channel);
                Ok(0)
            }
        }
    }
}
