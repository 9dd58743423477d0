//! WebSocket endpoint
//!
//! A client joins with the same token it uses for HTTP; the channel is the
//! verified user's email, never a name the client picks.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

use super::ChannelEvent;
use crate::config::AppState;
use crate::core::error::Error;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Frames a client may send
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum ClientFrame {
    #[serde(rename = "join")]
    Join { token: String },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(permit) = state.hub.try_acquire_socket() else {
        warn!("[Realtime] Socket limit reached, refusing upgrade");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "message": "Too many live connections" } })),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, permit))
}

async fn handle_socket(socket: WebSocket, state: AppState, _permit: OwnedSemaphorePermit) {
    debug!("[Realtime] Socket opened");

    let (mut sender, mut receiver) = socket.split();
    let mut joined: Option<(String, broadcast::Receiver<ChannelEvent>)> = None;
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let join_deadline = tokio::time::sleep(state.config.socket_join_timeout);
    tokio::pin!(join_deadline);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(frame)) = incoming else { break };
                match frame {
                    WsMessage::Text(text) => {
                        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(ClientFrame::Join { token }) => match resolve_email(&state, &token).await {
                                Ok(email) => {
                                    if let Some((previous, rx)) = joined.take() {
                                        drop(rx);
                                        state.hub.prune(&previous);
                                    }
                                    let rx = state.hub.subscribe(&email);
                                    info!("[Realtime] {} joined", email);
                                    joined = Some((email.clone(), rx));
                                    ChannelEvent::Joined { email }
                                }
                                Err(message) => ChannelEvent::Error { message },
                            },
                            Err(_) => ChannelEvent::Error {
                                message: "Unsupported event".to_string(),
                            },
                        };
                        if send_event(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            event = next_event(&mut joined) => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("[Realtime] Subscriber lagged, skipped {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => joined = None,
                }
            }
            _ = &mut join_deadline, if joined.is_none() => {
                debug!("[Realtime] Socket never joined, closing");
                let timed_out = ChannelEvent::Error {
                    message: "Join timed out".to_string(),
                };
                let _ = send_event(&mut sender, &timed_out).await;
                let _ = sender.send(WsMessage::Close(None)).await;
                break;
            }
            _ = ping.tick() => {
                if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some((email, rx)) = joined.take() {
        drop(rx);
        state.hub.prune(&email);
        info!("[Realtime] {} left", email);
    }
    debug!("[Realtime] Socket closed");
}

/// Verify the join token and look up the caller's email.
async fn resolve_email(state: &AppState, token: &str) -> Result<String, String> {
    let resolved = async {
        let user_id = state.tokens.verify(token).await?;
        Ok::<_, Error>(state.auth.get_user(&user_id).await?.email)
    }
    .await;

    resolved.map_err(|e| join_error_message(&e))
}

fn join_error_message(err: &Error) -> String {
    match err {
        Error::Unauthorized(msg) | Error::NotFound(msg) => msg.to_string(),
        other => {
            warn!("[Realtime] Join failed: {}", other);
            "Join failed".to_string()
        }
    }
}

async fn next_event(
    joined: &mut Option<(String, broadcast::Receiver<ChannelEvent>)>,
) -> Result<ChannelEvent, broadcast::error::RecvError> {
    match joined {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &ChannelEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(WsMessage::Text(text.into())).await
}
