//! WebSocket session loops for kiosk screens and admin panels.
//!
//! The HTTP layer performs the upgrade (and admin auth); these functions own
//! the socket afterwards.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{AdminAction, AdminEvent, EventHub};
use crate::store::Database;

/// Forward kiosk events until the client goes away. Kiosks send nothing.
pub async fn handle_kiosk_socket(mut socket: WebSocket, hub: Arc<EventHub>) {
    debug!("Kiosk client connected");
    let mut rx = hub.subscribe_kiosk();

    loop {
        tokio::select! {
            result = rx.recv() => {
                if !forward(&mut socket, result).await {
                    break;
                }
            }
            result = socket.recv() => {
                if !keep_alive(&mut socket, result).await {
                    break;
                }
            }
        }
    }

    debug!("Kiosk client disconnected");
}

/// Forward admin events and handle `enroll_card` actions.
pub async fn handle_admin_socket(mut socket: WebSocket, hub: Arc<EventHub>, db: Arc<dyn Database>) {
    debug!("Admin client connected");
    let mut rx = hub.subscribe_admin();

    loop {
        tokio::select! {
            result = rx.recv() => {
                if !forward(&mut socket, result).await {
                    break;
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_admin_message(&text, db.as_ref()).await {
                            if !send_json(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    other => {
                        if !keep_alive(&mut socket, other).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Admin client disconnected");
}

/// Apply one admin action. Returns the reply for the sending client only.
async fn handle_admin_message(text: &str, db: &dyn Database) -> Option<AdminEvent> {
    let action = match serde_json::from_str::<AdminAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from admin");
            return None;
        }
    };

    match action {
        AdminAction::EnrollCard { uid, label } => {
            let uid = uid.as_deref().unwrap_or("").trim().to_string();
            if uid.is_empty() {
                return None;
            }
            let label = label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string);

            if let Err(e) = db.enroll_card(&uid, label.as_deref()).await {
                warn!(uid = %uid, error = %e, "Card enrollment failed");
                return None;
            }
            info!(uid = %uid, label = ?label, "Card enrolled");
            Some(AdminEvent::EnrollSuccess {
                uid,
                label: label.unwrap_or_default(),
            })
        }
    }
}

/// Send one broadcast result. Returns false when the loop should stop.
async fn forward<T: Serialize + Clone>(
    socket: &mut WebSocket,
    result: Result<T, broadcast::error::RecvError>,
) -> bool {
    match result {
        Ok(event) => send_json(socket, &event).await,
        Err(broadcast::error::RecvError::Lagged(n)) => {
            // events are transient; dropping the missed ones is fine
            warn!(missed = n, "WS client lagged behind broadcast");
            true
        }
        Err(broadcast::error::RecvError::Closed) => {
            debug!("Broadcast channel closed");
            false
        }
    }
}

/// Handle control frames. Returns false on close or error.
async fn keep_alive(
    socket: &mut WebSocket,
    result: Option<Result<Message, axum::Error>>,
) -> bool {
    match result {
        Some(Ok(Message::Ping(data))) => socket.send(Message::Pong(data)).await.is_ok(),
        Some(Ok(Message::Close(_))) | None => false,
        Some(Err(e)) => {
            warn!(error = %e, "WebSocket error");
            false
        }
        _ => true,
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS message");
            true
        }
    }
}
