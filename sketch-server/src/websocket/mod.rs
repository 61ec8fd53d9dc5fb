use futures_util::{SinkExt, StreamExt};
use sketch_types::{ClientMessage, ConnectionError, ServerMessage};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warp::ws::{Message, WebSocket};

use crate::session_manager::SessionManager;

pub mod connection;
pub mod handlers;
pub mod rate_limiter;

#[cfg(test)]
pub mod integration_tests;

use connection::ConnectionId;
pub use connection::ConnectionManager;
use handlers::MessageHandler;
use rate_limiter::RateLimiter;

/// Per-socket request budgets. Live ink has its own bucket sized to the
/// sample rate so drawing never starves chat and commands.
struct Limits {
    commands: RateLimiter,
    ink: RateLimiter,
}

pub async fn handle_connection(
    websocket: WebSocket,
    connection_manager: Arc<ConnectionManager>,
    session_manager: Arc<SessionManager>,
) {
    let connection_id = ConnectionId::new();
    info!("New WebSocket connection: {}", connection_id);

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let mut limits = Limits {
        commands: RateLimiter::new(),
        ink: RateLimiter::for_ink(session_manager.settings().ink_samples_per_second),
    };

    let message_receiver = connection_manager.create_connection(connection_id).await;
    let message_handler =
        MessageHandler::new(connection_id, connection_manager.clone(), session_manager);

    let incoming_handler = {
        let connection_manager = connection_manager.clone();
        let message_handler = message_handler.clone();

        async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(msg) => {
                        if let Err(e) =
                            handle_message(msg, &mut limits, &message_handler, connection_id).await
                        {
                            error!("Error handling message for {}: {}", connection_id, e);
                            let _ = connection_manager
                                .send_to_connection(
                                    connection_id,
                                    ServerMessage::Error { message: e },
                                )
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                }
            }
        }
    };

    let outgoing_handler = {
        async move {
            let mut receiver = message_receiver;

            while let Some(message) = receiver.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {:?}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::text(json)).await {
                    warn!("Failed to send message to {}: {:?}", connection_id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = incoming_handler => {},
        _ = outgoing_handler => {},
    }

    info!("Connection {} disconnected", connection_id);
    message_handler.handle_disconnect().await;
}

async fn handle_message(
    msg: Message,
    limits: &mut Limits,
    message_handler: &MessageHandler,
    connection_id: ConnectionId,
) -> Result<(), String> {
    if !msg.is_text() {
        return Ok(());
    }

    let text = msg.to_str().map_err(|_| "Invalid text message")?;
    let client_message: ClientMessage =
        serde_json::from_str(text).map_err(|e| format!("Invalid JSON message: {}", e))?;

    if matches!(client_message, ClientMessage::LiveInk { .. }) {
        // Previews are best-effort: over budget they are simply dropped.
        if !limits.ink.check_rate_limit() {
            debug!("Dropping live ink from {} over budget", connection_id);
            return Ok(());
        }
    } else if !limits.commands.check_rate_limit() {
        warn!("Rate limit exceeded for connection {}", connection_id);
        return message_handler
            .handle_rejection(ConnectionError::RateLimited)
            .await;
    }

    message_handler
        .handle_message(client_message)
        .await
        .map_err(|e| format!("Message handling error: {}", e))
}
