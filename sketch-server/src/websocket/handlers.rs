use chrono::Utc;
use sketch_core::SketchError;
use sketch_types::{
    ClientMessage, ConnectionError, EntityKind, NoticeKind, ParticipantId, ServerMessage,
    SessionId,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::change_feed::{FeedItem, FeedSubscription};
use crate::session_manager::SessionManager;
use crate::websocket::connection::{ConnectionId, ConnectionManager, Membership};

/// Turns a failed action into what the user sees, if anything.
pub fn notice_for(error: &SketchError) -> Option<ServerMessage> {
    if error.is_success() || error.is_silent() {
        return None;
    }

    let kind = match error {
        SketchError::TransientIo(_) => NoticeKind::TransientIo,
        SketchError::DataAbsent(_) => NoticeKind::DataAbsent,
        _ => NoticeKind::Rejected,
    };
    Some(ServerMessage::Notice {
        kind,
        message: error.to_string(),
    })
}

#[derive(Clone)]
pub struct MessageHandler {
    connection_id: ConnectionId,
    connection_manager: Arc<ConnectionManager>,
    session_manager: Arc<SessionManager>,
}

impl MessageHandler {
    pub fn new(
        connection_id: ConnectionId,
        connection_manager: Arc<ConnectionManager>,
        session_manager: Arc<SessionManager>,
    ) -> Self {
        Self {
            connection_id,
            connection_manager,
            session_manager,
        }
    }

    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), String> {
        self.connection_manager
            .update_activity(self.connection_id)
            .await;

        let seat = match message {
            ClientMessage::JoinSession {
                session_id,
                user_id,
                display_name,
            } => return self.handle_join(session_id, user_id, display_name).await,
            ClientMessage::Heartbeat => return Ok(()),
            _ => self.connection_manager.membership(self.connection_id).await,
        };

        let Some(seat) = seat else {
            return self.handle_rejection(ConnectionError::NotJoined).await;
        };

        let Membership {
            session_id,
            user_id,
        } = seat;
        let sessions = &self.session_manager;
        let now = Utc::now();

        let result = match message {
            ClientMessage::StartGame => sessions.start_game(session_id, user_id, now).await.map(drop),
            ClientMessage::ChooseWord { word } => sessions
                .choose_word(session_id, user_id, &word, now)
                .await
                .map(drop),
            ClientMessage::SendChat { id, text } => sessions
                .send_guess_or_chat(session_id, user_id, id, &text, now)
                .await
                .map(drop),
            ClientMessage::DrawStroke { path_id, shape } => sessions
                .draw_stroke(session_id, user_id, path_id, shape, now)
                .await
                .map(drop),
            ClientMessage::LiveInk { event } => {
                sessions.broadcast_ink(session_id, user_id, event).await
            }
            ClientMessage::Undo => sessions.undo(session_id, user_id).await.map(drop),
            ClientMessage::Clear => sessions.clear(session_id, user_id).await.map(drop),
            ClientMessage::LeaveSession => return self.handle_leave(seat).await,
            ClientMessage::Tick => sessions.tick(session_id, now).await.map(drop),
            ClientMessage::FetchStrokes => match sessions.strokes(session_id).await {
                Ok(strokes) => {
                    return self
                        .send_message(ServerMessage::StrokeHistory { strokes })
                        .await;
                }
                Err(e) => Err(e),
            },
            ClientMessage::JoinSession { .. } | ClientMessage::Heartbeat => Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => self.report(e).await,
        }
    }

    pub async fn handle_disconnect(&self) {
        info!("Handling disconnect for connection {}", self.connection_id);

        let Some(seat) = self
            .connection_manager
            .remove_connection(self.connection_id)
            .await
        else {
            return;
        };
        // A newer socket may already hold the same seat.
        if self.connection_manager.has_seat(seat).await {
            return;
        }
        if let Err(e) = self
            .session_manager
            .disconnect(seat.session_id, seat.user_id)
            .await
        {
            warn!(
                "Failed to mark {} offline in session {}: {}",
                seat.user_id, seat.session_id, e
            );
        }
    }

    async fn handle_join(
        &self,
        session_id: SessionId,
        user_id: ParticipantId,
        display_name: String,
    ) -> Result<(), String> {
        info!(
            "Connection {} joining session {} as {}",
            self.connection_id, session_id, user_id
        );

        // Subscribe before reading the snapshot so nothing falls in between.
        let subscription =
            self.session_manager
                .feed()
                .subscribe(session_id, user_id, &EntityKind::ALL);

        let snapshot = match self
            .session_manager
            .join(session_id, user_id, &display_name, Utc::now())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(SketchError::DataAbsent(_)) => {
                return self
                    .handle_rejection(ConnectionError::SessionNotFound {
                        session_id: session_id.to_string(),
                    })
                    .await;
            }
            Err(e) => return self.report(e).await,
        };

        let connection = self
            .connection_manager
            .get_connection(self.connection_id)
            .await
            .ok_or("Connection not found")?;
        connection.send_message(ServerMessage::Joined { snapshot })?;

        let forwarder = tokio::spawn(forward_feed(
            subscription,
            user_id,
            connection.sender,
            self.session_manager.clone(),
        ));
        let seat = Membership {
            session_id,
            user_id,
        };
        let previous = self
            .connection_manager
            .attach(self.connection_id, seat, forwarder.abort_handle())
            .await?;

        if let Some(previous) = previous.filter(|p| *p != seat) {
            if let Err(e) = self
                .session_manager
                .disconnect(previous.session_id, previous.user_id)
                .await
            {
                warn!("Failed to release previous seat: {}", e);
            }
        }
        Ok(())
    }

    async fn handle_leave(&self, seat: Membership) -> Result<(), String> {
        info!("{} leaving session {}", seat.user_id, seat.session_id);

        if let Err(e) = self
            .session_manager
            .leave(seat.session_id, seat.user_id, Utc::now())
            .await
        {
            return self.report(e).await;
        }
        self.connection_manager.detach(self.connection_id).await;
        self.send_message(ServerMessage::Left).await
    }

    pub async fn handle_rejection(&self, error: ConnectionError) -> Result<(), String> {
        self.send_message(ServerMessage::ConnectionRejected { error })
            .await
    }

    async fn report(&self, error: SketchError) -> Result<(), String> {
        match notice_for(&error) {
            Some(notice) => {
                debug!("Action on {} failed: {}", self.connection_id, error);
                self.send_message(notice).await
            }
            None => {
                debug!("Dropped action on {}: {}", self.connection_id, error);
                Ok(())
            }
        }
    }

    async fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.connection_manager
            .send_to_connection(self.connection_id, message)
            .await
    }
}

/// Relays one session's feed to a socket until either side goes away.
async fn forward_feed(
    mut subscription: FeedSubscription,
    viewer: ParticipantId,
    sender: mpsc::UnboundedSender<ServerMessage>,
    session_manager: Arc<SessionManager>,
) {
    while let Some(item) = subscription.recv().await {
        let message = match item {
            FeedItem::Change(notice) => ServerMessage::Change {
                notice: notice.redacted_for(viewer),
            },
            FeedItem::Ephemeral { event, .. } => ServerMessage::Ephemeral { event },
            FeedItem::Resync { skipped } => {
                debug!("Resyncing {} after {} lost feed items", viewer, skipped);
                match session_manager
                    .snapshot(subscription.session_id(), viewer, Utc::now())
                    .await
                {
                    Ok(snapshot) => ServerMessage::Joined { snapshot },
                    Err(e) => match notice_for(&e) {
                        Some(notice) => notice,
                        None => continue,
                    },
                }
            }
        };
        if sender.send(message).is_err() {
            break;
        }
    }
    debug!(
        "Feed relay for {} in session {} stopped",
        viewer,
        subscription.session_id()
    );
}
