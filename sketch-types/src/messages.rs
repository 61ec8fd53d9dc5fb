use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    BroadcastEvent, ChangeNotice, ChatEntry, ConnectionError, MessageId, NoticeKind,
    Participant, ParticipantId, PathId, Session, SessionId, Stroke, StrokeShape,
};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ClientMessage {
    JoinSession {
        session_id: SessionId,
        user_id: ParticipantId,
        display_name: String,
    },
    StartGame,
    ChooseWord { word: String },
    /// `id` makes retries idempotent; the host assigns one when absent.
    SendChat {
        id: Option<MessageId>,
        text: String,
    },
    DrawStroke {
        path_id: Option<PathId>,
        shape: StrokeShape,
    },
    LiveInk { event: BroadcastEvent },
    Undo,
    Clear,
    LeaveSession,
    /// Asks the host to re-check timers as one more cooperating peer.
    Tick,
    FetchStrokes,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ServerMessage {
    Joined { snapshot: SessionSnapshot },
    Change { notice: ChangeNotice },
    Ephemeral { event: BroadcastEvent },
    StrokeHistory { strokes: Vec<Stroke> },
    Notice { kind: NoticeKind, message: String },
    ConnectionRejected { error: ConnectionError },
    Left,
    Error { message: String },
}

/// Everything a client needs to render a session after attaching.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionSnapshot {
    pub session: Session,
    pub participants: Vec<Participant>,
    pub chat: Vec<ChatEntry>,
    pub strokes: Vec<Stroke>,
    /// Host clock at snapshot time, so clients can correct for skew when
    /// deriving remaining time from `phase_started_at`.
    pub server_time: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn redacted_for(mut self, viewer: ParticipantId) -> Self {
        self.session = self.session.redacted_for(viewer);
        self
    }
}
