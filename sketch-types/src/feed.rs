use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{ChatEntry, Participant, ParticipantId, Session, SessionId, Stroke, StrokeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum EntityKind {
    Session,
    Roster,
    Chat,
    Stroke,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Session,
        EntityKind::Roster,
        EntityKind::Chat,
        EntityKind::Stroke,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "entity", content = "record")]
#[ts(export)]
pub enum FeedRecord {
    Session(Session),
    Participant(Participant),
    Chat(ChatEntry),
    Stroke(Stroke),
    /// Durable strokes were removed. `stroke_id` is `None` when the whole
    /// history for the session was deleted.
    StrokesRemoved {
        session_id: SessionId,
        stroke_id: Option<StrokeId>,
    },
}

/// Row-level change notification delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeNotice {
    pub op: ChangeOp,
    pub record: FeedRecord,
}

impl ChangeNotice {
    pub fn insert(record: FeedRecord) -> Self {
        Self {
            op: ChangeOp::Insert,
            record,
        }
    }

    pub fn update(record: FeedRecord) -> Self {
        Self {
            op: ChangeOp::Update,
            record,
        }
    }

    pub fn delete(record: FeedRecord) -> Self {
        Self {
            op: ChangeOp::Delete,
            record,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self.record {
            FeedRecord::Session(_) => EntityKind::Session,
            FeedRecord::Participant(_) => EntityKind::Roster,
            FeedRecord::Chat(_) => EntityKind::Chat,
            FeedRecord::Stroke(_) | FeedRecord::StrokesRemoved { .. } => EntityKind::Stroke,
        }
    }

    /// Copy safe for delivery to `viewer`; session records are redacted.
    pub fn redacted_for(&self, viewer: ParticipantId) -> Self {
        match &self.record {
            FeedRecord::Session(session) => Self {
                op: self.op,
                record: FeedRecord::Session(session.redacted_for(viewer)),
            },
            _ => self.clone(),
        }
    }
}
