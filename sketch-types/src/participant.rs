use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{MessageId, ParticipantId, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Participant {
    pub user_id: ParticipantId,
    pub display_name: String,
    pub score: u32,
    pub joined_at: DateTime<Utc>,
    pub is_connected: bool,
}

/// Sorts participants into turn order: earliest joiner first, ties broken by id.
pub fn sort_by_join_order(participants: &mut [Participant]) {
    participants.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatEntry {
    pub id: MessageId,
    pub session_id: SessionId,
    pub author_id: ParticipantId,
    pub author_name: String,
    pub text: String,
    pub is_guess: bool,
    pub is_correct: bool,
    pub created_at: DateTime<Utc>,
}
