use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Category of a dismissible, user-visible notice. None of these are fatal;
/// the next change notification or timer tick resynchronises the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum NoticeKind {
    /// A store or network call failed.
    TransientIo,
    /// The session or word bank is missing; the game stays in its current phase.
    DataAbsent,
    /// The request itself was malformed or not valid in the current phase.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ConnectionError {
    NotJoined,
    SessionNotFound { session_id: String },
    RateLimited,
    InternalError { message: String },
}
