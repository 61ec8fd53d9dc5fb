use chrono::{DateTime, Duration, Utc};
use sketch_types::{Participant, Session, SessionId};
use std::collections::HashMap;
use tracing::info;

use crate::MIN_PLAYERS;

pub const DEPARTURE_GRACE_SECONDS: i64 = 3;

/// Tracks sessions whose roster dropped below the minimum, so a game is
/// only forced to finish once the shortfall has lasted the grace window.
/// A quick reconnect inside the window clears the mark.
#[derive(Debug, Clone)]
pub struct DepartureWatch {
    pub grace: Duration,
    understaffed_since: HashMap<SessionId, DateTime<Utc>>,
}

impl Default for DepartureWatch {
    fn default() -> Self {
        Self::new(Duration::seconds(DEPARTURE_GRACE_SECONDS))
    }
}

impl DepartureWatch {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            understaffed_since: HashMap::new(),
        }
    }

    /// Returns true once `session` has been short of players for at least
    /// the grace window. Inactive sessions are never considered.
    pub fn observe(
        &mut self,
        session: &Session,
        participants: &[Participant],
        now: DateTime<Utc>,
    ) -> bool {
        if !session.phase_kind().is_active() || participants.len() >= MIN_PLAYERS {
            if self.understaffed_since.remove(&session.id).is_some() {
                info!("Session {} is staffed again", session.id);
            }
            return false;
        }

        let since = *self.understaffed_since.entry(session.id).or_insert_with(|| {
            info!(
                "Session {} dropped to {} participant(s)",
                session.id,
                participants.len()
            );
            now
        });
        now - since >= self.grace
    }

    pub fn forget(&mut self, session_id: SessionId) {
        self.understaffed_since.remove(&session_id);
    }

    pub fn watched(&self) -> usize {
        self.understaffed_since.len()
    }
}
