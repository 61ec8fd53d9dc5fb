use chrono::{DateTime, Utc};
use sketch_types::{ChatEntry, MessageId, Participant, ParticipantId, Phase, Session};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Author moved from pending to solved.
    Solved,
    /// Not a correct guess; nothing to track.
    NotCorrect,
    /// Stamped before the current drawing phase began.
    Stale,
    /// Same message id seen before.
    Duplicate,
    /// Author already solved, is the drawer, or is not on the roster.
    NoChange,
}

/// Who has solved the current word, derived from the chat stream.
///
/// Only meaningful for one `Playing` phase; build a fresh tracker whenever
/// the phase (and so `phase_started_at`) changes.
#[derive(Debug, Clone)]
pub struct GuessTracker {
    phase_started_at: DateTime<Utc>,
    drawer_id: ParticipantId,
    solved: BTreeSet<ParticipantId>,
    pending: BTreeSet<ParticipantId>,
    seen_messages: HashSet<MessageId>,
}

impl GuessTracker {
    /// Starts tracking a drawing phase: the drawer is solved, everyone else
    /// is pending. Returns `None` outside `Playing`.
    pub fn begin_round(session: &Session, participants: &[Participant]) -> Option<Self> {
        let Phase::Playing { drawer_id, .. } = &session.phase else {
            return None;
        };

        let pending = participants
            .iter()
            .map(|p| p.user_id)
            .filter(|id| id != drawer_id)
            .collect();

        Some(Self {
            phase_started_at: session.phase_started_at,
            drawer_id: *drawer_id,
            solved: BTreeSet::from([*drawer_id]),
            pending,
            seen_messages: HashSet::new(),
        })
    }

    /// Tracker for the current phase with `chat` already folded in.
    pub fn rebuild(
        session: &Session,
        participants: &[Participant],
        chat: &[ChatEntry],
    ) -> Option<Self> {
        let mut tracker = Self::begin_round(session, participants)?;
        for entry in chat {
            tracker.observe(entry);
        }
        Some(tracker)
    }

    pub fn observe(&mut self, entry: &ChatEntry) -> GuessOutcome {
        if !entry.is_correct {
            return GuessOutcome::NotCorrect;
        }
        if entry.created_at < self.phase_started_at {
            return GuessOutcome::Stale;
        }
        if !self.seen_messages.insert(entry.id) {
            return GuessOutcome::Duplicate;
        }
        if self.pending.remove(&entry.author_id) {
            self.solved.insert(entry.author_id);
            GuessOutcome::Solved
        } else {
            GuessOutcome::NoChange
        }
    }

    pub fn participant_joined(&mut self, participant_id: ParticipantId) {
        if participant_id != self.drawer_id && !self.solved.contains(&participant_id) {
            self.pending.insert(participant_id);
        }
    }

    pub fn participant_left(&mut self, participant_id: ParticipantId) {
        self.pending.remove(&participant_id);
        self.solved.remove(&participant_id);
    }

    /// Nobody is left to guess and at least one real guesser got it.
    pub fn is_round_complete(&self) -> bool {
        self.pending.is_empty() && self.solved.iter().any(|id| *id != self.drawer_id)
    }

    pub fn has_solved(&self, participant_id: ParticipantId) -> bool {
        self.solved.contains(&participant_id)
    }

    pub fn solved(&self) -> &BTreeSet<ParticipantId> {
        &self.solved
    }

    pub fn pending(&self) -> &BTreeSet<ParticipantId> {
        &self.pending
    }

    pub fn phase_started_at(&self) -> DateTime<Utc> {
        self.phase_started_at
    }
}
