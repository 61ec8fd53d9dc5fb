use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::{ParticipantId, SessionId};

/// Flat discriminant of [`Phase`], used for conditional updates and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum PhaseKind {
    Waiting,
    ChoosingWord,
    Playing,
    RoundSummary,
    Finished,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Waiting => "waiting",
            PhaseKind::ChoosingWord => "choosing_word",
            PhaseKind::Playing => "playing",
            PhaseKind::RoundSummary => "round_summary",
            PhaseKind::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(PhaseKind::Waiting),
            "choosing_word" => Some(PhaseKind::ChoosingWord),
            "playing" => Some(PhaseKind::Playing),
            "round_summary" => Some(PhaseKind::RoundSummary),
            "finished" => Some(PhaseKind::Finished),
            _ => None,
        }
    }

    /// Phases in which a game is underway and a departure can force it to end.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PhaseKind::ChoosingWord | PhaseKind::Playing | PhaseKind::RoundSummary
        )
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative phase of a session. Data that only exists in some phases
/// lives inside the variant, so a word can never be visible while choosing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind")]
#[ts(export)]
pub enum Phase {
    Waiting,
    ChoosingWord {
        drawer_id: ParticipantId,
        choices: Vec<String>,
    },
    Playing {
        drawer_id: ParticipantId,
        word: String,
    },
    /// `drawer_id` is already the next drawer; `word` is the one just played.
    RoundSummary {
        drawer_id: ParticipantId,
        word: String,
    },
    Finished,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Waiting => PhaseKind::Waiting,
            Phase::ChoosingWord { .. } => PhaseKind::ChoosingWord,
            Phase::Playing { .. } => PhaseKind::Playing,
            Phase::RoundSummary { .. } => PhaseKind::RoundSummary,
            Phase::Finished => PhaseKind::Finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    pub id: SessionId,
    pub host_id: ParticipantId,
    pub phase: Phase,
    pub turn_index: u32,
    pub turns_per_cycle: u32,
    pub cycles_total: u32,
    pub round_duration_seconds: u32,
    pub phase_started_at: DateTime<Utc>,
    /// Lowercased words already drawn this game.
    pub used_words: Vec<String>,
    /// Bumped by every applied transition; part of the conditional-update guard.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: SessionId,
        host_id: ParticipantId,
        cycles_total: u32,
        round_duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            host_id,
            phase: Phase::Waiting,
            turn_index: 0,
            turns_per_cycle: 0,
            cycles_total,
            round_duration_seconds,
            phase_started_at: now,
            used_words: Vec::new(),
            version: 0,
            created_at: now,
        }
    }

    pub fn phase_kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub fn turns_total(&self) -> u32 {
        self.cycles_total.saturating_mul(self.turns_per_cycle)
    }

    pub fn current_word(&self) -> Option<&str> {
        match &self.phase {
            Phase::Playing { word, .. } | Phase::RoundSummary { word, .. } => Some(word),
            _ => None,
        }
    }

    pub fn current_drawer(&self) -> Option<ParticipantId> {
        match &self.phase {
            Phase::ChoosingWord { drawer_id, .. }
            | Phase::Playing { drawer_id, .. }
            | Phase::RoundSummary { drawer_id, .. } => Some(*drawer_id),
            Phase::Waiting | Phase::Finished => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn has_used_word(&self, word: &str) -> bool {
        let word = word.trim().to_lowercase();
        self.used_words.iter().any(|used| *used == word)
    }

    /// Copy that is safe to hand to `viewer`: the word is masked for
    /// everyone but the drawer while drawing, and choices are only shown
    /// to the drawer.
    pub fn redacted_for(&self, viewer: ParticipantId) -> Self {
        let mut session = self.clone();
        match &mut session.phase {
            Phase::ChoosingWord { drawer_id, choices } if *drawer_id != viewer => {
                choices.clear();
            }
            Phase::Playing { drawer_id, word } if *drawer_id != viewer => {
                *word = mask_word(word);
            }
            _ => {}
        }
        session
    }
}

/// Replaces every non-whitespace character with an underscore.
pub fn mask_word(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_whitespace() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn playing_session(drawer: ParticipantId) -> Session {
        let mut session = Session::new(Uuid::new_v4(), drawer, 2, 80, Utc::now());
        session.phase = Phase::Playing {
            drawer_id: drawer,
            word: "ice cream".to_string(),
        };
        session
    }

    #[test]
    fn test_word_only_present_while_playing_or_summary() {
        let drawer = Uuid::new_v4();
        let mut session = playing_session(drawer);
        assert_eq!(session.current_word(), Some("ice cream"));

        session.phase = Phase::ChoosingWord {
            drawer_id: drawer,
            choices: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(session.current_word(), None);
        assert_eq!(session.current_drawer(), Some(drawer));

        session.phase = Phase::Waiting;
        assert_eq!(session.current_word(), None);
        assert_eq!(session.current_drawer(), None);
    }

    #[test]
    fn test_turns_total_saturates() {
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 2_000_000_000, 80, Utc::now());
        session.turns_per_cycle = 3;
        assert_eq!(session.turns_total(), u32::MAX);

        session.cycles_total = 2;
        assert_eq!(session.turns_total(), 6);
    }

    #[test]
    fn test_redaction_hides_word_from_guessers() {
        let drawer = Uuid::new_v4();
        let session = playing_session(drawer);

        let for_guesser = session.redacted_for(Uuid::new_v4());
        assert_eq!(for_guesser.current_word(), Some("___ _____"));

        let for_drawer = session.redacted_for(drawer);
        assert_eq!(for_drawer.current_word(), Some("ice cream"));
    }

    #[test]
    fn test_phase_kind_round_trips_through_storage_names() {
        for kind in [
            PhaseKind::Waiting,
            PhaseKind::ChoosingWord,
            PhaseKind::Playing,
            PhaseKind::RoundSummary,
            PhaseKind::Finished,
        ] {
            assert_eq!(PhaseKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PhaseKind::parse("lobby"), None);
    }

    #[test]
    fn test_phase_serializes_with_kind_tag() {
        let json = serde_json::to_value(Phase::Finished).unwrap();
        assert_eq!(json["kind"], "Finished");
    }
}
