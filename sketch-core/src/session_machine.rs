use chrono::{DateTime, Utc};
use rand::Rng;
use sketch_types::{Participant, ParticipantId, Phase, PhaseKind, Session, SessionId, sort_by_join_order};
use std::fmt;

use crate::{GuessTracker, SketchError, SketchResult, WordBank, timers};

pub const MIN_PLAYERS: usize = 2;
pub const MAX_CYCLES_TOTAL: u32 = 20;
pub const MAX_ROUND_DURATION_SECONDS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    GameStarted,
    WordChosen,
    WordAutoPicked,
    TimeUp,
    AllGuessed,
    DrawerLeft,
    TurnSkipped,
    SummaryOver,
    NotEnoughPlayers,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransitionReason::GameStarted => "game started",
            TransitionReason::WordChosen => "word chosen",
            TransitionReason::WordAutoPicked => "word auto-picked",
            TransitionReason::TimeUp => "time up",
            TransitionReason::AllGuessed => "all guessed",
            TransitionReason::DrawerLeft => "drawer left",
            TransitionReason::TurnSkipped => "turn skipped",
            TransitionReason::SummaryOver => "summary over",
            TransitionReason::NotEnoughPlayers => "not enough players",
        };
        f.write_str(text)
    }
}

/// A proposed phase change. The store applies `next` only if the session
/// is still at `expected_phase` / `expected_version`, so racing peers
/// collapse to a single winner.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session_id: SessionId,
    pub expected_phase: PhaseKind,
    pub expected_version: i64,
    pub next: Session,
    /// Set when leaving `Playing`: the durable strokes go with the round.
    pub clear_strokes: bool,
    pub reason: TransitionReason,
}

impl Transition {
    fn new(current: &Session, phase: Phase, reason: TransitionReason, now: DateTime<Utc>) -> Self {
        let mut next = current.clone();
        next.phase = phase;
        next.phase_started_at = now;
        next.version = current.version + 1;

        Self {
            session_id: current.id,
            expected_phase: current.phase_kind(),
            expected_version: current.version,
            clear_strokes: current.phase_kind() == PhaseKind::Playing,
            next,
            reason,
        }
    }

    pub fn to_phase(&self) -> PhaseKind {
        self.next.phase_kind()
    }
}

/// Drawer for `turn_index` (1-based): strict round-robin over participants
/// in join order, independent of score. If people left and the slot no
/// longer exists, it wraps over whoever remains.
pub fn drawer_for_turn(
    participants: &[Participant],
    turn_index: u32,
    turns_per_cycle: u32,
) -> Option<ParticipantId> {
    if participants.is_empty() || turns_per_cycle == 0 || turn_index == 0 {
        return None;
    }

    let mut sorted = participants.to_vec();
    sort_by_join_order(&mut sorted);

    let slot = ((turn_index - 1) % turns_per_cycle) as usize;
    let slot = if slot < sorted.len() { slot } else { slot % sorted.len() };
    Some(sorted[slot].user_id)
}

fn is_present(participants: &[Participant], id: ParticipantId) -> bool {
    participants.iter().any(|p| p.user_id == id)
}

fn wrong_phase(session: &Session) -> SketchError {
    SketchError::WrongPhase {
        phase: session.phase_kind(),
    }
}

/// Pure transition builders for the session lifecycle:
/// `Waiting -> ChoosingWord -> Playing -> RoundSummary -> ChoosingWord ... -> Finished`.
pub struct SessionMachine;

impl SessionMachine {
    /// Host-chosen game length and drawing window, checked at room creation.
    pub fn validate_settings(cycles_total: u32, round_duration_seconds: u32) -> SketchResult<()> {
        if !(1..=MAX_CYCLES_TOTAL).contains(&cycles_total) {
            return Err(SketchError::InvalidInput(format!(
                "cycles must be between 1 and {}, got {}",
                MAX_CYCLES_TOTAL, cycles_total
            )));
        }
        if !(1..=MAX_ROUND_DURATION_SECONDS).contains(&round_duration_seconds) {
            return Err(SketchError::InvalidInput(format!(
                "round duration must be between 1 and {} seconds, got {}",
                MAX_ROUND_DURATION_SECONDS, round_duration_seconds
            )));
        }
        Ok(())
    }

    /// Host starts the game with everyone currently on the roster.
    pub fn start_game<R: Rng + ?Sized>(
        session: &Session,
        participants: &[Participant],
        actor: ParticipantId,
        bank: &WordBank,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> SketchResult<Transition> {
        if session.phase != Phase::Waiting {
            return Err(wrong_phase(session));
        }
        if actor != session.host_id {
            return Err(SketchError::InvalidActor);
        }
        if participants.len() < MIN_PLAYERS {
            return Err(SketchError::DataAbsent(format!(
                "need at least {} participants, have {}",
                MIN_PLAYERS,
                participants.len()
            )));
        }
        if session.cycles_total == 0 {
            return Err(SketchError::DataAbsent("no cycles configured".to_string()));
        }

        let choices = bank.pick_words(&[], rng)?;
        let turns_per_cycle = participants.len() as u32;
        let drawer_id = drawer_for_turn(participants, 1, turns_per_cycle)
            .ok_or_else(|| SketchError::DataAbsent("no drawer available".to_string()))?;

        let mut transition = Transition::new(
            session,
            Phase::ChoosingWord { drawer_id, choices },
            TransitionReason::GameStarted,
            now,
        );
        transition.next.turn_index = 1;
        transition.next.turns_per_cycle = turns_per_cycle;
        transition.next.used_words.clear();
        Ok(transition)
    }

    /// Drawer picks one of the offered words.
    pub fn choose_word(
        session: &Session,
        actor: ParticipantId,
        word: &str,
        now: DateTime<Utc>,
    ) -> SketchResult<Transition> {
        let Phase::ChoosingWord { drawer_id, choices } = &session.phase else {
            return Err(wrong_phase(session));
        };
        if actor != *drawer_id {
            return Err(SketchError::InvalidActor);
        }

        let wanted = word.trim().to_lowercase();
        let chosen = choices
            .iter()
            .find(|choice| choice.to_lowercase() == wanted)
            .ok_or_else(|| SketchError::InvalidInput(format!("'{}' was not offered", word)))?;

        Ok(Self::begin_drawing(
            session,
            *drawer_id,
            chosen.clone(),
            TransitionReason::WordChosen,
            now,
        ))
    }

    /// Word-choice window ran out: take the first offered word, never a new
    /// random one, so every peer proposes the identical transition.
    pub fn auto_pick(session: &Session, now: DateTime<Utc>) -> SketchResult<Transition> {
        let Phase::ChoosingWord { drawer_id, choices } = &session.phase else {
            return Err(wrong_phase(session));
        };
        let first = choices
            .first()
            .ok_or_else(|| SketchError::DataAbsent("no word choices offered".to_string()))?;

        Ok(Self::begin_drawing(
            session,
            *drawer_id,
            first.clone(),
            TransitionReason::WordAutoPicked,
            now,
        ))
    }

    fn begin_drawing(
        session: &Session,
        drawer_id: ParticipantId,
        word: String,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Transition {
        let lowered = word.to_lowercase();
        let mut transition = Transition::new(session, Phase::Playing { drawer_id, word }, reason, now);
        if !transition.next.used_words.contains(&lowered) {
            transition.next.used_words.push(lowered);
        }
        transition
    }

    /// Drawing phase is over (timer, everyone solved it, or the drawer is
    /// gone). Moves to the summary with the next drawer lined up, or ends
    /// the game after the last turn.
    pub fn end_drawing(
        session: &Session,
        participants: &[Participant],
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> SketchResult<Transition> {
        let Phase::Playing { word, .. } = &session.phase else {
            return Err(wrong_phase(session));
        };

        if session.turn_index >= session.turns_total() {
            return Ok(Transition::new(session, Phase::Finished, reason, now));
        }

        let next_turn = session.turn_index + 1;
        let Some(drawer_id) = drawer_for_turn(participants, next_turn, session.turns_per_cycle)
        else {
            return Ok(Transition::new(session, Phase::Finished, reason, now));
        };

        let mut transition = Transition::new(
            session,
            Phase::RoundSummary {
                drawer_id,
                word: word.clone(),
            },
            reason,
            now,
        );
        transition.next.turn_index = next_turn;
        Ok(transition)
    }

    /// Summary is over: offer words to the drawer of the current turn.
    pub fn begin_next_turn<R: Rng + ?Sized>(
        session: &Session,
        participants: &[Participant],
        bank: &WordBank,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> SketchResult<Transition> {
        let Phase::RoundSummary { drawer_id, .. } = &session.phase else {
            return Err(wrong_phase(session));
        };

        // Roster may have changed during the summary.
        let drawer_id = if is_present(participants, *drawer_id) {
            *drawer_id
        } else {
            drawer_for_turn(participants, session.turn_index, session.turns_per_cycle)
                .ok_or_else(|| SketchError::DataAbsent("no drawer available".to_string()))?
        };
        let choices = bank.pick_words(&session.used_words, rng)?;

        Ok(Transition::new(
            session,
            Phase::ChoosingWord { drawer_id, choices },
            TransitionReason::SummaryOver,
            now,
        ))
    }

    /// Drawer left before choosing: the turn is spent and the next drawer
    /// gets fresh choices.
    pub fn skip_turn<R: Rng + ?Sized>(
        session: &Session,
        participants: &[Participant],
        bank: &WordBank,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> SketchResult<Transition> {
        if session.phase_kind() != PhaseKind::ChoosingWord {
            return Err(wrong_phase(session));
        }

        let reason = TransitionReason::TurnSkipped;
        if session.turn_index >= session.turns_total() {
            return Ok(Transition::new(session, Phase::Finished, reason, now));
        }

        let next_turn = session.turn_index + 1;
        let Some(drawer_id) = drawer_for_turn(participants, next_turn, session.turns_per_cycle)
        else {
            return Ok(Transition::new(session, Phase::Finished, reason, now));
        };
        let choices = bank.pick_words(&session.used_words, rng)?;

        let mut transition =
            Transition::new(session, Phase::ChoosingWord { drawer_id, choices }, reason, now);
        transition.next.turn_index = next_turn;
        Ok(transition)
    }

    /// Ends an active game early once the roster stayed at one or fewer
    /// participants for the whole confirmation window.
    pub fn force_finish(session: &Session, now: DateTime<Utc>) -> SketchResult<Transition> {
        if !session.phase_kind().is_active() {
            return Err(wrong_phase(session));
        }
        Ok(Transition::new(
            session,
            Phase::Finished,
            TransitionReason::NotEnoughPlayers,
            now,
        ))
    }

    /// The single timed transition that is due for `session` at `now`, if
    /// any. Every peer runs this on each tick; all of them derive the same
    /// answer from the same persisted state.
    pub fn due_transition<R: Rng + ?Sized>(
        session: &Session,
        participants: &[Participant],
        tracker: Option<&GuessTracker>,
        understaffed_confirmed: bool,
        bank: &WordBank,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> SketchResult<Option<Transition>> {
        if session.phase_kind().is_active() && understaffed_confirmed {
            return Self::force_finish(session, now).map(Some);
        }

        match &session.phase {
            Phase::Waiting | Phase::Finished => Ok(None),
            Phase::ChoosingWord { drawer_id, .. } => {
                if !is_present(participants, *drawer_id) {
                    Self::skip_turn(session, participants, bank, rng, now).map(Some)
                } else if timers::is_elapsed(session, now) {
                    Self::auto_pick(session, now).map(Some)
                } else {
                    Ok(None)
                }
            }
            Phase::Playing { drawer_id, .. } => {
                let reason = if !is_present(participants, *drawer_id) {
                    Some(TransitionReason::DrawerLeft)
                } else if tracker.is_some_and(GuessTracker::is_round_complete) {
                    Some(TransitionReason::AllGuessed)
                } else if timers::is_elapsed(session, now) {
                    Some(TransitionReason::TimeUp)
                } else {
                    None
                };
                match reason {
                    Some(reason) => Self::end_drawing(session, participants, reason, now).map(Some),
                    None => Ok(None),
                }
            }
            Phase::RoundSummary { .. } => {
                if timers::is_elapsed(session, now) {
                    Self::begin_next_turn(session, participants, bank, rng, now).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use uuid::Uuid;

    fn participant(name: &str, joined_offset: i64, base: DateTime<Utc>) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            display_name: name.to_string(),
            score: 0,
            joined_at: base + Duration::seconds(joined_offset),
            is_connected: true,
        }
    }

    fn bank() -> WordBank {
        WordBank::from_word_list("apple\nbridge\ncastle\ndragon\neagle\nforest\ngarden\nharbor")
    }

    fn setup(count: usize) -> (Session, Vec<Participant>, DateTime<Utc>) {
        let now = Utc::now();
        let players: Vec<_> = (0..count)
            .map(|i| participant(&format!("p{}", i), i as i64, now))
            .collect();
        let session = Session::new(Uuid::new_v4(), players[0].user_id, 2, 80, now);
        (session, players, now)
    }

    #[test]
    fn test_start_game_sets_schedule() {
        let (session, players, now) = setup(3);
        let mut rng = StdRng::seed_from_u64(5);

        let t = SessionMachine::start_game(&session, &players, players[0].user_id, &bank(), &mut rng, now)
            .unwrap();

        assert_eq!(t.expected_phase, PhaseKind::Waiting);
        assert_eq!(t.expected_version, 0);
        assert_eq!(t.next.version, 1);
        assert_eq!(t.next.turn_index, 1);
        assert_eq!(t.next.turns_per_cycle, 3);
        assert_eq!(t.next.turns_total(), 6);
        assert_eq!(t.next.current_drawer(), Some(players[0].user_id));
        assert_eq!(t.next.current_word(), None);
        assert!(!t.clear_strokes);
        match &t.next.phase {
            Phase::ChoosingWord { choices, .. } => assert_eq!(choices.len(), 3),
            other => panic!("unexpected phase {:?}", other),
        }
    }

    #[test]
    fn test_settings_are_bounded() {
        assert!(SessionMachine::validate_settings(3, 80).is_ok());
        assert!(SessionMachine::validate_settings(MAX_CYCLES_TOTAL, MAX_ROUND_DURATION_SECONDS).is_ok());
        for (cycles, duration) in [(0, 80), (3, 0), (MAX_CYCLES_TOTAL + 1, 80), (3, 2_000_000_000)] {
            assert!(matches!(
                SessionMachine::validate_settings(cycles, duration),
                Err(SketchError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_start_game_guards() {
        let (session, players, now) = setup(2);
        let mut rng = StdRng::seed_from_u64(5);

        let not_host = SessionMachine::start_game(&session, &players, players[1].user_id, &bank(), &mut rng, now);
        assert!(matches!(not_host, Err(SketchError::InvalidActor)));

        let alone = SessionMachine::start_game(&session, &players[..1], players[0].user_id, &bank(), &mut rng, now);
        assert!(matches!(alone, Err(SketchError::DataAbsent(_))));

        let empty = WordBank::from_word_list("");
        let no_words = SessionMachine::start_game(&session, &players, players[0].user_id, &empty, &mut rng, now);
        assert!(matches!(no_words, Err(SketchError::DataAbsent(_))));
    }

    #[test]
    fn test_choose_word_only_by_drawer_from_choices() {
        let (session, players, now) = setup(2);
        let mut rng = StdRng::seed_from_u64(9);
        let choosing = SessionMachine::start_game(&session, &players, players[0].user_id, &bank(), &mut rng, now)
            .unwrap()
            .next;
        let Phase::ChoosingWord { choices, .. } = choosing.phase.clone() else {
            panic!("expected choosing");
        };

        let by_guesser = SessionMachine::choose_word(&choosing, players[1].user_id, &choices[1], now);
        assert!(matches!(by_guesser, Err(SketchError::InvalidActor)));

        let unknown = SessionMachine::choose_word(&choosing, players[0].user_id, "zebra", now);
        assert!(matches!(unknown, Err(SketchError::InvalidInput(_))));

        let later = now + Duration::seconds(3);
        let t = SessionMachine::choose_word(&choosing, players[0].user_id, &choices[1].to_uppercase(), later)
            .unwrap();
        assert_eq!(t.next.current_word(), Some(choices[1].as_str()));
        assert_eq!(t.next.phase_started_at, later);
        assert_eq!(t.next.used_words, vec![choices[1].clone()]);
    }

    #[test]
    fn test_auto_pick_takes_first_choice() {
        let (session, players, now) = setup(2);
        let mut rng = StdRng::seed_from_u64(11);
        let choosing = SessionMachine::start_game(&session, &players, players[0].user_id, &bank(), &mut rng, now)
            .unwrap()
            .next;
        let Phase::ChoosingWord { choices, .. } = choosing.phase.clone() else {
            panic!("expected choosing");
        };

        let early = SessionMachine::due_transition(&choosing, &players, None, false, &bank(), &mut rng, now + Duration::seconds(9))
            .unwrap();
        assert!(early.is_none());

        let due = SessionMachine::due_transition(&choosing, &players, None, false, &bank(), &mut rng, now + Duration::seconds(10))
            .unwrap()
            .unwrap();
        assert_eq!(due.reason, TransitionReason::WordAutoPicked);
        assert_eq!(due.next.current_word(), Some(choices[0].as_str()));
    }

    #[test]
    fn test_end_drawing_clears_strokes_and_advances() {
        let (session, players, now) = setup(3);
        let mut rng = StdRng::seed_from_u64(2);
        let choosing = SessionMachine::start_game(&session, &players, players[0].user_id, &bank(), &mut rng, now)
            .unwrap()
            .next;
        let playing = SessionMachine::auto_pick(&choosing, now).unwrap().next;

        let t = SessionMachine::end_drawing(&playing, &players, TransitionReason::TimeUp, now).unwrap();
        assert!(t.clear_strokes);
        assert_eq!(t.to_phase(), PhaseKind::RoundSummary);
        assert_eq!(t.next.turn_index, 2);
        assert_eq!(t.next.current_drawer(), Some(players[1].user_id));
        assert_eq!(t.next.current_word(), playing.current_word());
    }

    #[test]
    fn test_last_turn_finishes_game() {
        let (session, players, now) = setup(2);
        let mut playing = session.clone();
        playing.turn_index = 4;
        playing.turns_per_cycle = 2;
        playing.phase = Phase::Playing {
            drawer_id: players[1].user_id,
            word: "eagle".into(),
        };

        let t = SessionMachine::end_drawing(&playing, &players, TransitionReason::TimeUp, now).unwrap();
        assert_eq!(t.next.phase, Phase::Finished);
        assert!(t.clear_strokes);
        assert_eq!(t.next.current_word(), None);
        assert_eq!(t.next.current_drawer(), None);
    }

    #[test]
    fn test_drawer_leaving_mid_round_ends_drawing() {
        let (session, players, now) = setup(3);
        let mut playing = session.clone();
        playing.turn_index = 1;
        playing.turns_per_cycle = 3;
        playing.phase = Phase::Playing {
            drawer_id: players[0].user_id,
            word: "eagle".into(),
        };

        let remaining = &players[1..];
        let t = SessionMachine::due_transition(&playing, remaining, None, false, &bank(), &mut StdRng::seed_from_u64(0), now)
            .unwrap()
            .unwrap();
        assert_eq!(t.reason, TransitionReason::DrawerLeft);
        assert_eq!(t.to_phase(), PhaseKind::RoundSummary);
    }

    #[test]
    fn test_understaffed_forces_finish() {
        let (session, players, now) = setup(2);
        let mut playing = session.clone();
        playing.turns_per_cycle = 2;
        playing.turn_index = 1;
        playing.phase = Phase::RoundSummary {
            drawer_id: players[0].user_id,
            word: "eagle".into(),
        };

        let t = SessionMachine::due_transition(&playing, &players[..1], None, true, &bank(), &mut StdRng::seed_from_u64(0), now)
            .unwrap()
            .unwrap();
        assert_eq!(t.reason, TransitionReason::NotEnoughPlayers);
        assert_eq!(t.next.phase, Phase::Finished);

        let waiting = SessionMachine::force_finish(&session, now);
        assert!(matches!(waiting, Err(SketchError::WrongPhase { .. })));
    }

    #[test]
    fn test_finished_is_terminal() {
        let (mut session, players, now) = setup(2);
        session.phase = Phase::Finished;
        let mut rng = StdRng::seed_from_u64(0);

        assert!(SessionMachine::start_game(&session, &players, players[0].user_id, &bank(), &mut rng, now).is_err());
        assert!(SessionMachine::auto_pick(&session, now).is_err());
        let due = SessionMachine::due_transition(&session, &players, None, true, &bank(), &mut rng, now + Duration::days(1))
            .unwrap();
        assert!(due.is_none());
    }

    #[test]
    fn test_drawer_wraps_when_slot_left() {
        let now = Utc::now();
        let players = vec![participant("a", 0, now), participant("b", 1, now)];
        // Cycle was fixed at 3 but only two remain.
        assert_eq!(drawer_for_turn(&players, 3, 3), Some(players[0].user_id));
        assert_eq!(drawer_for_turn(&players, 2, 3), Some(players[1].user_id));
        assert_eq!(drawer_for_turn(&[], 1, 3), None);
    }
}
