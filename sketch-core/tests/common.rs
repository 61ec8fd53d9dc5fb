#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sketch_core::{GuessTracker, SessionMachine, Transition, WordBank, timers};
use sketch_types::{ChatEntry, Participant, ParticipantId, Phase, PhaseKind, Session};
use uuid::Uuid;

/// Creates a test WordBank with a known set of words
pub fn create_test_bank() -> WordBank {
    let word_list = "apple\nbanana\ncherry\nhouse\nmouse\ntrain\nplane\nwater\nstone\nbread\ncream\nkite\nlamp\nboat\ntree";
    WordBank::from_word_list(word_list)
}

pub fn seeded_rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

/// Participants that joined one second apart, in the given order.
pub fn create_roster(names: &[&str], base: DateTime<Utc>) -> Vec<Participant> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Participant {
            user_id: Uuid::new_v4(),
            display_name: name.to_string(),
            score: 0,
            joined_at: base + Duration::seconds(i as i64),
            is_connected: true,
        })
        .collect()
}

/// Waiting session hosted by the first participant.
pub fn create_session(host: &Participant, cycles: u32, now: DateTime<Utc>) -> Session {
    Session::new(Uuid::new_v4(), host.user_id, cycles, 80, now)
}

pub fn apply(session: &mut Session, transition: Transition) {
    assert_eq!(session.phase_kind(), transition.expected_phase);
    assert_eq!(session.version, transition.expected_version);
    *session = transition.next;
}

/// Moves the clock to the end of the current phase and applies whatever
/// the machine says is due then.
pub fn advance_past_timer(
    session: &mut Session,
    participants: &[Participant],
    bank: &WordBank,
    rng: &mut StdRng,
) -> Option<Transition> {
    let limit = timers::phase_limit(session)?;
    let now = session.phase_started_at + limit;
    let transition =
        SessionMachine::due_transition(session, participants, None, false, bank, rng, now)
            .expect("due transition");
    if let Some(transition) = &transition {
        apply(session, transition.clone());
    }
    transition
}

/// Starts the game and lets every timer run out until it finishes.
/// Returns the drawer of every turn in order.
pub fn play_full_game(
    session: &mut Session,
    participants: &[Participant],
    bank: &WordBank,
    rng: &mut StdRng,
) -> Vec<ParticipantId> {
    let start = SessionMachine::start_game(
        session,
        participants,
        session.host_id,
        bank,
        rng,
        session.phase_started_at,
    )
    .expect("start game");
    apply(session, start);

    let mut drawers = Vec::new();
    while session.phase_kind() != PhaseKind::Finished {
        if let Phase::Playing { drawer_id, .. } = &session.phase {
            drawers.push(*drawer_id);
        }
        advance_past_timer(session, participants, bank, rng).expect("a timed transition");
    }
    drawers
}

pub fn correct_guess(session: &Session, author: &Participant, at: DateTime<Utc>) -> ChatEntry {
    ChatEntry {
        id: Uuid::new_v4(),
        session_id: session.id,
        author_id: author.user_id,
        author_name: author.display_name.clone(),
        text: format!("{} guessed the word!", author.display_name),
        is_guess: true,
        is_correct: true,
        created_at: at,
    }
}

pub fn tracker_for(session: &Session, participants: &[Participant]) -> GuessTracker {
    GuessTracker::begin_round(session, participants).expect("session is playing")
}
