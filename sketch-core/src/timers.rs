use chrono::{DateTime, Duration, Utc};
use sketch_types::{PhaseKind, Session};

pub const WORD_CHOICE_SECONDS: i64 = 10;
pub const ROUND_SUMMARY_SECONDS: i64 = 5;

/// Length of the current phase, or `None` for phases without a timer.
///
/// The same `phase_started_at` anchors every timer; the phase decides
/// which limit applies.
pub fn phase_limit(session: &Session) -> Option<Duration> {
    match session.phase_kind() {
        PhaseKind::ChoosingWord => Some(Duration::seconds(WORD_CHOICE_SECONDS)),
        PhaseKind::Playing => Some(Duration::seconds(i64::from(
            session.round_duration_seconds,
        ))),
        PhaseKind::RoundSummary => Some(Duration::seconds(ROUND_SUMMARY_SECONDS)),
        PhaseKind::Waiting | PhaseKind::Finished => None,
    }
}

/// `max(0, limit - (now - phase_started_at))`. Recomputed on demand; never
/// stored, so a refresh or late join cannot extend a phase.
pub fn remaining(session: &Session, now: DateTime<Utc>) -> Option<Duration> {
    let limit = phase_limit(session)?;
    let elapsed = now - session.phase_started_at;
    Some((limit - elapsed).max(Duration::zero()))
}

pub fn is_elapsed(session: &Session, now: DateTime<Utc>) -> bool {
    remaining(session, now).is_some_and(|left| left <= Duration::zero())
}

/// Whole seconds left, rounded up, for countdown display.
pub fn remaining_display_seconds(session: &Session, now: DateTime<Utc>) -> Option<u32> {
    remaining(session, now).map(|left| {
        let millis = left.num_milliseconds().max(0);
        ((millis + 999) / 1000) as u32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketch_types::Phase;
    use uuid::Uuid;

    fn session_in(phase: Phase, started: DateTime<Utc>) -> Session {
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 2, 80, started);
        session.phase = phase;
        session.phase_started_at = started;
        session
    }

    #[test]
    fn test_playing_timer_derived_from_phase_start() {
        let start = Utc::now();
        let session = session_in(
            Phase::Playing {
                drawer_id: Uuid::new_v4(),
                word: "kite".into(),
            },
            start,
        );

        let later = start + Duration::seconds(30);
        assert_eq!(remaining(&session, later), Some(Duration::seconds(50)));
        assert!(!is_elapsed(&session, later));

        let past = start + Duration::seconds(95);
        assert_eq!(remaining(&session, past), Some(Duration::zero()));
        assert!(is_elapsed(&session, past));
    }

    #[test]
    fn test_same_anchor_different_limits() {
        let start = Utc::now();
        let choosing = session_in(
            Phase::ChoosingWord {
                drawer_id: Uuid::new_v4(),
                choices: vec![],
            },
            start,
        );
        let summary = session_in(
            Phase::RoundSummary {
                drawer_id: Uuid::new_v4(),
                word: "kite".into(),
            },
            start,
        );

        let at = start + Duration::seconds(6);
        assert!(!is_elapsed(&choosing, at));
        assert!(is_elapsed(&summary, at));
    }

    #[test]
    fn test_untimed_phases() {
        let session = session_in(Phase::Waiting, Utc::now());
        assert_eq!(remaining(&session, Utc::now()), None);
        assert!(!is_elapsed(&session, Utc::now() + Duration::days(1)));
    }

    #[test]
    fn test_display_rounds_up() {
        let start = Utc::now();
        let session = session_in(
            Phase::ChoosingWord {
                drawer_id: Uuid::new_v4(),
                choices: vec![],
            },
            start,
        );
        let at = start + Duration::milliseconds(8_500);
        assert_eq!(remaining_display_seconds(&session, at), Some(2));
    }
}
