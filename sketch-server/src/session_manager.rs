use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sketch_core::{
    CanvasReplica, DepartureWatch, GuessTracker, Raster, ScoringEngine, SessionMachine,
    SketchError, SketchResult, Transition, TransitionReason, WordBank, authorize_drawer,
};
use sketch_persistence::{DatabaseManager, GuessAward, TransitionOutcome};
use sketch_types::{
    BroadcastEvent, CanvasSize, ChangeNotice, ChatEntry, FeedRecord, MessageId, NewStroke,
    Participant, ParticipantId, PathId, Phase, PhaseKind, Session, SessionId, SessionSnapshot,
    Stroke, StrokeShape, Tool,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change_feed::ChangeFeed;
use crate::config::SessionSettings;

/// Logs a store failure and turns it into the transient error kind.
fn store<T>(result: anyhow::Result<T>) -> SketchResult<T> {
    result.map_err(|e| {
        warn!("Store call failed: {:#}", e);
        SketchError::transient(e)
    })
}

/// A lost transition race is success for the caller: the winner's change
/// is already on the feed.
fn settled(result: SketchResult<Session>) -> SketchResult<Option<Session>> {
    match result {
        Ok(session) => Ok(Some(session)),
        Err(e) if e.is_success() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Hosts sessions: every action a peer can take enters here, and every
/// phase change goes through the guarded store update.
pub struct SessionManager {
    db: DatabaseManager,
    feed: Arc<ChangeFeed>,
    words: Arc<WordBank>,
    settings: SessionSettings,
    trackers: DashMap<SessionId, GuessTracker>,
    departures: Mutex<DepartureWatch>,
}

impl SessionManager {
    pub fn new(
        db: DatabaseManager,
        feed: Arc<ChangeFeed>,
        words: WordBank,
        settings: SessionSettings,
    ) -> Self {
        Self {
            db,
            feed,
            words: Arc::new(words),
            settings,
            trackers: DashMap::new(),
            departures: Mutex::new(DepartureWatch::default()),
        }
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        self.feed.clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.settings.canvas_width, self.settings.canvas_height)
    }

    async fn load_session(&self, session_id: SessionId) -> SketchResult<Session> {
        store(self.db.sessions().find(session_id).await)?
            .ok_or_else(|| SketchError::DataAbsent(format!("session {} not found", session_id)))
    }

    async fn load_roster(&self, session_id: SessionId) -> SketchResult<Vec<Participant>> {
        store(self.db.participants().list(session_id).await)
    }

    async fn require_participant(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
    ) -> SketchResult<Participant> {
        store(self.db.participants().find(session_id, actor).await)?
            .ok_or(SketchError::InvalidActor)
    }

    /// Room-creation collaborator: a fresh `Waiting` session with the host
    /// already on the roster.
    pub async fn create_session(
        &self,
        host_id: ParticipantId,
        display_name: &str,
        cycles_total: Option<u32>,
        round_duration_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> SketchResult<Session> {
        let cycles = cycles_total.unwrap_or(self.settings.cycles_total);
        let duration = round_duration_seconds.unwrap_or(self.settings.round_duration_seconds);
        SessionMachine::validate_settings(cycles, duration)?;

        let session = Session::new(Uuid::new_v4(), host_id, cycles, duration, now);
        let session = store(self.db.sessions().create(&session).await)?;
        store(
            self.db
                .participants()
                .join(session.id, host_id, display_name, now)
                .await,
        )?;

        info!("Created session {} hosted by {}", session.id, host_id);
        Ok(session)
    }

    /// Adds (or reconnects) a participant and returns what they need to render.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: ParticipantId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> SketchResult<SessionSnapshot> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SketchError::InvalidInput("display name is empty".to_string()));
        }
        self.load_session(session_id).await?;

        let (participant, is_new) = store(
            self.db
                .participants()
                .join(session_id, user_id, display_name, now)
                .await,
        )?;

        if let Some(mut tracker) = self.trackers.get_mut(&session_id) {
            tracker.participant_joined(user_id);
        }

        let notice = if is_new {
            info!("{} joined session {}", participant.display_name, session_id);
            ChangeNotice::insert(FeedRecord::Participant(participant))
        } else {
            info!("{} rejoined session {}", participant.display_name, session_id);
            ChangeNotice::update(FeedRecord::Participant(participant))
        };
        self.feed.publish_change(session_id, notice);

        self.snapshot(session_id, user_id, now).await
    }

    /// Host starts the game with the current roster.
    pub async fn start_game(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        now: DateTime<Utc>,
    ) -> SketchResult<Option<Session>> {
        let session = self.load_session(session_id).await?;
        let roster = self.load_roster(session_id).await?;

        let transition = {
            let mut rng = rand::rng();
            SessionMachine::start_game(&session, &roster, actor, &self.words, &mut rng, now)?
        };
        settled(self.apply(transition).await)
    }

    pub async fn choose_word(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        word: &str,
        now: DateTime<Utc>,
    ) -> SketchResult<Option<Session>> {
        let session = self.load_session(session_id).await?;
        let transition = SessionMachine::choose_word(&session, actor, word, now)?;
        settled(self.apply(transition).await)
    }

    /// Chat and guessing share one input. Returns the stored entry, or
    /// `None` when the message was dropped or was a replay.
    pub async fn send_guess_or_chat(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        message_id: Option<MessageId>,
        text: &str,
        now: DateTime<Utc>,
    ) -> SketchResult<Option<ChatEntry>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SketchError::InvalidInput("message is empty".to_string()));
        }
        let session = self.load_session(session_id).await?;
        let author = self.require_participant(session_id, actor).await?;

        let mut entry = ChatEntry {
            id: message_id.unwrap_or_else(Uuid::new_v4),
            session_id,
            author_id: actor,
            author_name: author.display_name.clone(),
            text: text.to_string(),
            is_guess: false,
            is_correct: false,
            created_at: now,
        };
        let mut award = None;

        if let Phase::Playing { drawer_id, word } = &session.phase {
            let roster = self.load_roster(session_id).await?;
            let already_solved = actor == *drawer_id
                || self.tracker_for(&session, &roster).await?.has_solved(actor);

            if already_solved {
                if ScoringEngine::reveals_word(text, word) {
                    debug!("Dropped message from {} that reveals the word", actor);
                    return Ok(None);
                }
            } else {
                entry.is_guess = true;
                if ScoringEngine::is_correct_guess(text, word) {
                    entry.is_correct = true;
                    entry.text = ScoringEngine::solved_announcement(&author.display_name);
                    award = Some(GuessAward {
                        turn_index: session.turn_index,
                        points: ScoringEngine::points_for_guess(
                            session.round_duration_seconds,
                            session.phase_started_at,
                            now,
                        ),
                    });
                } else if ScoringEngine::reveals_word(text, word) {
                    // Near misses like a plural would give the answer away.
                    entry.text = ScoringEngine::redact_word(text, word);
                    if ScoringEngine::reveals_word(&entry.text, word) {
                        debug!("Dropped guess from {} that reveals the word", actor);
                        return Ok(None);
                    }
                }
            }
        }

        let recorded = store(self.db.chat().record(&entry, award).await)?;
        if !recorded {
            debug!("Chat message {} already recorded or already scored", entry.id);
            return Ok(None);
        }
        self.feed
            .publish_change(session_id, ChangeNotice::insert(FeedRecord::Chat(entry.clone())));

        if entry.is_correct {
            info!(
                "{} solved the word in session {} for {} points",
                author.display_name,
                session_id,
                award.map_or(0, |a| a.points)
            );
            if let Some(mut tracker) = self.trackers.get_mut(&session_id) {
                tracker.observe(&entry);
            }
            if let Some(updated) = store(self.db.participants().find(session_id, actor).await)? {
                self.feed.publish_change(
                    session_id,
                    ChangeNotice::update(FeedRecord::Participant(updated)),
                );
            }
            // Last guesser in ends the round without waiting for a tick.
            self.tick(session_id, now).await?;
        }

        Ok(Some(entry))
    }

    /// Appends a completed stroke from the current drawer.
    pub async fn draw_stroke(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        path_id: Option<PathId>,
        shape: StrokeShape,
        now: DateTime<Utc>,
    ) -> SketchResult<Stroke> {
        let session = self.load_session(session_id).await?;
        authorize_drawer(&session, actor)?;
        shape
            .validate(self.canvas())
            .map_err(SketchError::InvalidInput)?;
        if shape.tool() == Tool::Fill && !self.settings.allow_fill_strokes {
            return Err(SketchError::InvalidInput(
                "the fill tool is no longer supported".to_string(),
            ));
        }

        let stroke = NewStroke {
            session_id,
            author_id: actor,
            path_id,
            shape,
        };
        let stroke = store(self.db.strokes().append(&stroke, now).await)?;
        self.feed
            .publish_change(session_id, ChangeNotice::insert(FeedRecord::Stroke(stroke.clone())));
        Ok(stroke)
    }

    /// Relays live ink from the drawer to everyone else in the session.
    pub async fn broadcast_ink(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        event: BroadcastEvent,
    ) -> SketchResult<()> {
        let session = self.load_session(session_id).await?;
        authorize_drawer(&session, actor)?;
        if event.drawer_id() != Some(actor) {
            return Err(SketchError::InvalidActor);
        }
        event
            .validate(self.canvas())
            .map_err(SketchError::InvalidInput)?;

        self.feed.publish_ephemeral(session_id, Some(actor), event);
        Ok(())
    }

    /// Removes the drawer's most recent stroke.
    pub async fn undo(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
    ) -> SketchResult<Option<i64>> {
        let session = self.load_session(session_id).await?;
        authorize_drawer(&session, actor)?;

        let removed = store(self.db.strokes().delete_latest(session_id).await)?;
        if let Some(stroke_id) = removed {
            self.feed.publish_change(
                session_id,
                ChangeNotice::delete(FeedRecord::StrokesRemoved {
                    session_id,
                    stroke_id: Some(stroke_id),
                }),
            );
            self.feed.publish_ephemeral(
                session_id,
                Some(actor),
                BroadcastEvent::Undo { drawer_id: actor },
            );
        }
        Ok(removed)
    }

    /// Wipes the canvas for the current round.
    pub async fn clear(&self, session_id: SessionId, actor: ParticipantId) -> SketchResult<u64> {
        let session = self.load_session(session_id).await?;
        authorize_drawer(&session, actor)?;

        let removed = store(self.db.strokes().delete_by_session(session_id).await)?;
        self.feed.publish_change(
            session_id,
            ChangeNotice::delete(FeedRecord::StrokesRemoved {
                session_id,
                stroke_id: None,
            }),
        );
        self.feed.publish_ephemeral(
            session_id,
            Some(actor),
            BroadcastEvent::Clear { drawer_id: actor },
        );
        Ok(removed)
    }

    /// Explicit leave: off the roster, turn order recomputed from who remains.
    pub async fn leave(
        &self,
        session_id: SessionId,
        actor: ParticipantId,
        now: DateTime<Utc>,
    ) -> SketchResult<()> {
        let participant = self.require_participant(session_id, actor).await?;
        if !store(self.db.participants().leave(session_id, actor).await)? {
            return Ok(());
        }

        if let Some(mut tracker) = self.trackers.get_mut(&session_id) {
            tracker.participant_left(actor);
        }
        info!("{} left session {}", participant.display_name, session_id);
        self.feed.publish_change(
            session_id,
            ChangeNotice::delete(FeedRecord::Participant(participant)),
        );

        self.tick(session_id, now).await?;
        Ok(())
    }

    /// Socket dropped without a leave: keep the seat, mark it offline.
    pub async fn disconnect(&self, session_id: SessionId, actor: ParticipantId) -> SketchResult<()> {
        if let Some(participant) = store(
            self.db
                .participants()
                .set_connected(session_id, actor, false)
                .await,
        )? {
            self.feed.publish_change(
                session_id,
                ChangeNotice::update(FeedRecord::Participant(participant)),
            );
        }
        Ok(())
    }

    /// Re-derives timers from the persisted session and applies whichever
    /// transition is due. Safe to call from any number of peers at once.
    pub async fn tick(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> SketchResult<Option<Session>> {
        let session = self.load_session(session_id).await?;
        if !session.phase_kind().is_active() {
            self.departures.lock().await.forget(session_id);
            self.trackers.remove(&session_id);
            return Ok(None);
        }

        let roster = self.load_roster(session_id).await?;
        let understaffed = self.departures.lock().await.observe(&session, &roster, now);
        let tracker = match session.phase_kind() {
            PhaseKind::Playing => Some(self.tracker_for(&session, &roster).await?),
            _ => None,
        };

        let transition = {
            let mut rng = rand::rng();
            SessionMachine::due_transition(
                &session,
                &roster,
                tracker.as_ref(),
                understaffed,
                &self.words,
                &mut rng,
                now,
            )?
        };

        match transition {
            Some(transition) => settled(self.apply(transition).await),
            None => Ok(None),
        }
    }

    /// One sweep over every session somebody is watching. Returns how many
    /// transitions this peer won.
    pub async fn tick_active(&self, now: DateTime<Utc>) -> usize {
        let mut applied = 0;
        for session_id in self.feed.active_sessions() {
            match self.tick(session_id, now).await {
                Ok(Some(_)) => applied += 1,
                Ok(None) => {}
                Err(e) => warn!("Tick for session {} failed: {}", session_id, e),
            }
        }
        applied
    }

    /// Guess tracker for the current drawing phase, rebuilt from chat when
    /// the cached one belongs to an earlier phase.
    async fn tracker_for(
        &self,
        session: &Session,
        roster: &[Participant],
    ) -> SketchResult<GuessTracker> {
        if let Some(tracker) = self.trackers.get(&session.id) {
            if tracker.phase_started_at() == session.phase_started_at {
                return Ok(tracker.clone());
            }
        }

        let chat = store(self.db.chat().list(session.id).await)?;
        let tracker = GuessTracker::rebuild(session, roster, &chat).ok_or(SketchError::WrongPhase {
            phase: session.phase_kind(),
        })?;
        self.trackers.insert(session.id, tracker.clone());
        Ok(tracker)
    }

    /// Applies a transition through the conditional update.
    async fn apply(&self, transition: Transition) -> SketchResult<Session> {
        let outcome = store(self.db.sessions().apply_transition(&transition).await)?;
        let session = match outcome {
            TransitionOutcome::Applied(session) => session,
            TransitionOutcome::ConflictLost => {
                debug!(
                    "Session {} already moved on from {}",
                    transition.session_id, transition.expected_phase
                );
                return Err(SketchError::ConflictLost);
            }
        };

        info!(
            "Session {} {} -> {} ({})",
            session.id,
            transition.expected_phase,
            session.phase_kind(),
            transition.reason
        );
        if transition.reason == TransitionReason::NotEnoughPlayers {
            self.departures.lock().await.forget(session.id);
        }
        self.trackers.remove(&session.id);

        self.feed.publish_change(
            session.id,
            ChangeNotice::update(FeedRecord::Session(session.clone())),
        );
        if transition.clear_strokes {
            self.feed.publish_change(
                session.id,
                ChangeNotice::delete(FeedRecord::StrokesRemoved {
                    session_id: session.id,
                    stroke_id: None,
                }),
            );
        }
        self.feed.publish_ephemeral(
            session.id,
            None,
            BroadcastEvent::PhaseChanged {
                session_id: session.id,
                phase: session.phase_kind(),
                turn_index: session.turn_index,
                phase_started_at: session.phase_started_at,
            },
        );
        Ok(session)
    }

    /// Full state for `viewer`, with the word hidden unless they draw.
    pub async fn snapshot(
        &self,
        session_id: SessionId,
        viewer: ParticipantId,
        now: DateTime<Utc>,
    ) -> SketchResult<SessionSnapshot> {
        let session = self.load_session(session_id).await?;
        let participants = self.load_roster(session_id).await?;
        let chat = store(self.db.chat().list(session_id).await)?;
        let strokes = self.strokes(session_id).await?;

        Ok(SessionSnapshot {
            session,
            participants,
            chat,
            strokes,
            server_time: now,
        }
        .redacted_for(viewer))
    }

    pub async fn strokes(&self, session_id: SessionId) -> SketchResult<Vec<Stroke>> {
        store(self.db.strokes().list_by_session(session_id).await)
    }

    /// Renders the durable history the way a freshly attached viewer would.
    /// Rasterising runs on the blocking pool.
    pub async fn render_canvas(&self, session_id: SessionId) -> SketchResult<Raster> {
        let session = self.load_session(session_id).await?;
        let history = self.strokes(session_id).await?;
        let canvas = self.canvas();

        tokio::task::spawn_blocking(move || {
            let mut replica =
                CanvasReplica::new(session_id, Uuid::nil(), canvas.width, canvas.height);
            replica.sync_session(&session);
            replica.attach(history);
            replica.durable_raster().clone()
        })
        .await
        .map_err(|e| {
            warn!("Canvas render for session {} failed: {}", session_id, e);
            SketchError::transient(e)
        })
    }
}
