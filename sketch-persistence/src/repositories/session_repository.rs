use anyhow::{Result, anyhow};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use sketch_core::Transition;
use sketch_types::{Phase, PhaseKind, Session, SessionId};
use tracing::debug;

use crate::entities::{prelude::*, sessions, strokes};

/// Result of a guarded phase change.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Session),
    /// The session was no longer at the expected phase/version; someone
    /// else's transition won.
    ConflictLost,
}

fn to_column(value: u32, name: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("{} {} does not fit its column", name, value))
}

fn from_column(value: i32, name: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("stored {} {} is negative", name, value))
}

pub struct SessionRepository {
    db: DatabaseConnection,
}

impl SessionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_session(model: sessions::Model) -> Result<Session> {
        let kind = PhaseKind::parse(&model.phase)
            .ok_or_else(|| anyhow!("unknown phase '{}' for session {}", model.phase, model.id))?;
        let drawer = || {
            model
                .drawer_id
                .ok_or_else(|| anyhow!("session {} is {} without a drawer", model.id, kind))
        };
        let word = || {
            model
                .word
                .clone()
                .ok_or_else(|| anyhow!("session {} is {} without a word", model.id, kind))
        };

        let phase = match kind {
            PhaseKind::Waiting => Phase::Waiting,
            PhaseKind::ChoosingWord => Phase::ChoosingWord {
                drawer_id: drawer()?,
                choices: serde_json::from_str(&model.choices)?,
            },
            PhaseKind::Playing => Phase::Playing {
                drawer_id: drawer()?,
                word: word()?,
            },
            PhaseKind::RoundSummary => Phase::RoundSummary {
                drawer_id: drawer()?,
                word: word()?,
            },
            PhaseKind::Finished => Phase::Finished,
        };

        Ok(Session {
            id: model.id,
            host_id: model.host_id,
            phase,
            turn_index: from_column(model.turn_index, "turn_index")?,
            turns_per_cycle: from_column(model.turns_per_cycle, "turns_per_cycle")?,
            cycles_total: from_column(model.cycles_total, "cycles_total")?,
            round_duration_seconds: from_column(
                model.round_duration_seconds,
                "round_duration_seconds",
            )?,
            phase_started_at: model.phase_started_at,
            used_words: serde_json::from_str(&model.used_words)?,
            version: model.version,
            created_at: model.created_at,
        })
    }

    fn session_to_active_model(session: &Session) -> Result<sessions::ActiveModel> {
        let (drawer_id, word, choices) = match &session.phase {
            Phase::Waiting | Phase::Finished => (None, None, Vec::new()),
            Phase::ChoosingWord { drawer_id, choices } => (Some(*drawer_id), None, choices.clone()),
            Phase::Playing { drawer_id, word } | Phase::RoundSummary { drawer_id, word } => {
                (Some(*drawer_id), Some(word.clone()), Vec::new())
            }
        };

        Ok(sessions::ActiveModel {
            id: Set(session.id),
            host_id: Set(session.host_id),
            phase: Set(session.phase_kind().as_str().to_string()),
            drawer_id: Set(drawer_id),
            word: Set(word),
            choices: Set(serde_json::to_string(&choices)?),
            turn_index: Set(to_column(session.turn_index, "turn_index")?),
            turns_per_cycle: Set(to_column(session.turns_per_cycle, "turns_per_cycle")?),
            cycles_total: Set(to_column(session.cycles_total, "cycles_total")?),
            round_duration_seconds: Set(to_column(
                session.round_duration_seconds,
                "round_duration_seconds",
            )?),
            phase_started_at: Set(session.phase_started_at),
            used_words: Set(serde_json::to_string(&session.used_words)?),
            version: Set(session.version),
            created_at: Set(session.created_at),
        })
    }

    pub async fn create(&self, session: &Session) -> Result<Session> {
        let model = Self::session_to_active_model(session)?;
        Sessions::insert(model).exec(&self.db).await?;

        self.find(session.id)
            .await?
            .ok_or_else(|| anyhow!("Failed to retrieve created session"))
    }

    pub async fn find(&self, id: SessionId) -> Result<Option<Session>> {
        let model = Sessions::find_by_id(id).one(&self.db).await?;
        model.map(Self::model_to_session).transpose()
    }

    /// Ids of every session that is still in play.
    pub async fn list_active_ids(&self) -> Result<Vec<SessionId>> {
        let active = [
            PhaseKind::ChoosingWord,
            PhaseKind::Playing,
            PhaseKind::RoundSummary,
        ]
        .map(|kind| kind.as_str());

        let models = Sessions::find()
            .filter(sessions::Column::Phase.is_in(active))
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(|m| m.id).collect())
    }

    /// Applies `transition` only if the stored session still matches its
    /// expected phase and version. Leaving `Playing` deletes the round's
    /// strokes in the same database transaction.
    pub async fn apply_transition(&self, transition: &Transition) -> Result<TransitionOutcome> {
        let model = Self::session_to_active_model(&transition.next)?;
        let txn = self.db.begin().await?;

        let result = Sessions::update_many()
            .set(model)
            .filter(sessions::Column::Id.eq(transition.session_id))
            .filter(sessions::Column::Phase.eq(transition.expected_phase.as_str()))
            .filter(sessions::Column::Version.eq(transition.expected_version))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            txn.rollback().await?;
            debug!(
                "Transition {} -> {} for session {} lost the race",
                transition.expected_phase,
                transition.to_phase(),
                transition.session_id
            );
            return Ok(TransitionOutcome::ConflictLost);
        }

        if transition.clear_strokes {
            Strokes::delete_many()
                .filter(strokes::Column::SessionId.eq(transition.session_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(TransitionOutcome::Applied(transition.next.clone()))
    }
}
