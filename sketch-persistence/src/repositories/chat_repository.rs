use anyhow::Result;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, SqlErr,
    TransactionTrait, sea_query::Expr,
};
use sketch_types::{ChatEntry, SessionId};

use crate::entities::{chat_entries, participants, prelude::*};

/// Points for a correct guess and the turn they were earned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuessAward {
    pub turn_index: u32,
    pub points: u32,
}

pub struct ChatRepository {
    db: DatabaseConnection,
}

impl ChatRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_entry(model: chat_entries::Model) -> ChatEntry {
        ChatEntry {
            id: model.id,
            session_id: model.session_id,
            author_id: model.author_id,
            author_name: model.author_name,
            text: model.text,
            is_guess: model.is_guess,
            is_correct: model.is_correct,
            created_at: model.created_at,
        }
    }

    /// Stores `entry` and credits the award to its author in one database
    /// transaction. Returns false and changes nothing when the message id
    /// was already stored, or when the author already scored this turn.
    pub async fn record(&self, entry: &ChatEntry, award: Option<GuessAward>) -> Result<bool> {
        let solved_turn = award.map(|a| i32::try_from(a.turn_index)).transpose()?;
        let txn = self.db.begin().await?;

        if ChatEntries::find_by_id(entry.id).one(&txn).await?.is_some() {
            txn.rollback().await?;
            return Ok(false);
        }
        if let Some(turn) = solved_turn {
            let scored = ChatEntries::find()
                .filter(chat_entries::Column::SessionId.eq(entry.session_id))
                .filter(chat_entries::Column::AuthorId.eq(entry.author_id))
                .filter(chat_entries::Column::SolvedTurn.eq(turn))
                .one(&txn)
                .await?;
            if scored.is_some() {
                txn.rollback().await?;
                return Ok(false);
            }
        }

        let model = chat_entries::ActiveModel {
            id: Set(entry.id),
            session_id: Set(entry.session_id),
            author_id: Set(entry.author_id),
            author_name: Set(entry.author_name.clone()),
            text: Set(entry.text.clone()),
            is_guess: Set(entry.is_guess),
            is_correct: Set(entry.is_correct),
            solved_turn: Set(solved_turn),
            created_at: Set(entry.created_at),
        };
        // A peer on another connection can still win between the checks and here.
        if let Err(e) = ChatEntries::insert(model).exec(&txn).await {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                txn.rollback().await?;
                return Ok(false);
            }
            return Err(e.into());
        }

        if let Some(award) = award.filter(|a| a.points > 0) {
            Participants::update_many()
                .col_expr(
                    participants::Column::Score,
                    Expr::col(participants::Column::Score).add(i32::try_from(award.points)?),
                )
                .filter(participants::Column::SessionId.eq(entry.session_id))
                .filter(participants::Column::UserId.eq(entry.author_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(true)
    }

    /// Session chat, oldest first.
    pub async fn list(&self, session_id: SessionId) -> Result<Vec<ChatEntry>> {
        let models = ChatEntries::find()
            .filter(chat_entries::Column::SessionId.eq(session_id))
            .all(&self.db)
            .await?;

        let mut entries: Vec<_> = models.into_iter().map(Self::model_to_entry).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}
