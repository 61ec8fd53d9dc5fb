use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::{Set, Unchanged},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use sketch_types::{Participant, ParticipantId, SessionId, sort_by_join_order};

use crate::entities::{participants, prelude::*};

pub struct ParticipantRepository {
    db: DatabaseConnection,
}

impl ParticipantRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_participant(model: participants::Model) -> Participant {
        Participant {
            user_id: model.user_id,
            display_name: model.display_name,
            score: model.score.max(0) as u32,
            joined_at: model.joined_at,
            is_connected: model.is_connected,
        }
    }

    pub async fn find(
        &self,
        session_id: SessionId,
        user_id: ParticipantId,
    ) -> Result<Option<Participant>> {
        let model = Participants::find_by_id((session_id, user_id))
            .one(&self.db)
            .await?;
        Ok(model.map(Self::model_to_participant))
    }

    /// Adds the user to the roster, or reconnects them if already there.
    /// A rejoin keeps the original score and join time. Returns the row and
    /// whether it was newly created.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: ParticipantId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Participant, bool)> {
        if let Some(existing) = Participants::find_by_id((session_id, user_id))
            .one(&self.db)
            .await?
        {
            let updated = participants::ActiveModel {
                session_id: Unchanged(existing.session_id),
                user_id: Unchanged(existing.user_id),
                display_name: Set(display_name.to_string()),
                score: Unchanged(existing.score),
                joined_at: Unchanged(existing.joined_at),
                is_connected: Set(true),
            };
            let model = Participants::update(updated).exec(&self.db).await?;
            return Ok((Self::model_to_participant(model), false));
        }

        let model = participants::ActiveModel {
            session_id: Set(session_id),
            user_id: Set(user_id),
            display_name: Set(display_name.to_string()),
            score: Set(0),
            joined_at: Set(now),
            is_connected: Set(true),
        };
        Participants::insert(model).exec(&self.db).await?;

        let created = self.find(session_id, user_id).await?.ok_or_else(|| {
            anyhow::anyhow!("Failed to retrieve participant {} after join", user_id)
        })?;
        Ok((created, true))
    }

    /// Removes the user from the roster. Returns false if they were not on it.
    pub async fn leave(&self, session_id: SessionId, user_id: ParticipantId) -> Result<bool> {
        let result = Participants::delete_by_id((session_id, user_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn set_connected(
        &self,
        session_id: SessionId,
        user_id: ParticipantId,
        is_connected: bool,
    ) -> Result<Option<Participant>> {
        let result = Participants::update_many()
            .set(participants::ActiveModel {
                is_connected: Set(is_connected),
                ..Default::default()
            })
            .filter(participants::Column::SessionId.eq(session_id))
            .filter(participants::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find(session_id, user_id).await
    }

    /// Roster in turn order.
    pub async fn list(&self, session_id: SessionId) -> Result<Vec<Participant>> {
        let models = Participants::find()
            .filter(participants::Column::SessionId.eq(session_id))
            .all(&self.db)
            .await?;

        let mut roster: Vec<_> = models.into_iter().map(Self::model_to_participant).collect();
        sort_by_join_order(&mut roster);
        Ok(roster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::setup_test_db;
    use crate::repositories::{ChatRepository, GuessAward};
    use chrono::Duration;
    use sketch_types::ChatEntry;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_join_and_list_in_join_order() {
        let repo = ParticipantRepository::new(setup_test_db().await);
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let (bob, bob_new) = repo
            .join(session_id, Uuid::new_v4(), "Bob", now + Duration::seconds(5))
            .await
            .unwrap();
        let (alice, _) = repo.join(session_id, Uuid::new_v4(), "Alice", now).await.unwrap();
        assert!(bob_new);

        let roster = repo.list(session_id).await.unwrap();
        assert_eq!(
            roster.iter().map(|p| p.user_id).collect::<Vec<_>>(),
            vec![alice.user_id, bob.user_id]
        );
        assert!(repo.list(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_keeps_score_and_join_time() {
        let db = setup_test_db().await;
        let repo = ParticipantRepository::new(db.clone());
        let chat = ChatRepository::new(db);
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let joined = Utc::now();

        repo.join(session_id, user_id, "Carol", joined).await.unwrap();
        let entry = ChatEntry {
            id: Uuid::new_v4(),
            session_id,
            author_id: user_id,
            author_name: "Carol".into(),
            text: "Carol guessed the word!".into(),
            is_guess: true,
            is_correct: true,
            created_at: joined,
        };
        chat.record(
            &entry,
            Some(GuessAward {
                turn_index: 1,
                points: 300,
            }),
        )
        .await
        .unwrap();
        repo.set_connected(session_id, user_id, false).await.unwrap();

        let (again, is_new) = repo
            .join(session_id, user_id, "Carol2", joined + Duration::minutes(2))
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.score, 300);
        assert_eq!(again.joined_at, joined);
        assert_eq!(again.display_name, "Carol2");
        assert!(again.is_connected);
    }

    #[tokio::test]
    async fn test_leave_and_set_connected() {
        let repo = ParticipantRepository::new(setup_test_db().await);
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        repo.join(session_id, user_id, "Dan", Utc::now()).await.unwrap();

        let offline = repo.set_connected(session_id, user_id, false).await.unwrap().unwrap();
        assert!(!offline.is_connected);

        assert!(repo.leave(session_id, user_id).await.unwrap());
        assert!(!repo.leave(session_id, user_id).await.unwrap());
        assert!(repo.set_connected(session_id, user_id, true).await.unwrap().is_none());
    }
}
