use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use sketch_types::{NewStroke, SessionId, Stroke, StrokeId, StrokeShape};
use tracing::warn;

use crate::entities::{prelude::*, strokes};

pub struct StrokeRepository {
    db: DatabaseConnection,
}

impl StrokeRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Decodes a stored row. Rows written by older clients (unknown tool
    /// tags, malformed payloads) come back as `None`.
    fn model_to_stroke(model: strokes::Model) -> Option<Stroke> {
        match serde_json::from_str::<StrokeShape>(&model.payload) {
            Ok(shape) => Some(Stroke {
                id: model.id,
                session_id: model.session_id,
                author_id: model.author_id,
                path_id: model.path_id,
                shape,
                created_at: model.created_at,
            }),
            Err(e) => {
                warn!(
                    "Skipping stroke {} ({}) in session {}: {}",
                    model.id, model.tool, model.session_id, e
                );
                None
            }
        }
    }

    pub async fn append(&self, stroke: &NewStroke, now: DateTime<Utc>) -> Result<Stroke> {
        let model = strokes::ActiveModel {
            id: NotSet,
            session_id: Set(stroke.session_id),
            author_id: Set(stroke.author_id),
            path_id: Set(stroke.path_id),
            tool: Set(stroke.shape.tool().as_str().to_string()),
            payload: Set(serde_json::to_string(&stroke.shape)?),
            created_at: Set(now),
        };
        let result = Strokes::insert(model).exec(&self.db).await?;

        Ok(Stroke {
            id: result.last_insert_id,
            session_id: stroke.session_id,
            author_id: stroke.author_id,
            path_id: stroke.path_id,
            shape: stroke.shape.clone(),
            created_at: now,
        })
    }

    /// Full history in replay order.
    pub async fn list_by_session(&self, session_id: SessionId) -> Result<Vec<Stroke>> {
        let models = Strokes::find()
            .filter(strokes::Column::SessionId.eq(session_id))
            .order_by_asc(strokes::Column::Id)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().filter_map(Self::model_to_stroke).collect())
    }

    pub async fn delete_by_session(&self, session_id: SessionId) -> Result<u64> {
        let result = Strokes::delete_many()
            .filter(strokes::Column::SessionId.eq(session_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_by_id(&self, session_id: SessionId, stroke_id: StrokeId) -> Result<bool> {
        let result = Strokes::delete_many()
            .filter(strokes::Column::SessionId.eq(session_id))
            .filter(strokes::Column::Id.eq(stroke_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Undo: removes the newest stroke of the session, if any.
    pub async fn delete_latest(&self, session_id: SessionId) -> Result<Option<StrokeId>> {
        let latest = Strokes::find()
            .filter(strokes::Column::SessionId.eq(session_id))
            .order_by_desc(strokes::Column::Id)
            .one(&self.db)
            .await?;

        let Some(latest) = latest else {
            return Ok(None);
        };
        let removed = self.delete_by_id(session_id, latest.id).await?;
        Ok(removed.then_some(latest.id))
    }
}
