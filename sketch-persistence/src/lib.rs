pub mod connection;
pub mod entities;
pub mod repositories;

pub use repositories::{
    ChatRepository, GuessAward, ParticipantRepository, SessionRepository, StrokeRepository, TransitionOutcome,
};

use sea_orm::DatabaseConnection;

/// Owns the connection and hands out repositories over it.
#[derive(Clone)]
pub struct DatabaseManager {
    connection: DatabaseConnection,
}

impl DatabaseManager {
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn sessions(&self) -> SessionRepository {
        SessionRepository::new(self.connection.clone())
    }

    pub fn participants(&self) -> ParticipantRepository {
        ParticipantRepository::new(self.connection.clone())
    }

    pub fn chat(&self) -> ChatRepository {
        ChatRepository::new(self.connection.clone())
    }

    pub fn strokes(&self) -> StrokeRepository {
        StrokeRepository::new(self.connection.clone())
    }
}
