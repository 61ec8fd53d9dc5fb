pub mod chat_repository;
pub mod participant_repository;
pub mod session_repository;
pub mod stroke_repository;

pub use chat_repository::{ChatRepository, GuessAward};
pub use participant_repository::ParticipantRepository;
pub use session_repository::{SessionRepository, TransitionOutcome};
pub use stroke_repository::StrokeRepository;
