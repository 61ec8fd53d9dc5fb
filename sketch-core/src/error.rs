use sketch_types::PhaseKind;
use thiserror::Error;

/// Failure taxonomy for every action entry point. Nothing here is fatal:
/// the worst case is a stalled phase that the next tick or refetch repairs.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("store or network call failed: {0}")]
    TransientIo(String),

    #[error("another peer already applied this transition")]
    ConflictLost,

    #[error("participant is not allowed to perform this action")]
    InvalidActor,

    #[error("cannot start or continue: {0}")]
    DataAbsent(String),

    #[error("action not valid while session is {phase}")]
    WrongPhase { phase: PhaseKind },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SketchError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        SketchError::TransientIo(err.to_string())
    }

    /// Losing a transition race means the session already moved on.
    pub fn is_success(&self) -> bool {
        matches!(self, SketchError::ConflictLost)
    }

    /// Rejected at the core boundary without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, SketchError::InvalidActor)
    }
}

pub type SketchResult<T> = Result<T, SketchError>;
