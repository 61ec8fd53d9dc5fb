pub mod drawing;
pub mod errors;
pub mod feed;
pub mod messages;
pub mod participant;
pub mod session;

// Re-export all types
pub use drawing::*;
pub use errors::*;
pub use feed::*;
pub use messages::*;
pub use participant::*;
pub use session::*;

pub type SessionId = uuid::Uuid;
pub type ParticipantId = uuid::Uuid;
pub type MessageId = uuid::Uuid;
pub type PathId = uuid::Uuid;
pub type StrokeId = i64;
