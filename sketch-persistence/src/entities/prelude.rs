pub use super::chat_entries::Entity as ChatEntries;
pub use super::participants::Entity as Participants;
pub use super::sessions::Entity as Sessions;
pub use super::strokes::Entity as Strokes;
