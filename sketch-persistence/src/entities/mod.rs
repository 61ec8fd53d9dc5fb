pub mod chat_entries;
pub mod participants;
pub mod prelude;
pub mod sessions;
pub mod strokes;
