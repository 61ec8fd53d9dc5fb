pub mod canvas;
pub mod departure_watch;
pub mod drawing_sync;
pub mod error;
pub mod guess_tracker;
pub mod scoring;
pub mod session_machine;
pub mod timers;
pub mod word_bank;

// Re-export main components
pub use canvas::*;
pub use departure_watch::*;
pub use drawing_sync::*;
pub use error::*;
pub use guess_tracker::*;
pub use scoring::*;
pub use session_machine::*;
pub use timers::*;
pub use word_bank::*;
