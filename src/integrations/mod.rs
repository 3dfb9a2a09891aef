//! External collaborators consumed by the job pipeline.

pub mod notes;
pub mod oauth;
pub mod stt;

pub use notes::{MarkdownNotes, NotesProvider};
pub use oauth::{AuthFlow, CommandAuthFlow};
pub use stt::{CommandTranscriber, Transcriber};
