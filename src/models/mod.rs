//! Domain models shared by the queue, supervisor, and state store.

pub mod background;
pub mod job;
pub mod state;
