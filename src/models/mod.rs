//! Domain models shared by the supervisor, persistence, and HTTP layers.

pub mod event;
pub mod project;
pub mod session;
