//! Flat-file persistence.
//!
//! Both stores keep their full contents in memory and rewrite the backing
//! JSON file in full on every mutation through [`snapshot::write_json`].

pub mod history;
pub mod project_repo;
pub mod snapshot;

pub use history::HistoryStore;
pub use project_repo::{ProjectStore, ProjectUpdate};
