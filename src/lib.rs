#![forbid(unsafe_code)]

//! Session-supervising HTTP/SSE front end for interactive agent processes.

pub mod agent;
pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod persistence;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
