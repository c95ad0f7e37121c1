//! REST API server module.
//!
//! Provides HTTP endpoints for uploading projects, editing subtitles,
//! requesting exports and following job status.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
