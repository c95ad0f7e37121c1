//! subforge library crate.
//!
//! Upload a video, transcribe it, edit the subtitles and export burned-in
//! video. Long-running work goes through a file-backed, crash-recoverable job
//! pipeline; this crate exposes it for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
