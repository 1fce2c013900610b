//! Photoscribe: AI photo analysis pipeline.
//!
//! Photos are enqueued for analysis, dispatched to external AI vision
//! providers by a worker pool, and their normalized results committed to a
//! shared SQLite store that polling consumers read. Every run, successful or
//! not, is recorded in an append-only per-photo history.

pub mod allowlist;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod llm;
pub mod logging;
pub mod poll;
pub mod validator;
