//! docent: a retrieval-augmented documentation chatbot.
//!
//! The pipeline: documents are loaded from a corpus directory, split into
//! overlapping chunks, embedded with a local sentence-transformer, and stored
//! in a persisted HNSW index. Queries retrieve the top-k chunks and an answer
//! is synthesized by iteratively refining against an Ollama backend. Sessions
//! and answers are served over REST + WebSocket, or through a console loop.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::ConfigError;

pub mod broadcast;
pub mod chat;
pub mod chunker;
pub mod commands;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod events;
pub mod index;
pub mod orchestrator;
pub mod retriever;
pub mod server;
pub mod session;
pub mod synthesizer;

/// Per-platform configuration directory (`~/.config/docent` on Linux).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let proj_dirs =
        ProjectDirs::from("com", "docent", "docent").ok_or(ConfigError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
