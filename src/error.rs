//! Error types for every component boundary.
//!
//! Each stage of the pipeline owns a dedicated error type so callers are
//! forced to handle failure where it happens: per-document ingestion failures
//! are recovered locally, embedding/generation failures are converted into a
//! [`QueryError`] at the orchestrator, and only index corruption or a missing
//! backend at startup are allowed to abort the process.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine the platform config directory")]
    NoConfigDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A single document failed to load or parse. The corpus walk recovers from
/// these by skipping the document and logging its path.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no parser registered for {path}")]
    UnsupportedType { path: PathBuf },

    #[error("malformed front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The embedding model could not be loaded or failed to encode text.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to load the embedding model: {0}")]
    ModelLoad(String),

    #[error("failed to tokenize input: {0}")]
    Tokenize(String),

    #[error("embedding inference failed: {0}")]
    Inference(#[from] candle_core::Error),
}

/// Failures around the persisted vector index.
///
/// `Corrupt` is fatal to startup: an unreadable artifact must never be
/// silently rebuilt, because that would mask ambiguous corruption.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("persisted index at {path} is unreadable ({reason}); delete it to force a rebuild")]
    Corrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("vector index rejected chunk {id}: {reason}")]
    Build { id: usize, reason: String },

    #[error("failed to persist index artifact {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

/// The generative backend call failed, timed out, or returned garbage.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("generation backend returned a malformed response: {0}")]
    Malformed(String),

    #[error("model {model:?} is not available and could not be pulled: {reason}")]
    ModelUnavailable { model: String, reason: String },
}

/// Human-readable failure of a single query, produced at the orchestrator
/// boundary. Raw backend errors never cross this type.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl From<EmbeddingError> for QueryError {
    fn from(err: EmbeddingError) -> Self {
        Self {
            message: format!("failed to embed the query: {err}"),
        }
    }
}

impl From<GenerationError> for QueryError {
    fn from(err: GenerationError) -> Self {
        Self {
            message: format!("failed to generate an answer: {err}"),
        }
    }
}

/// Session registry failures, surfaced to clients as a not-found condition.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
}
