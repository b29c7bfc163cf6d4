//! Application configuration.
//!
//! Configuration is a single YAML file, deserialized into [`DocentConfig`].
//! Every knob has an explicit default so a missing file or a sparse file
//! still yields a fully usable configuration. The file normally lives under
//! the per-platform config directory (see [`crate::config_dir`]), e.g.
//! `~/.config/docent/config.yaml` on Linux.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ConfigError;

/// Fallback system prompt when the configured prompt file is absent.
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a documentation assistant. Answer questions using only the provided context.";

/// Runtime configuration for indexing, retrieval, generation, and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocentConfig {
    /// Directory holding the documents to index.
    pub docs_dir: PathBuf,

    /// Path stem for the persisted index artifact. The cache writes
    /// `<index_path>.yaml` (metadata) and `<index_path>.hnsw` (ANN index).
    pub index_path: PathBuf,

    /// Optional file with the system prompt; a built-in default applies
    /// when the file is absent.
    pub system_prompt_path: PathBuf,

    /// Maximum chunk size in bytes.
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in bytes. Must be < `chunk_size`.
    pub chunk_overlap: usize,

    /// Dimensionality of the embedding vectors (384 for all-MiniLM-L6-v2).
    pub embedding_dimension: usize,

    /// Number of chunks retrieved per query.
    pub top_k: usize,

    /// Model identifier requested from the generative backend.
    pub model: String,

    /// Base URL of the Ollama server.
    pub backend_base_url: String,

    /// Sampling temperature, passed through to the backend.
    pub temperature: f32,

    /// Context window size (`num_ctx`), passed through to the backend.
    pub context_window: u32,

    /// Maximum tokens to generate (`num_predict`), passed through.
    pub max_output_tokens: u32,

    /// Repetition penalty (`repeat_penalty`), passed through.
    pub repeat_penalty: f32,

    /// Per-request timeout for generation calls, in seconds.
    pub request_timeout_secs: u64,

    /// Host to bind the web service to.
    pub host: String,

    /// Port for the web service.
    pub port: u16,

    /// Sessions inactive longer than this are removed by the sweep task.
    pub session_max_age_secs: u64,

    /// Interval between sweep runs.
    pub sweep_interval_secs: u64,

    /// Display name reported by the health endpoint and the console banner.
    pub chatbot_name: String,
}

impl Default for DocentConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("training-data"),
            index_path: PathBuf::from("data/index"),
            system_prompt_path: PathBuf::from("system_prompt.txt"),
            chunk_size: 500,
            chunk_overlap: 50,
            embedding_dimension: 384,
            top_k: 5,
            model: "qwen3:1.7b".to_string(),
            backend_base_url: "http://localhost:11434".to_string(),
            temperature: 0.1,
            context_window: 4096,
            max_output_tokens: 1024,
            repeat_penalty: 1.1,
            request_timeout_secs: 300,
            host: "127.0.0.1".to_string(),
            port: 8080,
            session_max_age_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
            chatbot_name: "Docent".to_string(),
        }
    }
}

impl DocentConfig {
    /// Check the cross-field constraints the chunker and retriever rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding_dimension must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Read the system prompt file, falling back to the built-in default.
    pub fn system_prompt(&self) -> String {
        match fs::read_to_string(&self.system_prompt_path) {
            Ok(prompt) => prompt,
            Err(_) => {
                warn!(
                    path = %self.system_prompt_path.display(),
                    "system prompt file not found, using the default prompt"
                );
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<DocentConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DocentConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
docs_dir: "docs"
model: "llama3.2:1b"
top_k: 3
chunk_size: 400
chunk_overlap: 40
port: 9090
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.docs_dir, PathBuf::from("docs"));
        assert_eq!(config.model, "llama3.2:1b");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.port, 9090);
        // Unspecified fields keep their defaults.
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.context_window, 4096);
    }

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Path::new("non/existent/path"));
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path());
        assert!(config.is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_ge_size() {
        let config = DocentConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..DocentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let config = DocentConfig {
            top_k: 0,
            ..DocentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(DocentConfig::default().validate().is_ok());
    }
}
