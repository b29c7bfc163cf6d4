//! Corpus loading.
//!
//! A [`ParserRegistry`] maps file extensions to [`DocumentParser`]
//! implementations and walks the corpus directory recursively. A document
//! that fails to parse is skipped with a warning; one bad file never aborts
//! ingestion.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::IngestionError;

/// A loaded document: raw text plus structured metadata.
///
/// Metadata always carries `source` (full path), `filename`, and `filetype`;
/// markdown front matter contributes additional keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

impl Document {
    fn new(text: String, path: &Path, filetype: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), Value::from(path.display().to_string()));
        metadata.insert(
            "filename".to_string(),
            Value::from(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
        );
        metadata.insert("filetype".to_string(), Value::from(filetype));
        Self { text, metadata }
    }
}

/// Turns one file into a [`Document`].
pub trait DocumentParser: Send + Sync {
    fn filetype(&self) -> &'static str;
    fn parse(&self, path: &Path) -> Result<Document, IngestionError>;
}

fn read_file(path: &Path) -> Result<String, IngestionError> {
    fs::read_to_string(path).map_err(|source| IngestionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Markdown parser that lifts YAML front matter into document metadata.
pub struct MarkdownParser;

impl MarkdownParser {
    /// Split `---\n...\n---\n` front matter from the body. Returns the raw
    /// front matter block (without delimiters) and the remaining text.
    fn split_front_matter(text: &str) -> Option<(&str, &str)> {
        let rest = text.strip_prefix("---\n")?;
        let end = rest.find("\n---\n")?;
        Some((&rest[..end], &rest[end + 5..]))
    }
}

impl DocumentParser for MarkdownParser {
    fn filetype(&self) -> &'static str {
        "markdown"
    }

    fn parse(&self, path: &Path) -> Result<Document, IngestionError> {
        let raw = read_file(path)?;
        let (front_matter, body) = match Self::split_front_matter(&raw) {
            Some((fm, body)) => (Some(fm), body),
            None => (None, raw.as_str()),
        };

        let mut document = Document::new(body.to_string(), path, self.filetype());
        if let Some(fm) = front_matter {
            let parsed: serde_yaml::Value =
                serde_yaml::from_str(fm).map_err(|source| IngestionError::FrontMatter {
                    path: path.to_path_buf(),
                    source,
                })?;
            if let serde_yaml::Value::Mapping(mapping) = parsed {
                for (key, value) in mapping {
                    let (Some(key), Ok(value)) = (key.as_str(), serde_json::to_value(&value))
                    else {
                        continue;
                    };
                    document.metadata.insert(key.to_string(), value);
                }
            }
        }
        Ok(document)
    }
}

/// Parser for plain-text formats; the file content is used verbatim.
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn filetype(&self) -> &'static str {
        "text"
    }

    fn parse(&self, path: &Path) -> Result<Document, IngestionError> {
        Ok(Document::new(read_file(path)?, path, self.filetype()))
    }
}

/// Extension → parser dispatch plus the recursive corpus walk.
pub struct ParserRegistry {
    parsers: BTreeMap<&'static str, Box<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// The built-in set: markdown plus common plain-text extensions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("md", Box::new(MarkdownParser));
        for ext in ["txt", "log", "adoc", "rst"] {
            registry.register(ext, Box::new(PlainTextParser));
        }
        registry
    }

    pub fn register(&mut self, extension: &'static str, parser: Box<dyn DocumentParser>) {
        self.parsers.insert(extension, parser);
    }

    /// Parse a single file, failing on unknown extensions.
    pub fn parse(&self, path: &Path) -> Result<Document, IngestionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref().and_then(|e| self.parsers.get(e)) {
            Some(parser) => parser.parse(path),
            None => Err(IngestionError::UnsupportedType {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Load every parseable document under `dir`, recursively.
    ///
    /// Files with no registered parser are ignored silently; files that fail
    /// to parse are skipped with a warning. A missing directory yields an
    /// empty corpus.
    pub fn load_corpus(&self, dir: &Path) -> Vec<Document> {
        let mut documents = Vec::new();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "corpus directory does not exist");
            return documents;
        }
        self.walk(dir, &mut documents);
        documents.sort_by(|a, b| {
            a.metadata
                .get("source")
                .and_then(|v| v.as_str())
                .cmp(&b.metadata.get("source").and_then(|v| v.as_str()))
        });
        documents
    }

    fn walk(&self, dir: &Path, documents: &mut Vec<Document>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "skipping unreadable directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, documents);
                continue;
            }
            let has_parser = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| self.parsers.contains_key(e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !has_parser {
                continue;
            }
            match self.parse(&path) {
                Ok(document) => documents.push(document),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping document"),
            }
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
