//! Persisted vector index.
//!
//! [`VectorIndex`] pairs an HNSW approximate-nearest-neighbor index with the
//! chunks behind the vector ids. [`IndexCache`] decides between loading a
//! persisted artifact and building a fresh one from the corpus, and persists
//! builds atomically so a crash mid-write never leaves a half-index that the
//! next startup would mistake for a valid one.
//!
//! The artifact is two files sharing a path stem: `<stem>.hnsw` (binary index
//! dump) and `<stem>.yaml` (chunks, dimension, and corpus fingerprint). The
//! YAML file is written last and is the commit marker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::document::Document;
use crate::embedding::TextEmbedder;
use crate::error::IndexError;

/// Sha256 over the corpus text, stored in the artifact to detect a corpus
/// that changed since the index was built.
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut joined = String::new();
    for document in documents {
        joined.push_str(&document.text);
        joined.push('\u{1f}');
    }
    sha256::digest(joined)
}

/// An immutable, searchable index over a chunked corpus.
#[derive(Debug)]
pub struct VectorIndex {
    index: HNSWIndex<f32, usize>,
    chunks: Vec<Chunk>,
    dimension: usize,
    fingerprint: String,
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Nearest neighbors of `vector` as `(chunk_id, distance)` pairs,
    /// closest first.
    pub fn search(&self, vector: &[f32], k: usize) -> Vec<(usize, f32)> {
        self.index
            .search_nodes(vector, k)
            .into_iter()
            .filter_map(|(node, distance)| (*node.idx()).map(|id| (id, distance)))
            .collect()
    }
}

/// Serialized form of everything but the HNSW binary itself.
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    dimension: usize,
    fingerprint: String,
    chunks: Vec<Chunk>,
}

/// Load-or-build policy over the persisted artifact.
pub struct IndexCache {
    metadata_path: PathBuf,
    index_path: PathBuf,
    chunker: Chunker,
    embedder: Arc<dyn TextEmbedder>,
}

impl IndexCache {
    /// `path_stem` becomes `<stem>.yaml` + `<stem>.hnsw`.
    pub fn new(path_stem: &Path, chunker: Chunker, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            metadata_path: path_stem.with_extension("yaml"),
            index_path: path_stem.with_extension("hnsw"),
            chunker,
            embedder,
        }
    }

    /// Load the persisted index if the artifact exists, otherwise build from
    /// `documents` and persist. Existence of the metadata file alone decides;
    /// a stale fingerprint only warns.
    pub fn load_or_build(&self, documents: &[Document]) -> Result<VectorIndex, IndexError> {
        if self.metadata_path.exists() {
            let index = self.load()?;
            let current = corpus_fingerprint(documents);
            if index.fingerprint != current {
                warn!(
                    path = %self.metadata_path.display(),
                    "corpus has changed since the index was built; delete the artifact to rebuild"
                );
            }
            info!(chunks = index.len(), "loaded persisted index");
            return Ok(index);
        }
        let mut index = self.build(documents)?;
        self.persist(&mut index)?;
        info!(chunks = index.len(), "built and persisted index");
        Ok(index)
    }

    fn load(&self) -> Result<VectorIndex, IndexError> {
        let corrupt = |reason: String| IndexError::Corrupt {
            path: self.metadata_path.clone(),
            reason,
        };

        let yaml = fs::read_to_string(&self.metadata_path).map_err(|e| corrupt(e.to_string()))?;
        let snapshot: IndexSnapshot =
            serde_yaml::from_str(&yaml).map_err(|e| corrupt(e.to_string()))?;

        let index_path = self
            .index_path
            .to_str()
            .ok_or_else(|| corrupt("non-utf8 index path".to_string()))?;
        let index =
            HNSWIndex::load(index_path).map_err(|e| corrupt(format!("hnsw load: {e}")))?;

        Ok(VectorIndex {
            index,
            chunks: snapshot.chunks,
            dimension: snapshot.dimension,
            fingerprint: snapshot.fingerprint,
        })
    }

    fn build(&self, documents: &[Document]) -> Result<VectorIndex, IndexError> {
        let chunks = self.chunker.split(documents);
        info!(documents = documents.len(), chunks = chunks.len(), "building index");

        let vectors = chunks
            .par_iter()
            .map(|chunk| self.embedder.embed(&chunk.text))
            .collect::<Result<Vec<_>, _>>()?;

        let dimension = self.embedder.dimension();
        let mut index = HNSWIndex::new(dimension, &HNSWParams::default());
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            index.add(vector, chunk.id).map_err(|e| IndexError::Build {
                id: chunk.id,
                reason: e.to_string(),
            })?;
        }
        if !chunks.is_empty() {
            index
                .build(Metric::Euclidean)
                .map_err(|e| IndexError::Build {
                    id: 0,
                    reason: e.to_string(),
                })?;
        }

        Ok(VectorIndex {
            index,
            chunks,
            dimension,
            fingerprint: corpus_fingerprint(documents),
        })
    }

    /// Write `<stem>.hnsw` first, then commit by writing `<stem>.yaml`.
    /// Both writes go through a temp file + rename in the target directory.
    fn persist(&self, index: &mut VectorIndex) -> Result<(), IndexError> {
        let persist_err = |path: &Path, reason: String| IndexError::Persist {
            path: path.to_path_buf(),
            reason,
        };

        let parent = self
            .metadata_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| persist_err(parent, e.to_string()))?;

        let tmp_index = self.index_path.with_extension("hnsw.tmp");
        let tmp_index_str = tmp_index
            .to_str()
            .ok_or_else(|| persist_err(&tmp_index, "non-utf8 index path".to_string()))?;
        // hora's dump takes &mut self.
        index
            .index
            .dump(tmp_index_str)
            .map_err(|e| persist_err(&tmp_index, e.to_string()))?;
        fs::rename(&tmp_index, &self.index_path)
            .map_err(|e| persist_err(&self.index_path, e.to_string()))?;

        let snapshot = IndexSnapshot {
            dimension: index.dimension,
            fingerprint: index.fingerprint.clone(),
            chunks: index.chunks.clone(),
        };
        let yaml = serde_yaml::to_string(&snapshot)
            .map_err(|e| persist_err(&self.metadata_path, e.to_string()))?;
        let tmp_yaml = NamedTempFile::new_in(parent)
            .map_err(|e| persist_err(&self.metadata_path, e.to_string()))?;
        fs::write(tmp_yaml.path(), yaml)
            .map_err(|e| persist_err(&self.metadata_path, e.to_string()))?;
        tmp_yaml
            .persist(&self.metadata_path)
            .map_err(|e| persist_err(&self.metadata_path, e.to_string()))?;
        Ok(())
    }
}
