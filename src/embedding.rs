//! Sentence embeddings.
//!
//! [`TextEmbedder`] is the seam between the retrieval pipeline and the actual
//! model. The production implementation is [`CandleEmbedder`], a Candle port
//! of all-MiniLM-L6-v2 (384-d, mean pooling, L2 normalized) downloaded from
//! Hugging Face Hub. Tests substitute a deterministic embedder so nothing in
//! the pipeline depends on model weights.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::EmbeddingError;

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Converts text into a fixed-dimension dense vector.
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// BERT sentence-transformer running on Candle (CPU).
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl CandleEmbedder {
    /// Download (or reuse the cached copy of) all-MiniLM-L6-v2 and load it.
    pub fn load(dimension: usize) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        info!(model = MODEL_ID, "loading embedding model");

        let repo = Repo::with_revision(MODEL_ID.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo
            .get("config.json")
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
        let tokenizer_filename = api_repo
            .get("tokenizer.json")
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
        let weights_filename = api_repo
            .get("model.safetensors")
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        let config = std::fs::read_to_string(config_filename)
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
        let config: Config = serde_json::from_str(&config)
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Mean pooling over token embeddings, weighted by the attention mask.
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> Result<Tensor, EmbeddingError> {
        // embeddings: [1, seq_len, hidden]; mask must broadcast as [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let masked = embeddings.broadcast_mul(&mask)?;
        let sum = masked.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let mean = sum.broadcast_div(&count)?;
        Ok(mean.squeeze(0)?)
    }

    fn normalize(&self, tensor: &Tensor) -> Result<Tensor, EmbeddingError> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl TextEmbedder for CandleEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // The tokenizer truncates at the model's 512-token limit.
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenize(e.to_string()))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;
        Ok(embedding.to_vec1::<f32>()?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    /// Deterministic word-bag embedder: each word hashes into one of
    /// `DIMENSION` buckets, the counts are L2 normalized. Texts sharing more
    /// words land closer together, which is all the pipeline tests need.
    pub struct HashEmbedder;

    impl HashEmbedder {
        pub const DIMENSION: usize = 16;
    }

    impl TextEmbedder for HashEmbedder {
        fn dimension(&self) -> usize {
            Self::DIMENSION
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut vector = vec![0f32; Self::DIMENSION];
            for word in text.to_lowercase().split_whitespace() {
                let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
                if word.is_empty() {
                    continue;
                }
                let mut hasher = DefaultHasher::new();
                word.hash(&mut hasher);
                vector[(hasher.finish() % Self::DIMENSION as u64) as usize] += 1.0;
            }
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm == 0.0 {
                vector[0] = 1.0;
            } else {
                for v in &mut vector {
                    *v /= norm;
                }
            }
            Ok(vector)
        }
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder;
        let a = embedder.embed("the cat sat on the mat").unwrap();
        let b = embedder.embed("the cat sat on the mat").unwrap();
        assert_eq!(a, b);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similar_texts_are_closer() {
        let embedder = HashEmbedder;
        let query = embedder.embed("install the database server").unwrap();
        let near = embedder.embed("how to install the database server").unwrap();
        let far = embedder.embed("zebra quantum marmalade").unwrap();

        let dist = |a: &[f32], b: &[f32]| -> f32 {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        };
        assert!(dist(&query, &near) < dist(&query, &far));
    }
}
