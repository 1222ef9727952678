use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use rust_bert::pipelines::sentence_embeddings::{
    SentenceEmbeddingsBuilder, SentenceEmbeddingsModel, SentenceEmbeddingsModelType,
};
use tokio::sync::Mutex;
use unicode_normalization::UnicodeNormalization;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Turns clean texts into unit-norm vectors of a fixed dimension.
///
/// Implementations normalize their own output; downstream code compares vectors with a plain
/// dot product. An empty input returns an empty output without touching the model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn name(&self) -> &'static str;
}

/// Sentence embeddings from all-MiniLM-L6-v2 via rust-bert, on CPU.
///
/// The model is not safe for concurrent calls; every `embed` takes the mutex inside a blocking
/// task so callers sharing one service are serialized.
#[derive(Clone)]
pub struct EmbeddingService {
    model: Arc<Mutex<SentenceEmbeddingsModel>>,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &"<SentenceEmbeddingsModel>")
            .finish()
    }
}

impl EmbeddingService {
    /// Loads the model, downloading it on first use.
    ///
    /// # Errors
    /// Fails when the model cannot be fetched or built.
    pub fn new() -> Result<Self> {
        // rust-bert blocks on its own HTTP client, so build outside the async runtime.
        let model = std::thread::spawn(|| {
            SentenceEmbeddingsBuilder::remote(SentenceEmbeddingsModelType::AllMiniLmL6V2)
                .create_model()
        })
        .join()
        .map_err(|_| anyhow::anyhow!("failed to join model creation thread"))?
        .context("failed to create sentence embedding model")?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        let mut vectors = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            model.encode(&texts)
        })
        .await
        .context("failed to join embedding task")?
        .context("failed to encode texts")?;

        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }

    fn name(&self) -> &'static str {
        "minilm"
    }
}

const WORD_SEED: u64 = 0x5eed_0001;
const TRIGRAM_SEED: u64 = 0x5eed_0003;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing embedder.
///
/// Word unigrams and character trigrams of the NFC-normalized, lowercased text are hashed
/// with xxh3 into `dim` signed buckets, then L2-normalized. Needs no model download, so it
/// backs tests and serves as the fallback when the sentence model is unavailable.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    /// # Errors
    /// Fails when `dim` is zero.
    pub fn new(dim: usize) -> Result<Self> {
        ensure!(dim > 0, "hashing embedder dimension must be positive");
        Ok(Self { dim })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let normalized: String = text.nfc().collect::<String>().to_lowercase();
        let mut vector = vec![0.0_f32; self.dim];

        for word in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.accumulate(&mut vector, word.as_bytes(), WORD_SEED, 1.0);
        }

        let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        let chars: Vec<char> = collapsed.chars().collect();
        let mut buf = String::new();
        for window in chars.windows(3) {
            buf.clear();
            buf.extend(window);
            self.accumulate(&mut vector, buf.as_bytes(), TRIGRAM_SEED, TRIGRAM_WEIGHT);
        }

        if l2_norm(&vector) == 0.0 {
            // No features at all: pin to a fixed axis so the vector stays unit length.
            vector[0] = 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], seed: u64, weight: f32) {
        let hash = xxh3_64_with_seed(feature, seed);
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (hash % self.dim as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `v` to unit length in place; a zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn hashing_vectors_are_unit_norm() {
        let embedder = HashingEmbedder::new(64).expect("embedder");
        let vectors = embedder
            .embed(&texts(&[
                "the soundtrack is wonderful",
                "I think the argument is flawed",
                "!!!",
                "",
            ]))
            .await
            .expect("embed");

        assert_eq!(vectors.len(), 4);
        for vector in vectors {
            assert_eq!(vector.len(), 64);
            assert!((l2_norm(&vector) - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let embedder = HashingEmbedder::new(16).expect("embedder");
        assert!(embedder.embed(&[]).await.expect("embed").is_empty());
    }

    #[test]
    fn hashing_is_deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::new(128).expect("embedder");
        assert_eq!(
            embedder.embed_text("Great Video"),
            embedder.embed_text("great video")
        );
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated_ones() {
        let embedder = HashingEmbedder::new(256).expect("embedder");
        let base = embedder.embed_text("the battery life of this phone is great");
        let near = embedder.embed_text("battery life of the phone is great");
        let far = embedder.embed_text("who composed the opening theme music");

        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0_f32; 3];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 3]);

        let mut v = vec![3.0_f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
