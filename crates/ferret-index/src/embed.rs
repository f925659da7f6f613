//! Embedding provider seam and a local feature-hashing implementation.

use std::future::Future;

use crate::lexical::tokenize;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding provider rate limited")]
    RateLimited,
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
    #[error("provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Timeouts, rate limits and outages are worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable(_))
    }
}

pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] classified as transient or permanent.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, ProviderError>> + Send;

    /// Largest number of texts accepted by one `embed` call.
    fn max_batch_size(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Deterministic embeddings from hashed token features. No network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    max_batch_size: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize, max_batch_size: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_batch_size: max_batch_size.max(1),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// L2-normalized signed feature vector for one text.
    #[must_use]
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&bytes[..8]);
            let slot = u64::from_le_bytes(idx) % self.dimensions as u64;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            #[allow(clippy::cast_possible_truncation)]
            let slot = slot as usize;
            v[slot] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.len() > self.max_batch_size {
            return Err(ProviderError::InvalidInput(format!(
                "batch of {} exceeds max_batch_size {}",
                texts.len(),
                self.max_batch_size
            )));
        }
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &'static str {
        "hashing"
    }
}
