use async_trait::async_trait;
use sha2::{Digest, Sha256};

use common::error::AppError;

use crate::backend::{l2_normalize, EmbeddingBackend};

/// Deterministic token-hash embedding backend. Embeds a text as a
/// bag-of-words over hashed token buckets, L2-normalized. Used by tests
/// and by deployments that run without an external embedding provider:
/// texts sharing vocabulary land close in cosine space.
pub struct HashedBackend {
    dimension: usize,
}

impl HashedBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut value = 0usize;
        for byte in digest.iter().take(8) {
            value = value.wrapping_shl(8) | usize::from(*byte);
        }
        value % self.dimension
    }
}

#[async_trait]
impl EmbeddingBackend for HashedBackend {
    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>, AppError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = self.bucket(token);
            if let Some(slot) = vector.get_mut(bucket) {
                *slot += 1.0;
            }
        }
        Ok(l2_normalize(vector))
    }

    async fn is_available(&self, _model: &str) -> bool {
        true
    }

    fn dimension(&self, _model: &str) -> usize {
        self.dimension
    }
}
