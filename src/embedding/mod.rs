/// Embedding & similarity search
///
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local sentence embeddings (all-MiniLM-L6-v2, 384-dim)
/// - HashingEmbedder for deterministic offline embeddings
/// - SimilarityIndex for exact cosine ranking over a small corpus
/// - VectorStore for named collections built once per session
mod hashing;
mod provider;
mod store;
mod vector_index;

pub use hashing::HashingEmbedder;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use store::{build_index, VectorStore};
pub use vector_index::{SearchHit, SimilarityIndex};

use crate::config::{EmbeddingConfig, ProviderKind};
use std::sync::Arc;

/// Construct the embedding provider selected by configuration
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider {
        ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension)?)),
        ProviderKind::FastEmbed => {
            let provider = FastEmbedProvider::new(&config.model, config.batch_size)?;
            if provider.dimension() != config.dimension {
                tracing::warn!(
                    "embedding.dimension is {} but {} produces {}D vectors",
                    config.dimension,
                    config.model,
                    provider.dimension()
                );
            }
            Ok(Arc::new(provider))
        }
    }
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
